//! CLI output formatting

use crate::{
    core::{ExecutionStatus, StepState},
    execution::{ExecutionEvent, SequenceReport},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create the rotating progress line for a running command
///
/// The caller ticks it; there is no background ticker.
pub fn create_spinner(description: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("  {spinner:.cyan} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("|/-\\ ");
    spinner.set_style(style);
    spinner.set_message(description.to_string());
    spinner
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { .. } => style("COMPLETED").green().to_string(),
        StepState::Failed { fatal: true, .. } => style("FAILED").red().to_string(),
        StepState::Failed { fatal: false, .. } => style("FAILED (continued)").yellow().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Aborted => style("ABORTED").red().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            total_steps,
        } => format!(
            "{} Provisioning device ({} steps, run {})",
            ROCKET,
            total_steps,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStarted { index, total, name } => format!(
            "\n[{}/{}] {}",
            style(index).cyan(),
            style(total).dim(),
            style(name).bold()
        ),
        ExecutionEvent::StepCompleted { name } => {
            format!("{} {}", CHECK, style(name).green())
        }
        ExecutionEvent::StepFailed { name, error, fatal } => {
            if *fatal {
                format!("{} {}: {}", CROSS, style(name).red(), style(error).red())
            } else {
                format!(
                    "{} {}: {} {}",
                    WARN,
                    style(name).yellow(),
                    style(error).dim(),
                    style("(continuing)").dim()
                )
            }
        }
        ExecutionEvent::StepSkipped { name } => {
            format!("{} {}", SKIP, style(name).dim())
        }
        ExecutionEvent::RunFinished { run_id, status } => format!(
            "\n{} Run {} {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}

/// Format the per-step summary table
pub fn format_report(report: &SequenceReport) -> String {
    let width = report
        .steps
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0);

    report
        .steps
        .iter()
        .map(|step| {
            let duration = step
                .state
                .duration()
                .map(|d| format!(" {}", style(format_duration(d)).dim()))
                .unwrap_or_default();
            format!(
                "  {:<width$}  {}{}\n",
                step.name,
                format_step_state(&step.state),
                duration,
                width = width
            )
        })
        .collect()
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
