use anyhow::{Context, Result};
use dagr_installer::cli::output::*;
use dagr_installer::cli::{exit_code_for, Cli};
use dagr_installer::core::StepState;
use dagr_installer::{
    build_pipeline, verify_installation, InstallerConfig, OutputMode, PipelineOptions,
    ProvisioningContext, StepSequencer, SubprocessSupervisor, TermPrompter,
};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let code = exit_code_for(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize logging; RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => InstallerConfig::from_file(path)
            .with_context(|| format!("Failed to load installer config {}", path.display()))?,
        None => InstallerConfig::default(),
    };
    debug!("Installer config: {:?}", config);

    let mode = if cli.verbose {
        OutputMode::Verbose
    } else {
        OutputMode::Quiet
    };
    let supervisor = SubprocessSupervisor::new(mode, config.poll_interval());

    let code = if cli.verify {
        verify(&config, &supervisor).await
    } else {
        provision(config, cli, supervisor).await
    };
    std::process::exit(code);
}

async fn verify(config: &InstallerConfig, supervisor: &SubprocessSupervisor) -> i32 {
    println!("{} Verifying installation...\n", INFO);
    let report = verify_installation(config, supervisor).await;
    print!("{}", report.render());
    report.exit_code()
}

async fn provision(config: InstallerConfig, cli: Cli, supervisor: SubprocessSupervisor) -> i32 {
    let ctx = ProvisioningContext::from_process(config, cli.verbose);
    let steps = build_pipeline(
        Arc::new(supervisor),
        Arc::new(TermPrompter),
        PipelineOptions {
            offer_reboot: !cli.no_reboot,
        },
    );

    let mut sequencer = StepSequencer::new();
    sequencer.add_event_handler(|event| {
        println!("{}", format_execution_event(event));
    });

    let report = sequencer.run(steps, &ctx).await;

    println!("\n{}", style("Summary").bold());
    print!("{}", format_report(&report));

    if let Some(failed) = report.fatal_failure() {
        if let StepState::Failed { error, .. } = &failed.state {
            eprintln!(
                "\n{} {} failed: {}",
                CROSS,
                style(&failed.name).bold(),
                style(error).red()
            );
        }
    }
    report.exit_code()
}
