//! Idempotent line patching for `key=value` text configuration files
//!
//! A directive line can be in one of three states: absent, present but
//! disabled, or enabled. Patching converges any file to exactly one enabled
//! line for the directive, whatever state it started in.
//!
//! A commented-out copy of the directive counts as disabled. An enabled line
//! with another value only counts as disabled when the key is single-valued
//! (a `dtparam=<name>` style sub-key); repeatable keys such as `dtoverlay`
//! keep their other lines.

use crate::core::error::ProvisionError;
use regex::Regex;
use std::path::Path;
use tracing::debug;

/// One `key=value` directive, e.g. `dtparam=spi=on`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDirective {
    pub key: String,
    pub desired_value: String,
}

impl ConfigDirective {
    pub fn new(key: impl Into<String>, desired_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            desired_value: desired_value.into(),
        }
    }

    /// Parse the enabled form. The value is everything after the last `=`,
    /// so `dtparam=spi=on` has key `dtparam=spi` and value `on`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.starts_with('#') {
            return Err("directive must not be commented".to_string());
        }
        if s.chars().any(char::is_whitespace) {
            return Err("directive must not contain whitespace".to_string());
        }
        match s.rsplit_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                Ok(Self::new(key, value))
            }
            _ => Err("expected key=value".to_string()),
        }
    }

    /// Whether the file may hold only one value for this key. Sub-keys like
    /// `dtparam=spi` are; bare keys like `dtoverlay` may repeat.
    pub fn is_single_valued(&self) -> bool {
        self.key.contains('=')
    }

    /// The line as it appears when enabled
    pub fn enabled_form(&self) -> String {
        format!("{}={}", self.key, self.desired_value)
    }
}

impl std::fmt::Display for ConfigDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.enabled_form())
    }
}

/// What a patch did to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// An enabled line was already present
    AlreadyEnabled,
    /// A disabled line was rewritten in place
    Enabled,
    /// No line for the key existed, one was appended
    Appended,
}

/// Result of patching text in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub outcome: MutationOutcome,
    pub content: String,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Unrelated,
    Enabled,
    Disabled,
}

/// Three-state line patcher for one directive
#[derive(Debug, Clone)]
pub struct LinePatcher {
    directive: ConfigDirective,
    pattern: Regex,
}

impl LinePatcher {
    pub fn new(directive: ConfigDirective) -> Result<Self, regex::Error> {
        // Matches `key=value`, optionally commented, with an optional trailing comment
        let pattern = Regex::new(&format!(
            r"^\s*(?P<comment>#+\s*)?{}\s*=\s*(?P<value>[^#\s]*)\s*(#.*)?$",
            regex::escape(&directive.key)
        ))?;

        Ok(Self { directive, pattern })
    }

    pub fn directive(&self) -> &ConfigDirective {
        &self.directive
    }

    fn classify(&self, line: &str) -> LineState {
        match self.pattern.captures(line) {
            None => LineState::Unrelated,
            Some(caps) => {
                let commented = caps.name("comment").is_some();
                let value = caps.name("value").map(|m| m.as_str()).unwrap_or("");
                let same_value = value == self.directive.desired_value;
                match (commented, same_value) {
                    (false, true) => LineState::Enabled,
                    (true, true) => LineState::Disabled,
                    // Another value only conflicts when the key cannot repeat
                    (_, false) if self.directive.is_single_valued() => LineState::Disabled,
                    (_, false) => LineState::Unrelated,
                }
            }
        }
    }

    /// Patch file content so exactly one enabled line for the directive remains
    pub fn apply(&self, content: &str) -> Patch {
        let lines: Vec<&str> = content.lines().collect();
        let states: Vec<LineState> = lines.iter().map(|l| self.classify(l)).collect();

        let enabled_at = states.iter().position(|s| *s == LineState::Enabled);
        let disabled_at = states.iter().position(|s| *s == LineState::Disabled);

        // The line that survives, and the outcome it implies
        let (keep, outcome) = match (enabled_at, disabled_at) {
            (Some(idx), _) => (Some(idx), MutationOutcome::AlreadyEnabled),
            (None, Some(idx)) => (Some(idx), MutationOutcome::Enabled),
            (None, None) => (None, MutationOutcome::Appended),
        };

        let enabled_line = self.directive.enabled_form();
        let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
        for (idx, (line, state)) in lines.iter().zip(&states).enumerate() {
            match state {
                LineState::Unrelated => out.push((*line).to_string()),
                _ if Some(idx) == keep => out.push(enabled_line.clone()),
                // stale or duplicate occurrence of the key
                _ => {}
            }
        }
        if keep.is_none() {
            out.push(enabled_line);
        }

        let mut patched = out.join("\n");
        if !patched.is_empty() {
            patched.push('\n');
        }

        // Keep the original bytes when nothing but a missing final newline differs
        let changed = patched.trim_end_matches('\n') != content.trim_end_matches('\n');
        let content = if changed { patched } else { content.to_string() };

        Patch {
            outcome,
            content,
            changed,
        }
    }
}

/// Ensure `directive` is enabled in the file at `path`
///
/// A missing file or a write failure is an error; the caller's step decides
/// whether that is fatal.
pub fn ensure_enabled(
    path: &Path,
    directive: &ConfigDirective,
) -> Result<MutationOutcome, ProvisionError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProvisionError::missing("boot config", path),
        _ => ProvisionError::io(path, e),
    })?;

    let patcher = LinePatcher::new(directive.clone())
        .map_err(|e| ProvisionError::InvalidConfig(format!("directive {}: {}", directive, e)))?;
    let patch = patcher.apply(&content);
    if patch.changed {
        std::fs::write(path, &patch.content).map_err(|e| ProvisionError::io(path, e))?;
    }

    debug!(
        "Directive {} in {}: {:?}",
        directive,
        path.display(),
        patch.outcome
    );
    Ok(patch.outcome)
}
