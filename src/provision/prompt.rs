//! Interactive confirmation

use console::Term;
use tracing::debug;

/// Asks the operator a yes/no question
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Reads the answer from the controlling terminal
///
/// Without a terminal, or on a read error, the answer is no.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermPrompter;

impl Prompter for TermPrompter {
    fn confirm(&self, question: &str) -> bool {
        let term = Term::stdout();
        if !term.is_term() {
            debug!("No terminal attached, answering no to: {}", question);
            return false;
        }

        if term.write_str(&format!("{} [y/N] ", question)).is_err() {
            return false;
        }
        match term.read_line() {
            Ok(answer) => is_yes(&answer),
            Err(e) => {
                debug!("Could not read answer: {}", e);
                false
            }
        }
    }
}

/// Accepts `y` and `yes` in any case
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
