use std::io::{self, BufRead, Write};

/// Status and notification surface the long-running flows report into.
/// Every method is fire-and-forget except `popup_retry_cancel`, which
/// blocks the calling worker until the user answers.
pub trait ProgressSink: Send + Sync {
    /// Coarse one-line status ("(3/120) Comparing Foo").
    fn set_status(&self, text: &str);
    /// Finer-grained sub-status beneath the current step.
    fn set_progress(&self, text: &str);
    fn popup_info(&self, text: &str);
    fn popup_warning(&self, text: &str);
    fn popup_error(&self, text: &str);
    /// Returns true when the user chose to retry.
    fn popup_retry_cancel(&self, text: &str) -> bool;
}

/// Console front end: statuses go to stdout, warnings and errors to
/// stderr, retry prompts read a line from stdin.
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn set_status(&self, text: &str) {
        println!("{text}");
    }

    fn set_progress(&self, text: &str) {
        println!("    {text}");
    }

    fn popup_info(&self, text: &str) {
        println!("\n{text}\n");
    }

    fn popup_warning(&self, text: &str) {
        eprintln!("warning: {text}");
    }

    fn popup_error(&self, text: &str) {
        eprintln!("error: {text}");
    }

    fn popup_retry_cancel(&self, text: &str) -> bool {
        eprint!("{text} Retry? [y/N] ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

/// Sink that swallows everything and always declines retries. Used by
/// tests and non-interactive invocations.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_status(&self, _text: &str) {}
    fn set_progress(&self, _text: &str) {}
    fn popup_info(&self, _text: &str) {}
    fn popup_warning(&self, _text: &str) {}
    fn popup_error(&self, _text: &str) {}
    fn popup_retry_cancel(&self, _text: &str) -> bool {
        false
    }
}
