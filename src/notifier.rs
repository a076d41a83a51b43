//! Reporting of failed pipeline steps.
//!
//! A step never takes the process down. Whatever goes wrong inside it is
//! handed to a [`Notifier`], which tells the operator and lets the rest of
//! the pipeline carry on.

use std::io::Write;

use console::style;

/// Receives the failures of pipeline steps.
pub trait Notifier: Send + Sync {
    /// Called once for every step that ends with an error.
    fn notify(&self, step: &str, error: &anyhow::Error);
}

/// Prints failures in red and rings the terminal bell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, step: &str, error: &anyhow::Error) {
        tracing::error!(step, "{}", style(format!("{error:#}")).red());
        beep();
    }
}

fn beep() {
    let mut stderr = std::io::stderr();

    if let Err(err) = stderr.write_all(b"\x07").and_then(|()| stderr.flush()) {
        tracing::debug!("couldn't ring the bell: {err}");
    }
}
