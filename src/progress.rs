use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressStyle};

/// A simple spinner for long-running stages.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.dim} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.into());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    /// Handle to the underlying bar, for callbacks that outlive a borrow.
    pub fn clone_bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// Clear the spinner and print a `✔ message` line to stderr.
    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", "✔".green(), message.into());
    }

    /// Clear the spinner and print a `✘ message` line to stderr.
    pub fn fail(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", "✘".red(), message.into());
    }
}

/// Print a `✔ message` line above a running spinner and move it on to `next`.
pub fn step(bar: &ProgressBar, done: impl Into<String>, next: impl Into<String>) {
    let done = done.into();
    bar.suspend(|| eprintln!("{} {}", "✔".green(), done));
    bar.set_message(next.into());
}
