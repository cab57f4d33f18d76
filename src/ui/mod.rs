//! User-facing output.
//!
//! Pipelines never print directly; they talk to an injected [`Reporter`].
//! The terminal gets a [`ConsoleReporter`], `--json` runs get a
//! [`SilentReporter`], and tests substitute a capturing sink.

pub mod console;

pub use console::ConsoleReporter;

/// Output sink for pipeline progress.
pub trait Reporter: Send + Sync {
    /// A long-running step started (spinner until the next call).
    fn step(&self, message: &str);
    /// The current step finished successfully.
    fn success(&self, message: &str);
    /// Something went wrong but the run continues.
    fn warn(&self, message: &str);
    /// Neutral detail line.
    fn info(&self, message: &str);
    /// A byte transfer of `total` bytes started.
    fn transfer_started(&self, label: &str, total: u64);
    /// Cumulative transfer progress.
    fn transfer_progress(&self, transferred: u64, total: u64);
    fn transfer_finished(&self);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn step(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
    fn info(&self, _message: &str) {}
    fn transfer_started(&self, _label: &str, _total: u64) {}
    fn transfer_progress(&self, _transferred: u64, _total: u64) {}
    fn transfer_finished(&self) {}
}
