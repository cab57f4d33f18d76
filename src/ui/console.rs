//! Terminal reporter: indicatif spinners and progress bars, colored status lines.

use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use super::Reporter;

const SPINNER_TICK: Duration = Duration::from_millis(100);

pub struct ConsoleReporter {
    active: Mutex<Option<ProgressBar>>,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Stop whatever spinner or bar is showing.
    fn clear(&self) {
        if let Some(bar) = self.active.lock().take() {
            bar.finish_and_clear();
        }
    }

    /// Print a line without tearing an active bar.
    fn println(&self, line: String) {
        match self.active.lock().as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

impl Reporter for ConsoleReporter {
    fn step(&self, message: &str) {
        self.clear();
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(message.to_string());
        bar.enable_steady_tick(SPINNER_TICK);
        *self.active.lock() = Some(bar);
    }

    fn success(&self, message: &str) {
        self.clear();
        eprintln!("{} {}", "✓".green().bold(), message);
    }

    fn warn(&self, message: &str) {
        self.println(format!("{} {}", "!".yellow().bold(), message.yellow()));
    }

    fn info(&self, message: &str) {
        self.println(format!("  {}", message.dimmed()));
    }

    fn transfer_started(&self, label: &str, total: u64) {
        self.clear();
        let bar = ProgressBar::new(total);
        bar.set_style(bytes_style());
        bar.set_message(label.to_string());
        *self.active.lock() = Some(bar);
    }

    fn transfer_progress(&self, transferred: u64, total: u64) {
        if let Some(bar) = self.active.lock().as_ref() {
            if bar.length() != Some(total) {
                bar.set_length(total);
            }
            bar.set_position(transferred);
        }
    }

    fn transfer_finished(&self) {
        if let Some(bar) = self.active.lock().take() {
            bar.finish_and_clear();
        }
    }
}
