//! Terminal output: a transient progress bar per pass, one green line per
//! training epoch and one red line per validation pass.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::train::events::{EpochSummary, EventSink, Pass, StepProgress, ValidationSummary};

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

fn metrics_text(metrics: &[(String, f64)]) -> String {
    metrics.iter().map(|(n, v)| format!("{}={:.3}", n, v)).collect::<Vec<_>>().join(" ")
}

pub fn epoch_line(summary: &EpochSummary) -> String {
    format!(
        "train epoch={} {} elapsed={:.3} time={:.3}",
        summary.epoch,
        metrics_text(&summary.metrics),
        summary.elapsed_secs,
        summary.epoch_secs
    )
}

pub fn validation_line(summary: &ValidationSummary) -> String {
    let mut line = format!("valid epoch={} {}", summary.epoch, metrics_text(&summary.metrics));
    if let Some(sk_acc) = summary.sk_acc {
        line.push_str(&format!(" sk_acc={:.3}", sk_acc));
    }
    if let Some(auc) = summary.auc {
        line.push_str(&format!(" auc={:.3}", auc));
    }
    line.push_str(&format!(" lr={:.4} best={:.3}", summary.learning_rate, summary.best));
    line
}

/// Writes to stdout; the progress bar goes to stderr and is cleared when
/// its pass ends.
#[derive(Default)]
pub struct ConsoleSink {
    bar: Option<ProgressBar>,
    color: bool,
}

impl ConsoleSink {
    pub fn new(color: bool) -> Self {
        Self { bar: None, color }
    }

    fn bar_for(&mut self, progress: &StepProgress) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let bar = match progress.total {
                Some(total) => ProgressBar::new(total as u64),
                None => ProgressBar::new_spinner(),
            };
            let template = match progress.total {
                Some(_) => "{bar:30} {pos}/{len} [{elapsed_precise}<{eta_precise}] {msg}",
                None => "{spinner} {pos} [{elapsed_precise}] {msg}",
            };
            bar.set_style(ProgressStyle::default_bar().template(template).unwrap_or_else(|_| ProgressStyle::default_bar()));
            bar
        })
    }

    fn print(&self, color: &str, line: &str) {
        if self.color {
            println!("{}{}{}", color, line, RESET);
        } else {
            println!("{}", line);
        }
    }
}

impl EventSink for ConsoleSink {
    fn on_step(&mut self, progress: &StepProgress) {
        let bar = self.bar_for(progress);
        bar.set_position(progress.step as u64);
        bar.set_message(progress.message.clone());
    }

    fn on_pass_end(&mut self, _pass: Pass) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn on_epoch(&mut self, summary: &EpochSummary) {
        self.print(GREEN, &epoch_line(summary));
    }

    fn on_validation(&mut self, summary: &ValidationSummary) {
        self.print(RED, &validation_line(summary));
    }

    fn on_checkpoint(&mut self, _epoch: usize, path: &Path) {
        println!("saved to {}.", path.display());
    }
}
