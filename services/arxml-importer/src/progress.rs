//! Import progress events.
//!
//! The pipeline never waits on consumers: events go through an unbounded
//! channel and are dropped once the receiver is gone.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    pub percent: u8,
    pub phase: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<ImportProgress>>,
}

impl ProgressReporter {
    pub fn new(sender: mpsc::UnboundedSender<ImportProgress>) -> Self {
        Self { sender: Some(sender) }
    }

    /// Reporter that only logs
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ImportProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn report(&self, percent: u8, phase: &str) {
        let percent = percent.min(100);
        info!("📊 [{:>3}%] {}", percent, phase);
        if let Some(sender) = &self.sender {
            let _ = sender.send(ImportProgress {
                percent,
                phase: phase.to_string(),
            });
        }
    }

    /// Report a position inside a `[start, end]` percent window
    pub fn report_scaled(&self, start: u8, end: u8, done: usize, total: usize, phase: &str) {
        let span = end.saturating_sub(start) as usize;
        let offset = if total == 0 { span } else { span * done.min(total) / total };
        self.report(start + offset as u8, phase);
    }
}
