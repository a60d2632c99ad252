//! Shared progress counters for the load phase.
//!
//! Mirrors the original `utils/progress.py`: worker threads report rows
//! inserted as they go, a single bar (or, with `debug_log`, a periodic log
//! line) reflects the running total against an estimated row count.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe counter shared by every loader worker for a run.
///
/// Workers call [`SharedProgress::advance`] after each successful batch
/// insert; only the thread that pushes the bar forward needs the actual
/// indicatif handle, so construction is cheap to clone and pass into
/// `tokio::spawn`ed tasks.
#[derive(Clone)]
pub struct SharedProgress {
    inserted: Arc<AtomicU64>,
    total_estimate: u64,
    bar: Option<ProgressBar>,
    debug_log: bool,
    last_logged_percent: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new(total_estimate: u64, debug_log: bool) -> Self {
        let bar = if debug_log || total_estimate == 0 {
            None
        } else {
            let bar = ProgressBar::new(total_estimate);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            Some(bar)
        };

        Self {
            inserted: Arc::new(AtomicU64::new(0)),
            total_estimate,
            bar,
            debug_log,
            last_logged_percent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record that `rows` more were inserted for `table` out of `filename`,
    /// and update the shared bar or emit a threshold-gated log line.
    ///
    /// `queue_len`/`queue_cap` are only used for the debug log line's queue
    /// fill indicator. Log lines fire at most once per 0.5% of
    /// `total_estimate` progressed, matching the original's throttle, so a
    /// fast run with tiny batches doesn't flood stdout.
    pub fn advance(&self, table: &str, rows: u64, filename: &str, queue_len: usize, queue_cap: usize) {
        let total = self.inserted.fetch_add(rows, Ordering::Relaxed) + rows;

        if let Some(bar) = &self.bar {
            bar.set_position(total.min(self.total_estimate));
            return;
        }

        if !self.debug_log || self.total_estimate == 0 {
            return;
        }

        let percent = (total * 200 / self.total_estimate).min(200); // tenths of a percent, *2
        let last = self.last_logged_percent.load(Ordering::Relaxed);
        if percent >= last + 1 || percent == 200 {
            self.last_logged_percent.store(percent, Ordering::Relaxed);
            tracing::info!(
                table,
                rows_inserted = total,
                total_estimate = self.total_estimate,
                percent = percent as f64 / 2.0,
                filename,
                queue = format!("{queue_len}/{queue_cap}"),
                "load progress"
            );
        }
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        } else {
            tracing::info!("{message}");
        }
    }

    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_accumulates_across_tables() {
        let progress = SharedProgress::new(1000, true);
        progress.advance("empresa", 100, "Empresas0.zip", 1, 4);
        progress.advance("socio", 50, "Socios0.zip", 0, 4);
        assert_eq!(progress.inserted(), 150);
    }

    #[test]
    fn zero_estimate_does_not_panic_on_advance() {
        let progress = SharedProgress::new(0, true);
        progress.advance("cnae", 10, "Cnaes.zip", 0, 4);
        assert_eq!(progress.inserted(), 10);
    }
}
