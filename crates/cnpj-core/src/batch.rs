//! Row and batch types that flow between the archive producer and the
//! database loader, and the `Producer`/`Loader` traits that connect them.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A single decoded row, column values in table-definition order.
///
/// `None` represents SQL NULL. Values are already sanitized and normalized
/// by the time they reach this type; `cnpj-tx` is what produces it.
pub type Row = Vec<Option<String>>;

/// A batch of rows destined for one table.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub table: String,
    pub rows: Vec<Row>,
    /// Archive this batch was read from, surfaced in progress log lines.
    pub source_filename: String,
}

impl RowBatch {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), rows: Vec::new(), source_filename: String::new() }
    }

    pub fn with_source(mut self, filename: impl Into<String>) -> Self {
        self.source_filename = filename.into();
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Unit of work passed along the insertion queue.
///
/// A sentinel `Eos` (end of stream) tells a loader worker that no more
/// batches are coming on its channel; the original Python pipeline used a
/// `None` pushed onto a `queue.Queue` for the same purpose.
#[derive(Debug, Clone)]
pub enum Message {
    Batch(RowBatch),
    Eos,
}

pub type BatchTx = mpsc::Sender<Message>;
pub type BatchRx = mpsc::Receiver<Message>;

/// Per-table running counts, used by the progress reporter and by the
/// final "rows loaded" summary.
#[derive(Debug, Default, Clone)]
pub struct LoadStats {
    pub rows_by_table: HashMap<String, u64>,
}

impl LoadStats {
    pub fn record(&mut self, table: &str, rows: u64) {
        *self.rows_by_table.entry(table.to_string()).or_insert(0) += rows;
    }

    pub fn total(&self) -> u64 {
        self.rows_by_table.values().sum()
    }
}

/// Something that reads archives and emits `RowBatch`es onto a channel.
///
/// Implemented once per archive family in `cnpj-io`; a `CancellationToken`
/// lets the CLI's Ctrl-C handler stop an in-flight run without dropping
/// partially-written files mid-write.
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&mut self, tx: BatchTx, cancel: CancellationToken) -> Result<()>;
}

/// Something that drains `Message`s from a channel into a database.
///
/// `cnpj-db` provides one implementation per backend (SQLite, Postgres);
/// both accept batches already routed to their target table by `cnpj-io`.
#[async_trait]
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&mut self, rx: BatchRx, cancel: CancellationToken) -> Result<LoadStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_stats_accumulate_across_calls() {
        let mut stats = LoadStats::default();
        stats.record("empresa", 10);
        stats.record("empresa", 5);
        stats.record("socio", 3);
        assert_eq!(stats.rows_by_table["empresa"], 15);
        assert_eq!(stats.total(), 18);
    }

    #[test]
    fn row_batch_starts_empty() {
        let batch = RowBatch::new("empresa");
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
