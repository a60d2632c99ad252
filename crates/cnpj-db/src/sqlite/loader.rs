use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::error;

use cnpj_core::{schema, BatchRx, CnpjError, LoadStats, Loader, Message, Result, SharedProgress};

/// Single-writer SQLite loader: one connection, one outer transaction,
/// `INSERT OR IGNORE` for `empresa` only (its deferred dedup happens in
/// `patch_data`, but `OR IGNORE` avoids aborting the whole batch on a
/// duplicate `cnpj_basico` seen twice within the same load run).
///
/// Grounded on `db/sqlite_loader.py` (`src/rfb_cnpj_etl/db/sqlite_loader.py`
/// variant): pragmas, single `BEGIN`/`COMMIT`, `executemany`-equivalent
/// per-row execution.
pub struct SqliteLoader {
    db_path: PathBuf,
    progress: SharedProgress,
    queue_cap: usize,
}

impl SqliteLoader {
    pub fn new(db_path: impl Into<PathBuf>, progress: SharedProgress, queue_cap: usize) -> Self {
        Self { db_path: db_path.into(), progress, queue_cap }
    }
}

#[async_trait]
impl Loader for SqliteLoader {
    fn name(&self) -> &str {
        "sqlite-loader"
    }

    async fn run(&mut self, mut rx: BatchRx, cancel: CancellationToken) -> Result<LoadStats> {
        let db_path = self.db_path.clone();
        let progress = self.progress.clone();
        let queue_cap = self.queue_cap;

        tokio::task::spawn_blocking(move || consume(&db_path, &mut rx, &cancel, &progress, queue_cap))
            .await
            .map_err(|e| CnpjError::Other(anyhow::anyhow!("sqlite loader task panicked: {e}")))?
    }
}

fn consume(
    db_path: &std::path::Path,
    rx: &mut BatchRx,
    cancel: &CancellationToken,
    progress: &SharedProgress,
    queue_cap: usize,
) -> Result<LoadStats> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(CnpjError::Io)?;
    }
    let mut conn = Connection::open(db_path).map_err(db_err)?;
    conn.execute_batch(
        "PRAGMA journal_mode=MEMORY;
         PRAGMA synchronous=OFF;
         PRAGMA foreign_keys=OFF;
         PRAGMA temp_store=MEMORY;
         PRAGMA cache_size=-128000;
         PRAGMA locking_mode=EXCLUSIVE;
         PRAGMA automatic_index=OFF;",
    )
    .map_err(db_err)?;

    let mut stats = LoadStats::default();
    let tx = conn.transaction().map_err(db_err)?;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(msg) = rx.blocking_recv() else { break };
        let batch = match msg {
            Message::Batch(b) => b,
            Message::Eos => break,
        };
        if batch.is_empty() {
            continue;
        }

        let Some(table) = schema::table_by_name(&batch.table) else {
            error!(table = %batch.table, "no catalog entry for table, dropping batch");
            continue;
        };
        let columns = table.column_names();
        let batch = cnpj_tx::transform_batch(batch, &columns);
        let rows_in_batch = batch.len() as u64;

        let verb = if table.name == "empresa" { "INSERT OR IGNORE" } else { "INSERT" };
        let placeholders = (0..columns.len()).map(|_| "?").collect::<Vec<_>>().join(",");
        let col_list = columns.join(",");
        let sql = format!("{verb} INTO {} ({col_list}) VALUES ({placeholders})", table.name);

        let mut stmt = tx.prepare_cached(&sql).map_err(db_err)?;
        for row in &batch.rows {
            let params: Vec<&dyn rusqlite::ToSql> =
                row.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
            if let Err(e) = stmt.execute(params.as_slice()) {
                error!(table = table.name, error = %e, "row insert failed, skipping row");
            }
        }
        drop(stmt);

        stats.record(table.name, rows_in_batch);
        if table.name != "estabelecimento_cnae_sec" {
            progress.advance(table.name, rows_in_batch, &batch.source_filename, rx.len(), queue_cap);
        }
    }

    tx.commit().map_err(db_err)?;
    Ok(stats)
}

fn db_err(e: rusqlite::Error) -> CnpjError {
    CnpjError::Database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl;
    use cnpj_core::{Row, RowBatch};
    use tokio::sync::mpsc;

    fn make_db(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        for table in schema::tables_in_order() {
            conn.execute_batch(&ddl::create_table_sql(table, false, true, true)).unwrap();
        }
    }

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[tokio::test]
    async fn inserts_rows_and_records_stats() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cnpj.db");
        make_db(&db_path);

        let (tx, rx) = mpsc::channel(4);
        let progress = SharedProgress::new(0, true);
        let mut loader = SqliteLoader::new(&db_path, progress, 4);

        let mut batch = RowBatch::new("cnae").with_source("Cnaes.zip");
        batch.rows = vec![row(&["6201501", "DESENVOLVIMENTO"])];
        tx.send(Message::Batch(batch)).await.unwrap();
        tx.send(Message::Eos).await.unwrap();
        drop(tx);

        let stats = loader.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.rows_by_table["cnae"], 1);

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cnae", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn empresa_duplicate_cnpj_is_ignored_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cnpj.db");
        make_db(&db_path);

        let (tx, rx) = mpsc::channel(4);
        let progress = SharedProgress::new(0, true);
        let mut loader = SqliteLoader::new(&db_path, progress, 4);

        let mut batch = RowBatch::new("empresa").with_source("Empresas0.zip");
        batch.rows = vec![
            row(&["12345678", "ACME LTDA", "2062", "49", "1000,00", "01", ""]),
            row(&["12345678", "ACME LTDA DUPLICATE", "2062", "49", "1000,00", "01", ""]),
        ];
        tx.send(Message::Batch(batch)).await.unwrap();
        tx.send(Message::Eos).await.unwrap();
        drop(tx);

        loader.run(rx, CancellationToken::new()).await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM empresa", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
