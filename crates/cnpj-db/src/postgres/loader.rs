use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{pin_mut, SinkExt};
use tokio::sync::Mutex;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;
use tracing::error;

use cnpj_core::{schema, BatchRx, CnpjError, LoadStats, Loader, Message, PostgresConfig, Result, RowBatch, SharedProgress};

/// A pool of `workers` connections draining the same insertion queue,
/// each bulk-loading its batch with `COPY ... FROM STDIN`.
///
/// Grounded on `db/postgres_loader.py::run_postgres_loader`: one `Thread`
/// per worker there, one `tokio::spawn`ed task here, all pulling from the
/// same queue; `parallel=False` collapses to a single worker.
pub struct PostgresLoader {
    config: PostgresConfig,
    workers: usize,
    progress: SharedProgress,
    queue_cap: usize,
}

impl PostgresLoader {
    pub fn new(config: PostgresConfig, workers: usize, progress: SharedProgress, queue_cap: usize) -> Self {
        Self { config, workers: workers.max(1), progress, queue_cap }
    }
}

#[async_trait]
impl Loader for PostgresLoader {
    fn name(&self) -> &str {
        "postgres-loader"
    }

    async fn run(&mut self, rx: BatchRx, cancel: CancellationToken) -> Result<LoadStats> {
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(Mutex::new(LoadStats::default()));

        let mut set = tokio::task::JoinSet::new();
        for worker_id in 0..self.workers {
            let rx = rx.clone();
            let stats = stats.clone();
            let cancel = cancel.clone();
            let progress = self.progress.clone();
            let queue_cap = self.queue_cap;
            let config = self.config.clone();
            set.spawn(async move { worker_loop(worker_id, config, rx, stats, progress, queue_cap, cancel).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "postgres loader worker failed"),
                Err(e) => error!(error = %e, "postgres loader worker panicked"),
            }
        }

        Ok(Arc::try_unwrap(stats).map(Mutex::into_inner).unwrap_or_default())
    }
}

async fn worker_loop(
    worker_id: usize,
    config: PostgresConfig,
    rx: Arc<Mutex<BatchRx>>,
    stats: Arc<Mutex<LoadStats>>,
    progress: SharedProgress,
    queue_cap: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let mut cfg = tokio_postgres::Config::new();
    cfg.host(&config.host).port(config.port).dbname(&config.database).user(&config.user).password(&config.password);
    let (client, connection) = cfg.connect(NoTls).await.map_err(pg_err)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, worker = worker_id, "postgres connection task ended with error");
        }
    });
    client.batch_execute("SET client_encoding = 'WIN1252'").await.map_err(pg_err)?;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let (msg, queue_len) = {
            let mut guard = rx.lock().await;
            let msg = guard.recv().await;
            (msg, guard.len())
        };
        let Some(msg) = msg else { break };
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

        match copy_batch(&client, table.name, &columns, &batch).await {
            Ok(rows) => {
                let mut guard = stats.lock().await;
                guard.record(table.name, rows);
                drop(guard);
                if table.name != "estabelecimento_cnae_sec" {
                    progress.advance(table.name, rows, &batch.source_filename, queue_len, queue_cap);
                }
            }
            Err(e) => {
                error!(table = table.name, file = %batch.source_filename, error = %e, "COPY failed for batch");
            }
        }
    }

    Ok(())
}

/// `COPY "table" (cols) FROM STDIN`, with rows serialized the same way as
/// `convert_rows_to_csv_buffer`: `;`-delimited CSV, re-encoded to
/// windows-1252 since the connection's `client_encoding` is set to match.
async fn copy_batch(client: &tokio_postgres::Client, table: &str, columns: &[&str], batch: &RowBatch) -> Result<u64> {
    let col_list = columns.join(",");
    let sql = format!("COPY \"{table}\" ({col_list}) FROM STDIN WITH (FORMAT csv, DELIMITER ';', NULL '')");

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in &batch.rows {
        let record: Vec<&str> = row.iter().map(|f| f.as_deref().unwrap_or("")).collect();
        writer.write_record(&record).map_err(|e| CnpjError::Other(anyhow::anyhow!(e)))?;
    }
    writer.flush().map_err(CnpjError::Io)?;
    let text = writer.into_inner().map_err(|e| CnpjError::Other(anyhow::anyhow!(e.to_string())))?;
    let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(&String::from_utf8_lossy(&text));

    let sink = client.copy_in(&sql).await.map_err(pg_err)?;
    pin_mut!(sink);
    sink.send(Bytes::copy_from_slice(&encoded)).await.map_err(pg_err)?;
    sink.close().await.map_err(pg_err)?;

    Ok(batch.rows.len() as u64)
}

fn pg_err(e: tokio_postgres::Error) -> CnpjError {
    CnpjError::Database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnpj_core::Row;

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn csv_serialization_uses_semicolon_delimiter_and_empty_string_for_null() {
        let mut batch = RowBatch::new("cnae").with_source("Cnaes.zip");
        batch.rows = vec![row(&["6201501", "DESENVOLVIMENTO"]), vec![None, Some("SEM CODIGO".to_string())]];

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        for r in &batch.rows {
            let record: Vec<&str> = r.iter().map(|f| f.as_deref().unwrap_or("")).collect();
            writer.write_record(&record).unwrap();
        }
        writer.flush().unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        assert_eq!(text, "6201501;DESENVOLVIMENTO\n;SEM CODIGO\n");
    }
}
