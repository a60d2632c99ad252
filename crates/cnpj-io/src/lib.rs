//! Archive producer: opens each `.zip` in a download directory, stream-parses
//! its sole text member, fans rows out to one buffer per target table, and
//! pushes bounded-size batches onto the shared insertion queue.
//!
//! Grounded on `utils/db_batch_producer.py`'s `_process_zip_file`/`produce_batches`.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use cnpj_core::{schema, BatchTx, Config, Message, Producer, Result, Row, RowBatch};

/// Reads every archive under `dir` and emits batches onto `tx`.
///
/// When `parallel` is set, up to `config.worker_threads` archives are
/// processed concurrently (one blocking task each) instead of strictly
/// sequentially — useful for the Postgres backend, which has more than
/// one consumer draining the queue. Bounded by `worker_threads` per
/// DESIGN NOTES §9: never one unbounded thread per archive.
pub struct ArchiveProducer {
    dir: PathBuf,
    config: Arc<Config>,
    parallel: bool,
    consumers: usize,
}

impl ArchiveProducer {
    pub fn new(dir: impl Into<PathBuf>, config: Arc<Config>, parallel: bool, consumers: usize) -> Self {
        Self { dir: dir.into(), config, parallel, consumers: consumers.max(1) }
    }
}

#[async_trait]
impl Producer for ArchiveProducer {
    fn name(&self) -> &str {
        "archive-producer"
    }

    async fn run(&mut self, tx: BatchTx, cancel: CancellationToken) -> Result<()> {
        let mut archives = list_zip_files(&self.dir)?;
        archives.sort();

        if self.parallel {
            let limit = Arc::new(Semaphore::new(self.config.worker_threads.max(1)));
            let mut set = tokio::task::JoinSet::new();
            for path in archives {
                if cancel.is_cancelled() {
                    break;
                }
                let tx = tx.clone();
                let cancel = cancel.clone();
                let limit = limit.clone();
                let batch_size = self.config.batch_size;
                let ratio = self.config.batch_ratio.clone();
                set.spawn(async move {
                    let _permit = limit.acquire_owned().await;
                    tokio::task::spawn_blocking(move || process_archive(&path, &tx, &cancel, batch_size, &ratio))
                        .await
                        .map_err(|e| anyhow::anyhow!("producer task panicked: {e}"))
                        .and_then(|r| r)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "archive producer task failed"),
                    Err(e) => error!(error = %e, "archive producer task panicked"),
                }
            }
        } else {
            for path in archives {
                if cancel.is_cancelled() {
                    break;
                }
                let tx = tx.clone();
                let cancel = cancel.clone();
                let batch_size = self.config.batch_size;
                let ratio = self.config.batch_ratio.clone();
                let result =
                    tokio::task::spawn_blocking(move || process_archive(&path, &tx, &cancel, batch_size, &ratio))
                        .await
                        .map_err(|e| anyhow::anyhow!("producer task panicked: {e}"))
                        .and_then(|r| r);
                if let Err(e) = result {
                    error!(error = %e, "archive producer task failed");
                }
            }
        }

        for _ in 0..self.consumers {
            let _ = tx.send(Message::Eos).await;
        }
        Ok(())
    }
}

fn list_zip_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("zip")).unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(out)
}

/// Blocking: opens one archive, parses its sole member, and `blocking_send`s
/// batches onto `tx` as table buffers fill. Runs inside `spawn_blocking`.
fn process_archive(
    path: &Path,
    tx: &BatchTx,
    cancel: &CancellationToken,
    batch_size: usize,
    ratio: &HashMap<String, f64>,
) -> anyhow::Result<()> {
    let filename = path.display().to_string();
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let targets = schema::targets_for_archive_stem(stem);
    if targets.is_empty() {
        warn!(file = %filename, "no target table matches archive stem, skipping");
        return Ok(());
    }

    // The target whose column list matches the raw row layout; derived
    // targets (narrower than the source row) are resolved separately.
    let primary = targets.iter().max_by_key(|t| t.columns.len()).copied().unwrap();
    let derived: Vec<_> = targets.iter().filter(|t| t.name != primary.name).copied().collect();

    let cnae_sec_indices = derived.iter().find(|t| t.name == "estabelecimento_cnae_sec").map(|_| {
        let cols = primary.column_names();
        (
            index_of(&cols, "cnpj_basico"),
            index_of(&cols, "cnpj_ordem"),
            index_of(&cols, "cnpj_dv"),
            index_of(&cols, "cod_cnae_secundario"),
        )
    });

    let file = std::fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file)?;
    if zip.len() == 0 {
        return Ok(());
    }

    let mut buffers: HashMap<&str, Vec<Row>> = HashMap::new();
    buffers.insert(primary.name, Vec::new());
    for t in &derived {
        buffers.insert(t.name, Vec::new());
    }

    for i in 0..zip.len() {
        if cancel.is_cancelled() {
            break;
        }
        let mut member = zip.by_index(i)?;
        let mut raw = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut raw)?;
        drop(member);

        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&raw);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(decoded.as_bytes());

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(file = %filename, error = %e, "row parse error, skipping row");
                    continue;
                }
            };

            if record.len() != primary.columns.len() {
                continue;
            }

            let row: Row = record.iter().map(|f| Some(f.to_string())).collect();

            if let Some((bi, oi, di, ci)) = cnae_sec_indices {
                if let Some(buf) = buffers.get_mut("estabelecimento_cnae_sec") {
                    if let Some(raw_cnaes) = row.get(ci).and_then(|v| v.as_deref()) {
                        for code in raw_cnaes.split(',') {
                            let code = code.trim();
                            if code.is_empty() {
                                continue;
                            }
                            buf.push(vec![
                                row[bi].clone(),
                                row[oi].clone(),
                                row[di].clone(),
                                Some(code.to_string()),
                            ]);
                        }
                    }
                }
            }

            buffers.get_mut(primary.name).unwrap().push(row);

            for table in buffers.keys().copied().collect::<Vec<_>>() {
                let threshold = (batch_size as f64 * ratio.get(table).copied().unwrap_or(1.0)) as usize;
                if buffers[table].len() >= threshold.max(1) {
                    let rows = std::mem::take(buffers.get_mut(table).unwrap());
                    send_batch(tx, table, rows, &filename)?;
                }
            }
        }
    }

    for (table, rows) in buffers {
        if !rows.is_empty() {
            send_batch(tx, table, rows, &filename)?;
        }
    }

    debug!(file = %filename, "archive fully processed");
    Ok(())
}

fn send_batch(tx: &BatchTx, table: &str, rows: Vec<Row>, filename: &str) -> anyhow::Result<()> {
    let mut batch = RowBatch::new(table).with_source(filename);
    batch.rows = rows;
    tx.blocking_send(Message::Batch(batch)).map_err(|_| anyhow::anyhow!("insertion queue closed"))
}

fn index_of(columns: &[&str], name: &str) -> usize {
    columns.iter().position(|c| *c == name).unwrap_or_else(|| panic!("column {name} missing from schema"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_zip(dir: &Path, name: &str, member_name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(member_name, zip::write::FileOptions::default()).unwrap();
        zip.write_all(contents).unwrap();
        zip.finish().unwrap();
        path
    }

    #[tokio::test]
    async fn empty_member_yields_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_zip(dir.path(), "Cnaes.zip", "K0001.K03200Y0.D50712.CNAE", b"");
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        tokio::task::spawn_blocking({
            let tx = tx.clone();
            move || process_archive(&path, &tx, &cancel, 250_000, &HashMap::new())
        })
        .await
        .unwrap()
        .unwrap();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn establishment_row_derives_secondary_cnae_rows() {
        let dir = tempfile::tempdir().unwrap();
        // 30-column estabelecimento row with 3 secondary CNAEs, one blank.
        let mut fields = vec!["12345678", "0001", "99", "1", "NOME FANTASIA", "02", "20210731", "01", "", "",
            "20200101", "6201501", "6201501,6202300, ,6209100", "RUA", "LOGRADOURO", "1", "", "BAIRRO", "00000000",
            "SP", "7107", "11", "99999999", "", "", "", "", "", "", ""];
        // pad/truncate defensively in case schema column count drifts
        fields.truncate(30);
        while fields.len() < 30 {
            fields.push("");
        }
        let row = fields.join(";");
        let path = write_test_zip(dir.path(), "Estabelecimentos0.zip", "K3241.K03200Y0.D50712.ESTABELE", row.as_bytes());

        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        tokio::task::spawn_blocking({
            let tx = tx.clone();
            move || process_archive(&path, &tx, &cancel, 250_000, &HashMap::new())
        })
        .await
        .unwrap()
        .unwrap();
        drop(tx);

        let mut batches = Vec::new();
        while let Some(Message::Batch(b)) = rx.recv().await {
            batches.push(b);
        }

        let cnae_sec = batches.iter().find(|b| b.table == "estabelecimento_cnae_sec").unwrap();
        assert_eq!(cnae_sec.rows.len(), 3);
        let codes: Vec<_> = cnae_sec.rows.iter().map(|r| r[3].clone().unwrap()).collect();
        assert_eq!(codes, vec!["6201501", "6202300", "6209100"]);

        let estab = batches.iter().find(|b| b.table == "estabelecimento").unwrap();
        assert_eq!(estab.rows.len(), 1);
    }
}
