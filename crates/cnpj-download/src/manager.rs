//! Drives a bounded pool of [`DownloadTask`]s for a month's archives.
//! Grounded on `CNPJDownloadManager.start_download_queue`.

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info};

use cnpj_core::{CnpjError, Config, Result};

use crate::client::CnpjDataClient;
use crate::progress_slots::ProgressSlots;
use crate::task::DownloadTask;

pub struct DownloadManager<'a> {
    client: CnpjDataClient,
    config: &'a Config,
}

/// Outcome of comparing the local archive set against the remote one.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub size_mismatch: Vec<(String, u64, u64)>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.size_mismatch.is_empty()
    }
}

impl<'a> DownloadManager<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { client: CnpjDataClient::new(&config.cnpj_data_url), config }
    }

    /// Downloads every archive for `period` (`MM/YYYY`) into `dir`, at most
    /// `workers` concurrently, resuming `.part` files unless `clean`.
    pub async fn download_all(&self, period: &str, dir: &Path, workers: usize, clean: bool) -> Result<usize> {
        let metadata = self.client.month_metadata(period).await?;
        let count = metadata.len();
        info!(period, count, "resolved archive list");

        let http = reqwest::Client::new();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let slots = Arc::new(ProgressSlots::new(workers.max(1) as u32));

        let remaining = ProgressBar::new(count as u64);
        remaining.set_style(
            ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {pos}/{len} files")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        remaining.set_message(format!("downloading {period}"));

        let mut set = tokio::task::JoinSet::new();
        for (rel_path, meta) in metadata {
            let dest = dir.join(&rel_path);
            let task = DownloadTask {
                url: meta.url,
                dest,
                chunk_size: self.config.download_chunk_size,
                chunk_timeout: Duration::from_secs(self.config.download_chunk_timeout_secs),
                max_retries: self.config.download_max_retries,
                user_agents: self.config.browser_agents.clone(),
                clean,
            };
            let http = http.clone();
            let semaphore = semaphore.clone();
            let slots = slots.clone();
            let remaining = remaining.clone();
            let filename = meta.filename.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let _slot = slots.acquire().await;
                let result = task.run(&http).await;
                match &result {
                    Ok(_) => remaining.inc(1),
                    Err(e) => error!(filename, error = %e, "download failed"),
                }
                result
            });
        }

        let mut failures = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => failures += 1,
                Err(join_err) => {
                    error!(error = %join_err, "download task panicked");
                    failures += 1;
                }
            }
        }
        remaining.finish_with_message(format!("{period} download complete"));

        if failures > 0 {
            return Err(CnpjError::Other(anyhow::anyhow!("{failures} of {count} archives failed to download")));
        }

        Ok(count)
    }

    /// Compares the local `.zip` set in `dir` against the remote set for
    /// `period`; true only on an exact filename+size match.
    pub async fn validate(&self, period: &str, dir: &Path) -> Result<ValidationReport> {
        let remote = self.client.month_metadata(period).await?;
        let local = local_zip_sizes(dir)?;

        let mut report = ValidationReport::default();
        let remote_names: BTreeMap<String, u64> = remote
            .values()
            .map(|m| (m.filename.clone(), m.size))
            .collect();

        for (name, size) in &remote_names {
            match local.get(name) {
                None => report.missing.push(name.clone()),
                Some(local_size) if local_size != size => {
                    report.size_mismatch.push((name.clone(), *local_size, *size))
                }
                Some(_) => {}
            }
        }
        for name in local.keys() {
            if !remote_names.contains_key(name) {
                report.extra.push(name.clone());
            }
        }

        Ok(report)
    }

    pub fn client(&self) -> &CnpjDataClient {
        &self.client
    }
}

fn local_zip_sizes(dir: &Path) -> Result<BTreeMap<String, u64>> {
    let mut out = BTreeMap::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in walk_zip_files(dir)? {
        let name = entry.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        let size = std::fs::metadata(&entry).map(|m| m.len()).unwrap_or(0);
        out.insert(name, size);
    }
    Ok(out)
}

fn walk_zip_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_zip_files(&path)?);
        } else if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("zip")).unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_report_is_ok_only_when_all_sets_empty() {
        let mut report = ValidationReport::default();
        assert!(report.is_ok());
        report.missing.push("Empresas0.zip".to_string());
        assert!(!report.is_ok());
    }

    #[test]
    fn local_zip_sizes_reads_real_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Empresas0.zip"), b"1234").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let sizes = local_zip_sizes(dir.path()).unwrap();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes["Empresas0.zip"], 4);
    }
}
