//! A single resumable file download. Grounded on `CNPJDownloadTask` in
//! `cnpj_downloader.py`.

use futures::StreamExt;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use cnpj_core::{CnpjError, Result};

/// Downloads one remote file to `dest`, resuming from a `.part` sidecar if
/// present and `clean` is false.
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    pub chunk_size: usize,
    pub chunk_timeout: Duration,
    pub max_retries: u32,
    pub user_agents: Vec<String>,
    pub clean: bool,
}

impl DownloadTask {
    /// Runs the download to completion, retrying transient failures up to
    /// `max_retries` times. Returns the final file path.
    pub async fn run(&self, http: &reqwest::Client) -> Result<PathBuf> {
        let part_path = part_path(&self.dest);

        if let Some(parent) = self.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if self.clean {
            let _ = tokio::fs::remove_file(&part_path).await;
            let _ = tokio::fs::remove_file(&self.dest).await;
        }

        if tokio::fs::try_exists(&self.dest).await.unwrap_or(false) {
            return Ok(self.dest.clone());
        }

        let filename = self.dest.file_name().and_then(|n| n.to_str()).unwrap_or("?").to_string();

        for attempt in 1..=self.max_retries {
            match self.try_once(http, &part_path).await {
                Ok(Some(())) => return Ok(self.dest.clone()),
                Ok(None) => continue, // 416: .part reset, retry immediately
                Err(e) => {
                    warn!(filename, attempt, max_retries = self.max_retries, error = %e, "download attempt failed");
                    if attempt == self.max_retries {
                        return Err(CnpjError::Other(anyhow::anyhow!(
                            "{filename} download aborted after {} attempts",
                            self.max_retries
                        )));
                    }
                }
            }
        }

        Err(CnpjError::Other(anyhow::anyhow!("{filename} download aborted after {} attempts", self.max_retries)))
    }

    /// One attempt. `Ok(Some(()))` = complete, `Ok(None)` = 416 handled,
    /// caller should retry without counting it as a failed attempt beyond
    /// bookkeeping already done by the caller's loop.
    async fn try_once(&self, http: &reqwest::Client, part_path: &Path) -> anyhow::Result<Option<()>> {
        let existing_size = tokio::fs::metadata(part_path).await.map(|m| m.len()).unwrap_or(0);

        let user_agent = self
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| "cnpj-ingest/0.1".to_string());

        let mut req = http.get(&self.url).header(reqwest::header::USER_AGENT, user_agent);
        if existing_size > 0 {
            req = req.header(reqwest::header::RANGE, format!("bytes={existing_size}-"));
        }

        let resp = req.send().await?;

        if resp.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            let _ = tokio::fs::remove_file(part_path).await;
            return Ok(None);
        }

        let resp = resp.error_for_status()?;

        let total = total_size(&resp, existing_size);

        if existing_size >= total && total > 0 {
            tokio::fs::rename(part_path, &self.dest).await?;
            return Ok(Some(()));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(part_path)
            .await?;

        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.chunk_timeout, stream.next()).await;
            let chunk = match next {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => break,
                Err(_) => anyhow::bail!("chunk read timed out after {:?}", self.chunk_timeout),
            };
            for piece in chunk.chunks(self.chunk_size.max(1)) {
                file.write_all(piece).await?;
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(part_path, &self.dest).await?;
        info!(url = %self.url, total, "download complete");
        Ok(Some(()))
    }
}

fn total_size(resp: &reqwest::Response, existing_size: u64) -> u64 {
    if let Some(range) = resp.headers().get(reqwest::header::CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
        if let Some(total_str) = range.rsplit('/').next() {
            if let Ok(total) = total_str.parse() {
                return total;
            }
        }
    }
    resp.headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + existing_size
}

fn part_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_os_string();
    s.push(".part");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(part_path(Path::new("a/b/Empresas0.zip")), PathBuf::from("a/b/Empresas0.zip.part"));
    }
}
