//! Scrapes the publisher's directory listing for available months and
//! per-file metadata. Grounded on `cnpj_public_data.py`'s `CNPJDataScraper`.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use tracing::debug;

use cnpj_core::{CnpjError, Result};

static MONTH_DIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}/$").unwrap());
static PERIOD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2})/(\d{4})$").unwrap());
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// URL and declared size for a single remote archive.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub month: String,
    pub filename: String,
    pub url: String,
    pub size: u64,
}

/// Talks to the publisher's HTTP directory listing.
pub struct CnpjDataClient {
    base_url: String,
    http: reqwest::Client,
}

impl CnpjDataClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }

    /// `MM/YYYY` -> `YYYY-MM` folder name, descending by month.
    pub async fn list_available_months(&self) -> Result<BTreeMap<String, String>> {
        let body = self
            .http
            .get(&self.base_url)
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?
            .text()
            .await
            .map_err(anyhow::Error::from)?;

        let doc = Html::parse_document(&body);
        let mut months: Vec<(String, String)> = Vec::new();
        for el in doc.select(&ANCHOR_SELECTOR) {
            let Some(href) = el.value().attr("href") else { continue };
            if !MONTH_DIR_RE.is_match(href) {
                continue;
            }
            let folder = href.trim_end_matches('/').to_string();
            let Some((year, month)) = folder.split_once('-') else { continue };
            months.push((format!("{month}/{year}"), folder));
        }

        if months.is_empty() {
            return Err(CnpjError::MonthUnavailable(self.base_url.clone()));
        }

        // `BTreeMap` sorts by the `MM/YYYY` string lexically, which is not
        // calendar order; callers needing descending order (`latest_month`)
        // re-derive it from `parse_period` rather than map iteration.
        Ok(months.into_iter().collect())
    }

    /// The most recent `MM/YYYY` period, i.e. the first entry once sorted
    /// descending by (year, month).
    pub async fn latest_month(&self) -> Result<String> {
        let months = self.list_available_months().await?;
        months
            .into_iter()
            .max_by_key(|(period, _)| parse_period(period))
            .map(|(period, _)| period)
            .ok_or_else(|| CnpjError::MonthUnavailable(self.base_url.clone()))
    }

    /// Every available `MM/YYYY` period, sorted descending (newest first),
    /// unlike [`Self::list_available_months`]'s map iteration which sorts
    /// lexically by the `MM/YYYY` string.
    pub async fn list_available_months_sorted(&self) -> Result<Vec<String>> {
        let months = self.list_available_months().await?;
        let mut periods: Vec<String> = months.into_keys().collect();
        periods.sort_by_key(|p| std::cmp::Reverse(parse_period(p)));
        Ok(periods)
    }

    /// `relative_path` (`YYYY-MM/filename.zip`) -> metadata, sorted by
    /// filename, one HEAD request per file to learn `Content-Length`.
    pub async fn month_metadata(&self, period: &str) -> Result<BTreeMap<String, FileMetadata>> {
        if !PERIOD_RE.is_match(period) {
            return Err(CnpjError::InvalidPeriod(period.to_string()));
        }

        let months = self.list_available_months().await?;
        let folder = months
            .get(period)
            .ok_or_else(|| CnpjError::MonthUnavailable(period.to_string()))?
            .clone();

        let folder_url = format!("{}{}/", self.base_url, folder);
        let body = self
            .http
            .get(&folder_url)
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?
            .text()
            .await
            .map_err(anyhow::Error::from)?;

        let doc = Html::parse_document(&body);
        let mut hrefs: Vec<String> = doc
            .select(&ANCHOR_SELECTOR)
            .filter_map(|el| el.value().attr("href").map(str::to_string))
            .filter(|href| href.to_ascii_lowercase().ends_with(".zip"))
            .collect();
        hrefs.sort();

        let mut result = BTreeMap::new();
        for href in hrefs {
            let filename = href.rsplit('/').next().unwrap_or(&href).to_string();
            let file_url = format!("{folder_url}{href}");
            let key = format!("{folder}/{filename}");

            let head = self
                .http
                .head(&file_url)
                .send()
                .await
                .map_err(anyhow::Error::from)?
                .error_for_status()
                .map_err(anyhow::Error::from)?;
            let size = head
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            debug!(filename, size, "resolved archive metadata");
            result.insert(key, FileMetadata { month: period.to_string(), filename, url: file_url, size });
        }

        Ok(result)
    }
}

/// Sortable `(year, month)` key so `"01/2024"` compares correctly against
/// `"12/2023"` (lexical string order would get this wrong).
fn parse_period(period: &str) -> (u32, u32) {
    let Some(caps) = PERIOD_RE.captures(period) else { return (0, 0) };
    let month: u32 = caps[1].parse().unwrap_or(0);
    let year: u32 = caps[2].parse().unwrap_or(0);
    (year, month)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_for_ordering() {
        assert_eq!(parse_period("01/2024"), (2024, 1));
        assert_eq!(parse_period("12/2023"), (2023, 12));
        assert!(parse_period("01/2024") > parse_period("12/2023"));
    }

    #[test]
    fn month_dir_regex_matches_only_yyyy_mm_folders() {
        assert!(MONTH_DIR_RE.is_match("2024-05/"));
        assert!(!MONTH_DIR_RE.is_match("2024-5/"));
        assert!(!MONTH_DIR_RE.is_match("readme.txt"));
    }
}
