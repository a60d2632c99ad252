//! Month discovery and resumable concurrent archive download for the CNPJ
//! open dataset.
//!
//! [`client::CnpjDataClient`] scrapes the publisher's directory listing to
//! learn which months and files exist; [`manager::DownloadManager`] drives a
//! bounded pool of download tasks ([`task`]) against that metadata, each
//! resuming from a `.part` sidecar and rotating through a small set of
//! user agents.

pub mod client;
pub mod estimate;
pub mod manager;
pub mod progress_slots;
pub mod task;

pub use client::{CnpjDataClient, FileMetadata};
pub use estimate::estimate_total_rows;
pub use manager::{DownloadManager, ValidationReport};
pub use progress_slots::ProgressSlots;
pub use task::DownloadTask;
