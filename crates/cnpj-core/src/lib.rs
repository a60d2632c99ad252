//! Shared types for the CNPJ ingestion pipeline: the row/batch model,
//! the `Producer`/`Loader` traits that connect archive readers to database
//! loaders, the static table catalog, run configuration, error types, and
//! shared progress reporting.

pub mod batch;
pub mod config;
pub mod error;
pub mod progress;
pub mod schema;

pub use batch::{BatchRx, BatchTx, LoadStats, Loader, Message, Producer, Row, RowBatch};
pub use config::{Config, Engine, PostgresConfig};
pub use error::{CnpjError, Result};
pub use progress::SharedProgress;
pub use schema::{table_by_name, tables_in_order, targets_for_archive_stem, Column, ForeignKey, Index, TableSpec};
