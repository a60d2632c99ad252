//! Schema creation, the post-load repair phase, and the two loader worker
//! implementations (`sqlite`, `postgres`) that drain the insertion queue.

pub mod ddl;
pub mod postgres;
pub mod repair;
pub mod sqlite;

use async_trait::async_trait;
use cnpj_core::Result;

/// Implemented once per backend; drives schema lifecycle around a load run.
///
/// Call order for a full run: `initialize_schema` -> (producer/loader phase,
/// outside this trait) -> `patch_data` -> `enable_foreign_keys` ->
/// `create_indexes`.
#[async_trait]
pub trait SchemaBuilder: Send + Sync {
    /// Creates the database if absent, drops any existing tables in the
    /// target schema, then creates every table from the catalog.
    async fn initialize_schema(&self) -> Result<()>;

    /// Applies the fixed sequence of referential-integrity repairs, then
    /// (backend-dependently) adds the deferred primary keys on the large
    /// fact tables.
    async fn patch_data(&self) -> Result<()>;

    /// Establishes foreign keys from the catalog (Postgres: `ALTER TABLE
    /// ADD CONSTRAINT`; SQLite: flips `PRAGMA foreign_keys = ON`, since its
    /// FK clauses are necessarily declared inline at table creation).
    async fn enable_foreign_keys(&self) -> Result<()>;

    /// Builds every index in the catalog.
    async fn create_indexes(&self) -> Result<()>;
}
