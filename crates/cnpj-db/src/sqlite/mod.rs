//! SQLite backend: single-connection schema builder and loader.
//!
//! Grounded on `db/sqlite_builder.py` and `db/sqlite_loader.py`
//! (`src/rfb_cnpj_etl/db/sqlite_loader.py` variant). SQLite has no `ALTER
//! TABLE ADD CONSTRAINT`, so both the primary key and every foreign key for
//! a table are declared inline at `CREATE TABLE` time; `patch_data` only
//! repairs reference-table gaps and deduplicates `empresa`, it never alters
//! the schema.

mod builder;
mod loader;

pub use builder::SqliteSchemaBuilder;
pub use loader::SqliteLoader;
