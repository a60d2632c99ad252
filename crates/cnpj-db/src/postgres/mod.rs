//! Postgres backend: database bootstrap, deferred keys, and a pool of
//! `COPY`-based loader workers.
//!
//! Grounded on `db/postgres_builder.py` and `db/postgres_loader.py`.
//! Unlike SQLite, Postgres supports `ALTER TABLE ADD CONSTRAINT`/`ADD
//! PRIMARY KEY`, so both are deferred until after `patch_data` has
//! deduplicated `empresa`.

mod builder;
mod loader;

pub use builder::PostgresSchemaBuilder;
pub use loader::PostgresLoader;
