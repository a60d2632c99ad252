use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, info};

use cnpj_core::schema::tables_in_order;
use cnpj_core::{CnpjError, Result};

use crate::ddl;
use crate::repair;
use crate::SchemaBuilder;

/// Builds and repairs a single-file SQLite database.
///
/// Every method opens its own short-lived connection, mirroring the Python
/// original's `_connect`/`_close_connection` pattern rather than holding one
/// connection open across the whole run.
pub struct SqliteSchemaBuilder {
    db_path: PathBuf,
}

impl SqliteSchemaBuilder {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into() }
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;").map_err(db_err)?;
        Ok(conn)
    }
}

fn open(path: &Path) -> Result<Connection> {
    Connection::open(path).map_err(db_err)
}

fn db_err(e: rusqlite::Error) -> CnpjError {
    CnpjError::Database(e.to_string())
}

#[async_trait]
impl SchemaBuilder for SqliteSchemaBuilder {
    async fn initialize_schema(&self) -> Result<()> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            if db_path.exists() {
                std::fs::remove_file(&db_path)?;
            }
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = open(&db_path)?;
            conn.execute_batch("PRAGMA foreign_keys = OFF;").map_err(db_err)?;

            info!("creating tables");
            for table in tables_in_order() {
                let sql = ddl::create_table_sql(table, false, true, true);
                conn.execute_batch(&sql).map_err(db_err)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| CnpjError::Other(anyhow::anyhow!("schema init task panicked: {e}")))?
    }

    async fn patch_data(&self) -> Result<()> {
        let conn = self.connect()?;
        tokio::task::spawn_blocking(move || apply_static_fixes(&conn))
            .await
            .map_err(|e| CnpjError::Other(anyhow::anyhow!("patch_data task panicked: {e}")))?
    }

    async fn enable_foreign_keys(&self) -> Result<()> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            info!("enabling foreign key checks");
            let conn = open(&db_path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
            Ok(())
        })
        .await
        .map_err(|e| CnpjError::Other(anyhow::anyhow!("enable_foreign_keys task panicked: {e}")))?
    }

    async fn create_indexes(&self) -> Result<()> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute_batch("PRAGMA journal_mode=MEMORY; PRAGMA synchronous=OFF; PRAGMA foreign_keys=OFF;")
                .map_err(db_err)?;

            for table in tables_in_order() {
                for index in table.indexes {
                    debug!(table = table.name, index = index.name, "creating index");
                    let sql = ddl::create_index_sql(table.name, index);
                    conn.execute_batch(&sql).map_err(db_err)?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| CnpjError::Other(anyhow::anyhow!("create_indexes task panicked: {e}")))?
    }
}

/// Ports `utils/db_patch.py::apply_static_fixes`'s SQLite branch verbatim:
/// fill the reference-table gaps, dedupe `empresa`, normalize `cod_pais`,
/// drop the known-broken `simples` rows. Every statement is idempotent, so
/// re-running `patch_data` on an already-patched database is a no-op.
fn apply_static_fixes(conn: &Connection) -> Result<()> {
    info!("applying data repairs");

    for (code, name) in repair::MISSING_QUALIFICACOES {
        conn.execute(
            "INSERT OR IGNORE INTO qualificacao_socio (cod_qualificacao, nome_qualificacao) VALUES (?1, ?2)",
            rusqlite::params![code, name],
        )
        .map_err(db_err)?;
    }
    for (code, name) in repair::MISSING_MOTIVOS {
        conn.execute(
            "INSERT OR IGNORE INTO motivo (cod_motivo, nome_motivo) VALUES (?1, ?2)",
            rusqlite::params![code, name],
        )
        .map_err(db_err)?;
    }
    for (code, name) in repair::MISSING_PAISES {
        conn.execute(
            "INSERT OR IGNORE INTO pais (cod_pais, nome_pais) VALUES (?1, ?2)",
            rusqlite::params![code, name],
        )
        .map_err(db_err)?;
    }

    conn.execute_batch(
        "DELETE FROM empresa WHERE rowid IN (
            SELECT rowid FROM (
                SELECT rowid,
                       ROW_NUMBER() OVER (
                           PARTITION BY cnpj_basico
                           ORDER BY CASE WHEN razao_social IS NOT NULL AND TRIM(razao_social) <> '' THEN 0 ELSE 1 END, rowid
                       ) AS rn
                FROM empresa
            ) t
            WHERE t.rn > 1
        );",
    )
    .map_err(db_err)?;

    conn.execute_batch(
        "UPDATE estabelecimento SET cod_pais = NULL WHERE cod_pais = '0';
         UPDATE empresa SET cod_porte = '00' WHERE cod_porte = '';
         UPDATE estabelecimento
            SET cod_pais = substr('000' || cod_pais, -3)
          WHERE cod_pais IS NOT NULL AND LENGTH(TRIM(cod_pais)) = 2;",
    )
    .map_err(db_err)?;

    let placeholders = repair::BROKEN_SIMPLES_CNPJ_BASICO.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("DELETE FROM simples WHERE cnpj_basico IN ({placeholders})");
    let params: Vec<&dyn rusqlite::ToSql> =
        repair::BROKEN_SIMPLES_CNPJ_BASICO.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    conn.execute(&sql, params.as_slice()).map_err(db_err)?;

    info!("data repairs applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_schema_creates_every_catalog_table() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cnpj.db");
        let builder = SqliteSchemaBuilder::new(&db_path);
        builder.initialize_schema().await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, tables_in_order().len());
    }

    #[tokio::test]
    async fn patch_data_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cnpj.db");
        let builder = SqliteSchemaBuilder::new(&db_path);
        builder.initialize_schema().await.unwrap();
        builder.patch_data().await.unwrap();
        builder.patch_data().await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pais WHERE cod_pais = '008'", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn create_indexes_runs_after_schema_init() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cnpj.db");
        let builder = SqliteSchemaBuilder::new(&db_path);
        builder.initialize_schema().await.unwrap();
        builder.create_indexes().await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_empresa_cnpj'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
