use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info};

use cnpj_core::schema::tables_in_order;
use cnpj_core::{CnpjError, PostgresConfig, Result};

use crate::ddl;
use crate::repair;
use crate::SchemaBuilder;

/// Builds and repairs a Postgres database.
///
/// Grounded on `db/postgres_builder.py`: one short-lived connection per
/// phase, `ENCODING 'WIN1252'` at database-creation time, `UNLOGGED` tables
/// during the bulk load, and composite primary keys/foreign keys added
/// afterward via `ALTER TABLE` (tolerating "already exists" errors so every
/// phase is idempotent).
pub struct PostgresSchemaBuilder {
    config: PostgresConfig,
}

impl PostgresSchemaBuilder {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    async fn connect_to(&self, database: &str) -> Result<Client> {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.config.host)
            .port(self.config.port)
            .dbname(database)
            .user(&self.config.user)
            .password(&self.config.password);

        let (client, connection) = cfg.connect(NoTls).await.map_err(pg_err)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection task ended with error");
            }
        });
        client.batch_execute("SET client_encoding = 'WIN1252'").await.map_err(pg_err)?;
        Ok(client)
    }
}

fn pg_err(e: tokio_postgres::Error) -> CnpjError {
    CnpjError::Database(e.to_string())
}

#[async_trait]
impl SchemaBuilder for PostgresSchemaBuilder {
    async fn initialize_schema(&self) -> Result<()> {
        let maintenance = self.connect_to("postgres").await?;
        let exists = maintenance
            .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&self.config.database])
            .await
            .map_err(pg_err)?;
        if exists.is_none() {
            info!(database = %self.config.database, "creating database");
            let sql = format!("CREATE DATABASE \"{}\" ENCODING 'WIN1252' TEMPLATE template0", self.config.database);
            maintenance.batch_execute(&sql).await.map_err(pg_err)?;
        }

        let client = self.connect_to(&self.config.database).await?;

        info!("dropping any existing tables");
        let rows = client
            .query("SELECT tablename FROM pg_tables WHERE schemaname = 'public'", &[])
            .await
            .map_err(pg_err)?;
        for row in rows {
            let table_name: String = row.get(0);
            client.batch_execute(&ddl::drop_table_sql(&table_name)).await.map_err(pg_err)?;
        }

        info!("creating tables");
        for table in tables_in_order() {
            let sql = ddl::create_table_sql(table, true, false, false);
            client.batch_execute(&sql).await.map_err(pg_err)?;
        }
        Ok(())
    }

    async fn patch_data(&self) -> Result<()> {
        let client = self.connect_to(&self.config.database).await?;
        apply_static_fixes(&client).await?;
        add_primary_keys(&client).await
    }

    async fn enable_foreign_keys(&self) -> Result<()> {
        let client = self.connect_to(&self.config.database).await?;
        info!("adding foreign key constraints");
        for table in tables_in_order() {
            for (i, fk) in table.foreign_keys.iter().enumerate() {
                let (constraint_name, sql) = ddl::add_foreign_key_sql(table.name, fk, i + 1);
                match client.batch_execute(&sql).await {
                    Ok(()) => debug!(constraint = %constraint_name, "foreign key added"),
                    Err(e) if e.code() == Some(&SqlState::DUPLICATE_OBJECT) => {
                        debug!(constraint = %constraint_name, "foreign key already exists, skipping");
                    }
                    Err(e) => return Err(pg_err(e)),
                }
            }
        }
        Ok(())
    }

    async fn create_indexes(&self) -> Result<()> {
        let client = self.connect_to(&self.config.database).await?;
        info!("creating indexes");
        for table in tables_in_order() {
            for index in table.indexes {
                let sql = ddl::create_index_sql(table.name, index);
                client.batch_execute(&sql).await.map_err(pg_err)?;
            }
        }
        Ok(())
    }
}

/// Adds the composite primary keys deferred from `CREATE TABLE`, tolerating
/// "already has a primary key"/"relation already exists" so a repeated
/// `patch_data` call is a no-op, per `_add_primary_keys`.
async fn add_primary_keys(client: &Client) -> Result<()> {
    info!("adding deferred primary keys");
    for table in tables_in_order() {
        if !ddl::needs_deferred_pk(table) {
            continue;
        }
        let sql = ddl::add_primary_key_sql(table.name, table.primary_key);
        match client.batch_execute(&sql).await {
            Ok(()) => debug!(table = table.name, "primary key added"),
            Err(e)
                if e.code() == Some(&SqlState::INVALID_TABLE_DEFINITION)
                    || e.code() == Some(&SqlState::DUPLICATE_TABLE) =>
            {
                debug!(table = table.name, "primary key already present, skipping");
            }
            Err(e) => return Err(pg_err(e)),
        }
    }
    Ok(())
}

/// Ports `utils/db_patch.py::apply_static_fixes`'s Postgres branch: fills
/// reference-table gaps, dedupes `empresa` by `ctid`, normalizes `cod_pais`
/// with `LPAD`, drops the known-broken `simples` rows.
async fn apply_static_fixes(client: &Client) -> Result<()> {
    info!("applying data repairs");

    for (code, name) in repair::MISSING_QUALIFICACOES.iter().copied() {
        client
            .execute(
                "INSERT INTO qualificacao_socio (cod_qualificacao, nome_qualificacao) VALUES ($1, $2) \
                 ON CONFLICT (cod_qualificacao) DO NOTHING",
                &[&code, &name],
            )
            .await
            .map_err(pg_err)?;
    }
    for (code, name) in repair::MISSING_MOTIVOS.iter().copied() {
        client
            .execute(
                "INSERT INTO motivo (cod_motivo, nome_motivo) VALUES ($1, $2) \
                 ON CONFLICT (cod_motivo) DO NOTHING",
                &[&code, &name],
            )
            .await
            .map_err(pg_err)?;
    }
    for (code, name) in repair::MISSING_PAISES.iter().copied() {
        client
            .execute(
                "INSERT INTO pais (cod_pais, nome_pais) VALUES ($1, $2) ON CONFLICT (cod_pais) DO NOTHING",
                &[&code, &name],
            )
            .await
            .map_err(pg_err)?;
    }

    client
        .batch_execute(
            "DELETE FROM empresa WHERE ctid IN (
                SELECT ctid FROM (
                    SELECT ctid,
                           ROW_NUMBER() OVER (
                               PARTITION BY cnpj_basico
                               ORDER BY CASE WHEN razao_social IS NOT NULL AND TRIM(razao_social) <> '' THEN 0 ELSE 1 END, ctid
                           ) AS rn
                    FROM empresa
                ) t
                WHERE t.rn > 1
            );",
        )
        .await
        .map_err(pg_err)?;

    client
        .batch_execute(
            "UPDATE estabelecimento SET cod_pais = NULL WHERE cod_pais = '0';
             UPDATE empresa SET cod_porte = '00' WHERE cod_porte = '';
             UPDATE estabelecimento
                SET cod_pais = LPAD(cod_pais, 3, '0')
              WHERE cod_pais IS NOT NULL AND LENGTH(TRIM(cod_pais)) = 2;",
        )
        .await
        .map_err(pg_err)?;

    let placeholders =
        (1..=repair::BROKEN_SIMPLES_CNPJ_BASICO.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(",");
    let sql = format!("DELETE FROM simples WHERE cnpj_basico IN ({placeholders})");
    let params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
        repair::BROKEN_SIMPLES_CNPJ_BASICO.iter().map(|v| v as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
    client.execute(&sql, params.as_slice()).await.map_err(pg_err)?;

    info!("data repairs applied");
    Ok(())
}
