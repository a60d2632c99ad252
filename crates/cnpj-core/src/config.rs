//! Single constants module for the whole pipeline.
//!
//! Defaults mirror the original Python project's `config.py`. Every field
//! can be overridden by an environment variable of the same name (loaded
//! via `dotenvy` in `cnpj-cli`'s `main`); CLI flags take precedence over
//! both when a command exposes the equivalent option.

use std::collections::HashMap;
use std::path::PathBuf;

/// Database backend selection.
#[derive(Debug, Clone, Copy)]
pub enum Engine {
    Sqlite,
    Postgres,
}

impl std::str::FromStr for Engine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Engine::Sqlite),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            other => anyhow::bail!("unsupported engine: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "dados_cnpj".to_string(),
            user: "cnpj".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Links
    pub cnpj_data_url: String,

    // Directories
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    pub sqlite_db_path: PathBuf,

    // Downloads
    pub download_chunk_size: usize,
    pub download_chunk_timeout_secs: u64,
    pub download_max_retries: u32,
    pub download_max_concurrents: usize,
    pub browser_agents: Vec<String>,

    // Database and batching
    pub default_engine: Engine,
    pub batch_size: usize,
    pub batch_ratio: HashMap<String, f64>,
    pub worker_threads: usize,
    pub queue_size: usize,
    pub debug_log: bool,
    pub low_memory: bool,
    pub default_parallel: bool,

    pub postgres: PostgresConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        let download_dir = data_dir.join("downloads");
        let sqlite_db_path = data_dir.join("dados_cnpj.db");

        let mut batch_ratio = HashMap::new();
        // Establishments are the widest rows; cap their batch at 0.4x to
        // bound peak memory use relative to the narrower tables.
        batch_ratio.insert("estabelecimento".to_string(), 0.4);
        batch_ratio.insert("estabelecimento_cnae_sec".to_string(), 0.4);

        Self {
            cnpj_data_url: "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj/"
                .to_string(),
            data_dir,
            download_dir,
            sqlite_db_path,
            download_chunk_size: 8 * 1024,
            download_chunk_timeout_secs: 60,
            download_max_retries: 100,
            download_max_concurrents: 10,
            browser_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/91.0.4472.124 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 Version/15.1 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/103.0.0.0 Safari/537.36".to_string(),
            ],
            default_engine: Engine::Sqlite,
            batch_size: 250_000,
            batch_ratio,
            worker_threads: num_cpus_minus_one(),
            queue_size: 0, // derived below once worker_threads is known
            debug_log: false,
            low_memory: false,
            default_parallel: false,
            postgres: PostgresConfig::default(),
        }
        .with_derived_queue_size()
    }
}

fn num_cpus_minus_one() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

impl Config {
    fn with_derived_queue_size(mut self) -> Self {
        // max(2, workers*2) - 5, floor 2: modest backpressure on the
        // shared insertion queue.
        self.queue_size = (self.worker_threads * 2).max(2).saturating_sub(5).max(2);
        self
    }

    /// Ratio of `batch_size` used for a given target table, default 1.0.
    pub fn batch_ratio_for(&self, table: &str) -> f64 {
        *self.batch_ratio.get(table).unwrap_or(&1.0)
    }

    /// Load defaults, then apply environment overrides.
    ///
    /// Intended to run after `dotenvy::dotenv().ok()` has populated
    /// `std::env` from a local `.env` file, if present.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CNPJ_DATA_URL") {
            cfg.cnpj_data_url = v;
        }
        if let Ok(v) = std::env::var("DOWNLOAD_DIR") {
            cfg.download_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SQLITE_DB_PATH") {
            cfg.sqlite_db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DOWNLOAD_MAX_CONCURRENTS") {
            if let Ok(n) = v.parse() {
                cfg.download_max_concurrents = n;
            }
        }
        if let Ok(v) = std::env::var("WORKER_THREADS") {
            if let Ok(n) = v.parse() {
                cfg.worker_threads = n;
            }
        }
        if let Ok(v) = std::env::var("DEBUG_LOG") {
            cfg.debug_log = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(v) = std::env::var("PGHOST") {
            cfg.postgres.host = v;
        }
        if let Ok(v) = std::env::var("PGPORT") {
            if let Ok(n) = v.parse() {
                cfg.postgres.port = n;
            }
        }
        if let Ok(v) = std::env::var("PGDATABASE") {
            cfg.postgres.database = v;
        }
        if let Ok(v) = std::env::var("PGUSER") {
            cfg.postgres.user = v;
        }
        if let Ok(v) = std::env::var("PGPASSWORD") {
            cfg.postgres.password = v;
        }

        cfg.with_derived_queue_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_size_is_derived_from_workers() {
        let cfg = Config::default();
        assert_eq!(
            cfg.queue_size,
            (cfg.worker_threads * 2).max(2).saturating_sub(5).max(2)
        );
    }

    #[test]
    fn batch_ratio_defaults_to_one() {
        let cfg = Config::default();
        assert_eq!(cfg.batch_ratio_for("empresa"), 1.0);
        assert_eq!(cfg.batch_ratio_for("estabelecimento"), 0.4);
    }

    #[test]
    fn engine_parses_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(Engine::from_str("SQLite").unwrap(), Engine::Sqlite);
        assert_eq!(Engine::from_str("postgresql").unwrap(), Engine::Postgres);
        assert!(Engine::from_str("oracle").is_err());
    }
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Engine::Sqlite, Engine::Sqlite) | (Engine::Postgres, Engine::Postgres)
        )
    }
}
impl Eq for Engine {}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Engine::Sqlite => "sqlite",
            Engine::Postgres => "postgres",
        })
    }
}
