use serde::Deserialize;
use std::str::FromStr;

/// Which [`crate::store::RecordStore`] implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required for the postgres backend.
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    /// Attempts a payment gets to win the loan version race.
    pub ledger_max_attempts: u32,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            port: 3000,
            db_max_connections: 10,
            ledger_max_attempts: 3,
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            max_body_bytes: 1024 * 1024,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T, hint: &str) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be {}", name, hint)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let store_backend = match std::env::var("STORE_BACKEND") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => StoreBackend::Postgres,
        };

        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("DB_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        if store_backend == StoreBackend::Postgres {
            let url = database_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
            })?;
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
            }
        }

        let config = Self {
            store_backend,
            database_url,
            port: parse_var("PORT", 3000, "a valid number between 1-65535")?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10, "a positive integer")?,
            ledger_max_attempts: parse_var("LEDGER_MAX_ATTEMPTS", 3, "a positive integer")?,
            rate_limit_per_second: parse_var("RATE_LIMIT_PER_SECOND", 10, "a positive integer")?,
            rate_limit_burst: parse_var("RATE_LIMIT_BURST", 20, "a positive integer")?,
            max_body_bytes: parse_var("MAX_BODY_BYTES", 1024 * 1024, "a size in bytes")?,
        };
        config.validate()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if let Some(ref url) = config.database_url {
            tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]);
        }
        tracing::debug!("Store backend: {:?}", config.store_backend);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if !(1..=10).contains(&self.ledger_max_attempts) {
            anyhow::bail!("LEDGER_MAX_ATTEMPTS must be between 1 and 10");
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            anyhow::bail!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be at least 1");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("MAX_BODY_BYTES must be at least 1");
        }
        Ok(())
    }
}
