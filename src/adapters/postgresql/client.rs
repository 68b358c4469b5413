//! PostgreSQL client implementation
//!
//! Owns the connection pool and hands out transactional connections.

use crate::adapters::postgresql::errors::{map_pg_error, map_pool_error};
use crate::adapters::postgresql::transaction::PgTransaction;
use crate::config::schema::PostgreSQLConfig;
use crate::domain::{Result, WarehouseError};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_native_tls::MakeTlsConnector;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;

/// Embedded schema, applied by [`PostgreSQLClient::ensure_schema`]
const SCHEMA_SQL: &str = include_str!("../../../migrations/001_initial_schema.sql");

/// PostgreSQL client for the warehouse
///
/// Connections are pooled with deadpool. TLS is negotiated through
/// native-tls unless `ssl_mode` is `disable`.
pub struct PostgreSQLClient {
    /// Connection pool
    pool: Pool,

    /// Configuration
    config: PostgreSQLConfig,
}

impl PostgreSQLClient {
    /// Create a new PostgreSQL client
    ///
    /// The pool connects lazily; no connection is opened here.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the connection string or TLS setup is invalid.
    pub async fn new(config: PostgreSQLConfig) -> Result<Self> {
        let mut pg_config: tokio_postgres::Config = config
            .connection_string
            .expose_secret()
            .parse()
            .map_err(|e| {
                WarehouseError::Configuration(format!(
                    "Invalid PostgreSQL connection string: {e}"
                ))
            })?;
        pg_config.ssl_mode(ssl_mode_for(&config.ssl_mode));

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = if config.ssl_mode == "disable" {
            Manager::from_config(pg_config, NoTls, manager_config)
        } else {
            Manager::from_config(pg_config, build_tls(&config.ssl_mode)?, manager_config)
        };

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .build()
            .map_err(|e| {
                WarehouseError::Configuration(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self { pool, config })
    }

    /// Test the connection to PostgreSQL
    ///
    /// # Errors
    ///
    /// Returns a `Systemic` error if no connection can be established.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| map_pg_error(&e, "Connection test failed"))?;

        tracing::info!(
            target = %self.connection_string_safe(),
            "PostgreSQL connection test successful"
        );
        Ok(())
    }

    /// Apply the embedded schema
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| map_pg_error(&e, "Failed to execute migration"))?;

        tracing::info!("PostgreSQL schema initialized successfully");
        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// # Errors
    ///
    /// Returns a `Systemic` error if a connection cannot be obtained.
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| map_pool_error(&e))
    }

    /// Start a unit of work on a pooled connection
    ///
    /// # Errors
    ///
    /// Returns an error if no connection is available or `BEGIN` fails.
    pub async fn begin(&self) -> Result<PgTransaction> {
        let conn = self.get_connection().await?;
        PgTransaction::begin(conn, self.statement_timeout_ms()).await
    }

    /// Statement timeout applied to every unit of work
    pub fn statement_timeout_ms(&self) -> u64 {
        self.config.statement_timeout_seconds * 1000
    }

    /// Get the connection string (without credentials)
    pub fn connection_string_safe(&self) -> String {
        self.config
            .connection_string
            .expose_secret()
            .split('@')
            .last()
            .map(|s| format!("postgresql://***@{}", s))
            .unwrap_or_else(|| "postgresql://***".to_string())
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

fn ssl_mode_for(mode: &str) -> SslMode {
    match mode {
        "disable" => SslMode::Disable,
        "allow" | "prefer" => SslMode::Prefer,
        _ => SslMode::Require,
    }
}

fn build_tls(mode: &str) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    match mode {
        "verify-full" => {}
        "verify-ca" => {
            builder.danger_accept_invalid_hostnames(true);
        }
        // allow / prefer / require encrypt without verifying the peer
        _ => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
    }
    let connector = builder
        .build()
        .map_err(|e| WarehouseError::Configuration(format!("Failed to build TLS connector: {e}")))?;
    Ok(MakeTlsConnector::new(connector))
}
