//! `PostgreSQL` storage for Eventpass.
//!
//! [`PostgresStore`] implements the three storage contracts from `eventpass-core`:
//!
//! - `EventCatalog` and `InventoryLedger` over the `events` table
//! - `BookingStore` over the `bookings` table
//!
//! Every conditional mutation is a single `UPDATE ... WHERE <condition> RETURNING`
//! statement. Under `READ COMMITTED`, Postgres re-checks the `WHERE` clause after
//! acquiring the row lock, so concurrent callers serialize on the row and only
//! those whose condition still holds see a returned row.
//!
//! # Example
//!
//! ```ignore
//! use eventpass_postgres::{PoolSettings, PostgresStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect(&PoolSettings::new("postgres://localhost/eventpass")).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bookings;
mod events;
mod rows;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up the store.
#[derive(Error, Debug)]
pub enum PostgresError {
    /// Could not open the connection pool.
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// Migrations failed.
    #[error("Migration failed: {0}")]
    Migrate(String),
}

/// Connection pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connection string.
    pub url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long to wait for a connection.
    pub connect_timeout: Duration,
}

impl PoolSettings {
    /// Settings with pool defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// `PostgreSQL`-backed event catalog, inventory ledger and booking store.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Connect`] if the database cannot be reached.
    pub async fn connect(settings: &PoolSettings) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(&settings.url)
            .await
            .map_err(|e| PostgresError::Connect(e.to_string()))?;

        tracing::info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Database pool ready"
        );

        Ok(Self::from_pool(pool))
    }

    /// Create or upgrade the `events` and `bookings` tables.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Migrate`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PostgresError::Migrate(e.to_string()))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
