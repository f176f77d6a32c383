//! Connection pool lifecycle for the relational store.

use std::time::Duration;

use concord_core::{CoordinationError, CoordinationResult};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Pool sizing and lifetime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalPoolConfig {
    /// Postgres connection URL.
    pub database_url: String,
    /// Connections kept open while idle.
    pub max_idle_connections: u32,
    /// Upper bound of open connections.
    pub max_open_connections: u32,
    /// Age after which a connection is closed and replaced.
    pub connection_max_lifetime: Duration,
}

impl RelationalPoolConfig {
    /// Creates settings with the default pool limits.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_idle_connections: 10,
            max_open_connections: 100,
            connection_max_lifetime: Duration::from_secs(3600),
        }
    }

    /// Checks the limits against each other.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(CoordinationError::Validation(
                "database url must not be empty".to_owned(),
            ));
        }

        if self.max_open_connections == 0 {
            return Err(CoordinationError::Validation(
                "max open connections must be greater than zero".to_owned(),
            ));
        }

        if self.max_idle_connections > self.max_open_connections {
            return Err(CoordinationError::Validation(format!(
                "max idle connections ({}) must not exceed max open connections ({})",
                self.max_idle_connections, self.max_open_connections
            )));
        }

        Ok(())
    }

    /// Builds the pool options these settings describe.
    #[must_use]
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_open_connections)
            .min_connections(self.max_idle_connections)
            .max_lifetime(self.connection_max_lifetime)
    }
}

/// Opens the pool and verifies one connection.
pub async fn connect_relational_pool(config: &RelationalPoolConfig) -> CoordinationResult<PgPool> {
    config.validate()?;

    let pool = config
        .pool_options()
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| {
            CoordinationError::Connection(format!("failed to connect to database: {error}"))
        })?;

    info!(
        max_open_connections = config.max_open_connections,
        max_idle_connections = config.max_idle_connections,
        connection_max_lifetime_seconds = config.connection_max_lifetime.as_secs(),
        "relational pool ready"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests;
