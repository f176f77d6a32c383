use std::env;
use std::time::Duration;

use concord_core::{CoordinationError, CoordinationResult};
use concord_infrastructure::{EtcdStoreConfig, RelationalPoolConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerConfig {
    pub(crate) etcd: EtcdStoreConfig,
    pub(crate) dispatch_prefix: String,
    pub(crate) lock_key: String,
    pub(crate) lock_ttl_seconds: i64,
    pub(crate) waiting_queue_name: String,
    pub(crate) worker_id: String,
    pub(crate) database: Option<RelationalPoolConfig>,
}

impl WorkerConfig {
    pub(crate) fn load() -> CoordinationResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> CoordinationResult<Self> {
        let endpoints: Vec<String> = required_var(&lookup, "ETCD_ENDPOINTS")?
            .split(',')
            .map(|endpoint| endpoint.trim().to_owned())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
        let dial_timeout_ms = parse_var_u64(&lookup, "ETCD_DIAL_TIMEOUT_MS", 3000)?;
        let status_attempts = parse_var_u32(&lookup, "ETCD_STATUS_ATTEMPTS", 3)?;

        let dispatch_prefix = text_var(&lookup, "DISPATCH_PREFIX", "/exec/");
        let lock_key = text_var(&lookup, "DISPATCH_LOCK_KEY", "/locks/dispatcher");
        let lock_ttl_seconds = parse_var_i64(&lookup, "DISPATCH_LOCK_TTL_SECONDS", 10)?;
        let waiting_queue_name = text_var(&lookup, "WAITING_QUEUE_NAME", "/waiting");
        let worker_id = lookup("WORKER_ID")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));

        if endpoints.is_empty() {
            return Err(CoordinationError::Validation(
                "ETCD_ENDPOINTS must name at least one endpoint".to_owned(),
            ));
        }

        if dial_timeout_ms == 0 {
            return Err(CoordinationError::Validation(
                "ETCD_DIAL_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        if status_attempts == 0 {
            return Err(CoordinationError::Validation(
                "ETCD_STATUS_ATTEMPTS must be greater than zero".to_owned(),
            ));
        }

        if lock_ttl_seconds <= 0 {
            return Err(CoordinationError::Validation(
                "DISPATCH_LOCK_TTL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        let database = match lookup("DATABASE_URL").filter(|value| !value.trim().is_empty()) {
            Some(database_url) => {
                let mut pool = RelationalPoolConfig::new(database_url);
                pool.max_idle_connections =
                    parse_var_u32(&lookup, "DATABASE_MAX_IDLE_CONNECTIONS", 10)?;
                pool.max_open_connections =
                    parse_var_u32(&lookup, "DATABASE_MAX_OPEN_CONNECTIONS", 100)?;
                pool.connection_max_lifetime = Duration::from_secs(parse_var_u64(
                    &lookup,
                    "DATABASE_CONNECTION_MAX_LIFETIME_SECONDS",
                    3600,
                )?);
                pool.validate()?;
                Some(pool)
            }
            None => None,
        };

        Ok(Self {
            etcd: EtcdStoreConfig {
                endpoints,
                dial_timeout: Duration::from_millis(dial_timeout_ms),
                status_attempts,
            },
            dispatch_prefix,
            lock_key,
            lock_ttl_seconds,
            waiting_queue_name,
            worker_id,
            database,
        })
    }
}

fn required_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> CoordinationResult<String> {
    lookup(name).ok_or_else(|| CoordinationError::Validation(format!("{name} is required")))
}

fn text_var(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn parse_var_u32(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u32,
) -> CoordinationResult<u32> {
    match lookup(name) {
        Some(value) => value.trim().parse::<u32>().map_err(|error| {
            CoordinationError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn parse_var_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> CoordinationResult<u64> {
    match lookup(name) {
        Some(value) => value.trim().parse::<u64>().map_err(|error| {
            CoordinationError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn parse_var_i64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: i64,
) -> CoordinationResult<i64> {
    match lookup(name) {
        Some(value) => value.trim().parse::<i64>().map_err(|error| {
            CoordinationError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests;
