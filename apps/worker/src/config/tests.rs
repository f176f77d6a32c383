use std::collections::HashMap;
use std::time::Duration;

use concord_core::CoordinationError;

use super::WorkerConfig;

fn load(pairs: &[(&str, &str)]) -> Result<WorkerConfig, CoordinationError> {
    let values: HashMap<String, String> = pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect();
    WorkerConfig::from_lookup(|name| values.get(name).cloned())
}

#[test]
fn defaults_apply_when_only_endpoints_are_set() {
    let config = load(&[("ETCD_ENDPOINTS", "http://10.0.0.1:2379, http://10.0.0.2:2379")])
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        config.etcd.endpoints,
        vec!["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
    );
    assert_eq!(config.etcd.dial_timeout, Duration::from_millis(3000));
    assert_eq!(config.etcd.status_attempts, 3);
    assert_eq!(config.dispatch_prefix, "/exec/");
    assert_eq!(config.lock_key, "/locks/dispatcher");
    assert_eq!(config.lock_ttl_seconds, 10);
    assert_eq!(config.waiting_queue_name, "/waiting");
    assert!(config.worker_id.starts_with("worker-"));
    assert!(config.database.is_none());
}

#[test]
fn endpoints_are_required() {
    let missing = load(&[]);
    assert!(matches!(missing, Err(CoordinationError::Validation(_))));

    let blank = load(&[("ETCD_ENDPOINTS", " , ")]);
    assert!(matches!(blank, Err(CoordinationError::Validation(_))));
}

#[test]
fn invalid_numbers_are_reported_with_their_variable() {
    let result = load(&[
        ("ETCD_ENDPOINTS", "http://127.0.0.1:2379"),
        ("DISPATCH_LOCK_TTL_SECONDS", "ten"),
    ]);

    assert!(matches!(
        result,
        Err(CoordinationError::Validation(message)) if message.contains("DISPATCH_LOCK_TTL_SECONDS")
    ));
}

#[test]
fn non_positive_lock_ttl_is_rejected() {
    let result = load(&[
        ("ETCD_ENDPOINTS", "http://127.0.0.1:2379"),
        ("DISPATCH_LOCK_TTL_SECONDS", "0"),
    ]);

    assert!(matches!(result, Err(CoordinationError::Validation(_))));
}

#[test]
fn database_url_enables_the_relational_pool() {
    let config = load(&[
        ("ETCD_ENDPOINTS", "http://127.0.0.1:2379"),
        ("DATABASE_URL", "postgres://localhost/concord"),
        ("DATABASE_MAX_IDLE_CONNECTIONS", "4"),
        ("DATABASE_MAX_OPEN_CONNECTIONS", "16"),
        ("DATABASE_CONNECTION_MAX_LIFETIME_SECONDS", "600"),
        ("WORKER_ID", " worker-7 "),
    ])
    .unwrap_or_else(|_| unreachable!());

    let database = config.database.unwrap_or_else(|| unreachable!());
    assert_eq!(database.max_idle_connections, 4);
    assert_eq!(database.max_open_connections, 16);
    assert_eq!(database.connection_max_lifetime, Duration::from_secs(600));
    assert_eq!(config.worker_id, "worker-7");
}

#[test]
fn idle_connections_above_open_connections_are_rejected() {
    let result = load(&[
        ("ETCD_ENDPOINTS", "http://127.0.0.1:2379"),
        ("DATABASE_URL", "postgres://localhost/concord"),
        ("DATABASE_MAX_IDLE_CONNECTIONS", "50"),
        ("DATABASE_MAX_OPEN_CONNECTIONS", "5"),
    ]);

    assert!(matches!(result, Err(CoordinationError::Validation(_))));
}
