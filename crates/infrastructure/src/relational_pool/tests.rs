use std::time::Duration;

use concord_core::CoordinationError;

use super::RelationalPoolConfig;

#[test]
fn defaults_follow_pool_limits() {
    let config = RelationalPoolConfig::new("postgres://localhost/concord");

    assert_eq!(config.max_idle_connections, 10);
    assert_eq!(config.max_open_connections, 100);
    assert_eq!(config.connection_max_lifetime, Duration::from_secs(3600));
    assert!(config.validate().is_ok());
}

#[test]
fn idle_connections_must_fit_in_open_connections() {
    let mut config = RelationalPoolConfig::new("postgres://localhost/concord");
    config.max_idle_connections = 20;
    config.max_open_connections = 5;

    assert!(matches!(
        config.validate(),
        Err(CoordinationError::Validation(_))
    ));
}

#[test]
fn blank_url_and_empty_pool_are_rejected() {
    let blank = RelationalPoolConfig::new("  ");
    assert!(blank.validate().is_err());

    let mut empty = RelationalPoolConfig::new("postgres://localhost/concord");
    empty.max_open_connections = 0;
    empty.max_idle_connections = 0;
    assert!(empty.validate().is_err());
}

#[test]
fn pool_options_carry_the_limits() {
    let mut config = RelationalPoolConfig::new("postgres://localhost/concord");
    config.max_idle_connections = 2;
    config.max_open_connections = 8;
    config.connection_max_lifetime = Duration::from_secs(90);

    let options = config.pool_options();

    assert_eq!(options.get_max_connections(), 8);
    assert_eq!(options.get_min_connections(), 2);
    assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(90)));
}
