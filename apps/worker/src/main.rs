//! Concord dispatch worker runtime.

#![forbid(unsafe_code)]

mod config;
mod execution_slot_handler;

use std::sync::Arc;

use concord_application::{DistributedMutex, WatchDispatcher};
use concord_core::CoordinationError;
use concord_infrastructure::{EtcdCoordinationStore, connect_relational_pool};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;
use crate::execution_slot_handler::ExecutionSlotHandler;

#[tokio::main]
async fn main() -> Result<(), CoordinationError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let store = Arc::new(EtcdCoordinationStore::connect(&config.etcd).await?);
    let pool = match config.database.as_ref() {
        Some(database) => Some(connect_relational_pool(database).await?),
        None => None,
    };

    let lock = DistributedMutex::new(
        store.clone(),
        config.lock_key.as_str(),
        config.lock_ttl_seconds,
    )?;
    let mut dispatcher = WatchDispatcher::new(store.clone(), lock, config.worker_id.as_str());
    let handler = ExecutionSlotHandler::new(
        store.clone(),
        config.waiting_queue_name.as_str(),
        config.dispatch_prefix.as_str(),
    )?;

    info!(
        worker_id = %config.worker_id,
        dispatch_prefix = %config.dispatch_prefix,
        lock_key = %dispatcher.exclusive_lock().key(),
        lock_ttl_seconds = config.lock_ttl_seconds,
        waiting_queue = %config.waiting_queue_name,
        relational_pool = pool.is_some(),
        "concord-worker started"
    );

    let result = dispatcher
        .dispatch_until(
            config.dispatch_prefix.as_str(),
            &handler,
            shutdown_signal(),
        )
        .await;

    let stats = dispatcher.counters().snapshot();
    info!(
        worker_id = %config.worker_id,
        handled = stats.handled,
        handler_failures = stats.handler_failures,
        contended = stats.contended,
        lock_faults = stats.lock_faults,
        lock_state = %dispatcher.exclusive_lock().state().as_str(),
        "dispatcher stopped"
    );

    if let Some(pool) = pool {
        pool.close().await;
    }

    if let Err(error) = &result {
        error!(worker_id = %config.worker_id, error = %error, "concord-worker exiting");
    }

    result
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
