use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use concord_core::{CoordinationError, CoordinationResult};
use concord_domain::WatchEvent;
use tokio::sync::{Mutex, mpsc};

use crate::dispatch_ports::{ExclusiveLock, FnWatchEventHandler, WatchEventHandler};
use crate::store_ports::{WatchStore, WatchStream};

use super::{DispatchOutcome, DispatchStats, WatchDispatcher};

#[derive(Default)]
struct FakeWatchStore {
    senders: Mutex<Vec<mpsc::UnboundedSender<WatchEvent>>>,
    prefixes: Mutex<Vec<String>>,
}

struct ChannelWatchStream {
    receiver: mpsc::UnboundedReceiver<WatchEvent>,
}

#[async_trait]
impl WatchStream for ChannelWatchStream {
    async fn next_event(&mut self) -> CoordinationResult<Option<WatchEvent>> {
        Ok(self.receiver.recv().await)
    }
}

#[async_trait]
impl WatchStore for FakeWatchStore {
    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<Box<dyn WatchStream>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.lock().await.push(sender);
        self.prefixes.lock().await.push(prefix.to_owned());
        Ok(Box::new(ChannelWatchStream { receiver }))
    }
}

struct ScriptedLock {
    results: VecDeque<CoordinationResult<()>>,
    owner_tokens: Arc<Mutex<Vec<String>>>,
    unlocks: Arc<AtomicUsize>,
}

impl ScriptedLock {
    fn new(results: Vec<CoordinationResult<()>>) -> Self {
        Self {
            results: results.into(),
            owner_tokens: Arc::new(Mutex::new(Vec::new())),
            unlocks: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ExclusiveLock for ScriptedLock {
    async fn lock(&mut self, owner_token: &str) -> CoordinationResult<()> {
        self.owner_tokens.lock().await.push(owner_token.to_owned());
        self.results.pop_front().unwrap_or(Ok(()))
    }

    async fn unlock(&mut self) -> CoordinationResult<()> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn key(&self) -> &str {
        "/locks/dispatcher"
    }
}

#[derive(Default)]
struct RecordingHandler {
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail: AtomicBool,
}

#[async_trait]
impl WatchEventHandler for RecordingHandler {
    async fn on_put(&self, event: &WatchEvent) -> CoordinationResult<()> {
        self.puts.lock().await.push(event.key.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordinationError::Store("downstream rejected".to_owned()));
        }
        Ok(())
    }

    async fn on_delete(&self, event: &WatchEvent) -> CoordinationResult<()> {
        self.deletes.lock().await.push(event.key.clone());
        Ok(())
    }
}

fn grab_failed() -> CoordinationResult<()> {
    Err(CoordinationError::LockGrabFailed(
        "'/locks/dispatcher' is held by 'worker-b'".to_owned(),
    ))
}

#[tokio::test]
async fn put_event_runs_handler_under_lock() {
    let lock = ScriptedLock::new(vec![Ok(())]);
    let unlocks = lock.unlocks.clone();
    let owner_tokens = lock.owner_tokens.clone();
    let mut dispatcher =
        WatchDispatcher::new(Arc::new(FakeWatchStore::default()), lock, "worker-a");
    let handler = RecordingHandler::default();

    let outcome = dispatcher
        .handle_event(&handler, &WatchEvent::put("/jobs/1", "x", 5))
        .await;

    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(handler.puts.lock().await.as_slice(), ["/jobs/1".to_owned()]);
    assert_eq!(unlocks.load(Ordering::SeqCst), 1);
    assert!(owner_tokens.lock().await[0].starts_with("worker-a@"));
}

#[tokio::test]
async fn delete_event_runs_delete_handler() {
    let mut dispatcher = WatchDispatcher::new(
        Arc::new(FakeWatchStore::default()),
        ScriptedLock::new(vec![]),
        "worker-a",
    );
    let handler = RecordingHandler::default();

    let outcome = dispatcher
        .handle_event(&handler, &WatchEvent::delete("/jobs/1", 6))
        .await;

    assert_eq!(outcome, DispatchOutcome::Handled);
    assert!(handler.puts.lock().await.is_empty());
    assert_eq!(handler.deletes.lock().await.len(), 1);
}

#[tokio::test]
async fn contended_event_is_skipped_without_handler() {
    let lock = ScriptedLock::new(vec![grab_failed()]);
    let unlocks = lock.unlocks.clone();
    let mut dispatcher =
        WatchDispatcher::new(Arc::new(FakeWatchStore::default()), lock, "worker-a");
    let handler = RecordingHandler::default();

    let outcome = dispatcher
        .handle_event(&handler, &WatchEvent::put("/jobs/1", "x", 5))
        .await;

    assert_eq!(outcome, DispatchOutcome::Contended);
    assert!(handler.puts.lock().await.is_empty());
    assert_eq!(unlocks.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.counters().snapshot().contended, 1);
}

#[tokio::test]
async fn handler_failure_still_releases_lock() {
    let lock = ScriptedLock::new(vec![Ok(())]);
    let unlocks = lock.unlocks.clone();
    let mut dispatcher =
        WatchDispatcher::new(Arc::new(FakeWatchStore::default()), lock, "worker-a");
    let handler = RecordingHandler::default();
    handler.fail.store(true, Ordering::SeqCst);

    let outcome = dispatcher
        .handle_event(&handler, &WatchEvent::put("/jobs/1", "x", 5))
        .await;

    assert_eq!(outcome, DispatchOutcome::HandlerFailed);
    assert_eq!(unlocks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatch_keeps_going_after_lock_faults_and_ends_on_closed_stream() {
    let store = Arc::new(FakeWatchStore::default());
    let lock = ScriptedLock::new(vec![
        Err(CoordinationError::Lease("failed to grant lease".to_owned())),
        grab_failed(),
        Ok(()),
    ]);
    let mut dispatcher = WatchDispatcher::new(store.clone(), lock, "worker-a");
    let counters = dispatcher.counters();
    let handler = RecordingHandler::default();

    let feeder_store = store.clone();
    let feeder = tokio::spawn(async move {
        loop {
            if let Some(sender) = feeder_store.senders.lock().await.pop() {
                for revision in 1..=3 {
                    let event = WatchEvent::put(format!("/jobs/{revision}"), "x", revision);
                    if sender.send(event).is_err() {
                        return;
                    }
                }
                return;
            }
            tokio::task::yield_now().await;
        }
    });

    let result = dispatcher.dispatch("/jobs/", &handler).await;
    assert!(feeder.await.is_ok());

    assert!(matches!(result, Err(CoordinationError::WatchStreamClosed(_))));
    assert_eq!(store.prefixes.lock().await.as_slice(), ["/jobs/".to_owned()]);
    assert_eq!(handler.puts.lock().await.as_slice(), ["/jobs/3".to_owned()]);
    assert_eq!(
        counters.snapshot(),
        DispatchStats {
            handled: 1,
            handler_failures: 0,
            contended: 1,
            lock_faults: 1,
        }
    );
}

#[tokio::test]
async fn dispatch_until_returns_ok_on_shutdown() {
    let store = Arc::new(FakeWatchStore::default());
    let mut dispatcher = WatchDispatcher::new(store.clone(), ScriptedLock::new(vec![]), "worker-a");
    let handler = RecordingHandler::default();

    let result = dispatcher
        .dispatch_until("/jobs/", &handler, async {})
        .await;

    assert!(result.is_ok());
    assert_eq!(dispatcher.counters().snapshot().observed(), 0);
}

#[tokio::test]
async fn closure_handlers_receive_delete_events() {
    let lock = ScriptedLock::new(vec![Ok(())]);
    let mut dispatcher =
        WatchDispatcher::new(Arc::new(FakeWatchStore::default()), lock, "worker-a");
    let deleted = Arc::new(AtomicUsize::new(0));
    let seen = deleted.clone();
    let handler = FnWatchEventHandler::new(
        |_event: &WatchEvent| -> CoordinationResult<()> { Ok(()) },
        move |event: &WatchEvent| -> CoordinationResult<()> {
            assert_eq!(event.key, "/jobs/9");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    let outcome = dispatcher
        .handle_event(&handler, &WatchEvent::delete("/jobs/9", 12))
        .await;

    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(outcome.as_str(), "handled");
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.exclusive_lock().key(), "/locks/dispatcher");
}
