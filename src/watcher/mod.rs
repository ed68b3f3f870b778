//! Mailbox connection watcher
//!
//! One independent task per configured (account, folder) pair. Each task
//! owns a dedicated push-subscribed connection, tracks the highest sequence
//! id already observed, publishes new-message batches to the event bus and
//! runs its own reconnect loop with exponential backoff. Targets never share
//! connections or state; a failure in one never blocks the others.

pub mod state;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::{AccountConfig, WatcherConfig};
use crate::store::{MailConnection, MailStore, PushSignal, Subscription};
use crate::types::error::Result;
use crate::types::{ExpungeEvent, NewMailEvent, TargetStatus};
use state::{transition, Backoff, TargetEvent, TargetState};

/// Shared view of one target: its tagged state, the last-seen watermark and
/// the shutdown channel. Mutated only by the target's own task (and by
/// `stop`, which only ever moves it to Stopped).
struct TargetShared {
    state: Mutex<TargetState>,
    last_seen: AtomicU32,
    stop_tx: watch::Sender<bool>,
}

impl TargetShared {
    fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(TargetState::Connecting),
            last_seen: AtomicU32::new(0),
            stop_tx,
        }
    }

    /// Drive the target's state machine one step.
    fn apply(&self, event: TargetEvent) -> TargetState {
        let mut state = self.state.lock().unwrap();
        *state = transition(*state, event);
        *state
    }

    fn state(&self) -> TargetState {
        *self.state.lock().unwrap()
    }

    fn is_connected(&self) -> bool {
        matches!(self.state(), TargetState::Idle | TargetState::Notifying)
    }

    /// Advance `last_seen` to `candidate` if it is higher; never decreases.
    fn advance_last_seen(&self, candidate: u32) {
        self.last_seen.fetch_max(candidate, Ordering::SeqCst);
    }

    fn last_seen(&self) -> u32 {
        self.last_seen.load(Ordering::SeqCst)
    }
}

struct TargetHandle {
    account: String,
    folder: String,
    shared: Arc<TargetShared>,
    task: JoinHandle<()>,
}

/// How a subscribed session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Stopped,
}

/// Watches every configured (account, folder) pair for new arrivals.
pub struct MailboxWatcher {
    store: Arc<dyn MailStore>,
    bus: Arc<EventBus>,
    config: WatcherConfig,
    accounts: Vec<AccountConfig>,
    targets: Mutex<Vec<TargetHandle>>,
}

impl MailboxWatcher {
    pub fn new(
        store: Arc<dyn MailStore>,
        bus: Arc<EventBus>,
        accounts: Vec<AccountConfig>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            accounts,
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Start one watch task per configured (account, folder) pair. All pairs
    /// start independently; connection failures surface later as reconnect
    /// cycles inside the task, never as an error here.
    pub fn start(&self) {
        let mut targets = self.targets.lock().unwrap();
        if !targets.is_empty() {
            warn!("watcher already started, ignoring start request");
            return;
        }

        for account in &self.accounts {
            for folder in &account.folders {
                let shared = Arc::new(TargetShared::new());
                let task = tokio::spawn(run_target(
                    self.store.clone(),
                    self.bus.clone(),
                    account.clone(),
                    folder.clone(),
                    self.config.clone(),
                    shared.clone(),
                ));
                targets.push(TargetHandle {
                    account: account.name.clone(),
                    folder: folder.clone(),
                    shared,
                    task,
                });
            }
        }

        info!(targets = targets.len(), "mailbox watcher started");
    }

    /// Read-only snapshot of every configured target. No side effects.
    pub fn status(&self) -> Vec<TargetStatus> {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .map(|t| TargetStatus {
                account: t.account.clone(),
                folder: t.folder.clone(),
                connected: t.shared.is_connected(),
                last_seen: t.shared.last_seen(),
            })
            .collect()
    }

    /// Signal every target to stop, wait for the tasks to wind down and
    /// clear all watcher state. Idempotent; connections are closed
    /// best-effort inside each task.
    pub async fn stop(&self) {
        let targets: Vec<TargetHandle> = {
            let mut guard = self.targets.lock().unwrap();
            guard.drain(..).collect()
        };

        if targets.is_empty() {
            return;
        }

        for target in &targets {
            let _ = target.shared.stop_tx.send(true);
        }
        for target in targets {
            let _ = target.task.await;
        }

        info!("mailbox watcher stopped");
    }
}

/// The per-target loop: connect, subscribe, serve push signals, reconnect
/// with backoff on any failure, until stopped.
async fn run_target(
    store: Arc<dyn MailStore>,
    bus: Arc<EventBus>,
    account: AccountConfig,
    folder: String,
    config: WatcherConfig,
    shared: Arc<TargetShared>,
) {
    let mut stop_rx = shared.stop_tx.subscribe();
    let mut backoff = Backoff::new(
        Duration::from_secs(config.backoff_initial_secs),
        Duration::from_secs(config.backoff_max_secs),
    );
    let mut failures = 0u32;

    loop {
        if *stop_rx.borrow() {
            shared.apply(TargetEvent::Stop);
            break;
        }

        match connect_target(&*store, &account, &folder).await {
            Ok((conn, subscription)) => {
                // Re-derive the baseline from the store's current next id.
                // `last_seen` only ever moves forward, so messages that
                // arrived while disconnected are not re-announced.
                shared.advance_last_seen(subscription.next_id.saturating_sub(1));
                shared.apply(TargetEvent::Connected);
                backoff.reset();
                failures = 0;

                info!(
                    account = %account.name,
                    folder = %folder,
                    last_seen = shared.last_seen(),
                    "subscribed to folder"
                );

                let end = serve_subscription(
                    conn,
                    subscription,
                    &shared,
                    &bus,
                    &account.name,
                    &folder,
                    &mut stop_rx,
                )
                .await;

                if end == SessionEnd::Stopped {
                    shared.apply(TargetEvent::Stop);
                    break;
                }
                shared.apply(TargetEvent::ConnectionClosed);
                warn!(
                    account = %account.name,
                    folder = %folder,
                    "connection closed, reconnecting"
                );
            }
            Err(e) => {
                shared.apply(TargetEvent::ConnectFailed);
                failures += 1;
                warn!(
                    account = %account.name,
                    folder = %folder,
                    attempt = failures,
                    error = %e,
                    "connect failed"
                );
                if let Some(max) = config.max_reconnect_attempts {
                    if failures >= max {
                        warn!(
                            account = %account.name,
                            folder = %folder,
                            "reconnect attempt limit reached, giving up on target"
                        );
                        shared.apply(TargetEvent::Stop);
                        break;
                    }
                }
            }
        }

        if *stop_rx.borrow() {
            shared.apply(TargetEvent::Stop);
            break;
        }

        let delay = backoff.next_delay();
        debug!(
            account = %account.name,
            folder = %folder,
            delay_secs = delay.as_secs(),
            "waiting before reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                shared.apply(TargetEvent::RetryDue);
            }
            _ = stop_rx.changed() => {
                shared.apply(TargetEvent::Stop);
                break;
            }
        }
    }
}

/// Open, authenticate and subscribe. On a subscribe failure the half-open
/// connection is closed best-effort before the error propagates.
async fn connect_target(
    store: &dyn MailStore,
    account: &AccountConfig,
    folder: &str,
) -> Result<(Box<dyn MailConnection>, Subscription)> {
    let mut conn = store.connect(account).await?;
    match conn.subscribe(folder).await {
        Ok(subscription) => Ok((conn, subscription)),
        Err(e) => {
            let _ = conn.close().await;
            Err(e)
        }
    }
}

/// Consume push signals until the connection closes or the target is
/// stopped. The connection is closed best-effort on every exit path.
async fn serve_subscription(
    mut conn: Box<dyn MailConnection>,
    subscription: Subscription,
    shared: &TargetShared,
    bus: &EventBus,
    account: &str,
    folder: &str,
    stop_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                let _ = conn.close().await;
                return SessionEnd::Stopped;
            }
            signal = subscription.signals.recv_async() => match signal {
                Ok(PushSignal::CountIncreased) => {
                    shared.apply(TargetEvent::CountIncreased);
                    fetch_new(&mut *conn, shared, bus, account, folder).await;
                    shared.apply(TargetEvent::FetchFinished);
                }
                Ok(PushSignal::Expunged) => {
                    debug!(account = %account, folder = %folder, "expunge signaled");
                    bus.expunged.emit(&ExpungeEvent {
                        account: account.to_string(),
                        folder: folder.to_string(),
                    });
                }
                Ok(PushSignal::Closed) | Err(_) => {
                    let _ = conn.close().await;
                    return SessionEnd::Closed;
                }
            }
        }
    }
}

/// Fetch everything above `last_seen` and publish one event for the batch.
/// A fetch failure is logged and swallowed: `last_seen` is untouched, so the
/// same range is retried on the next signal.
async fn fetch_new(
    conn: &mut dyn MailConnection,
    shared: &TargetShared,
    bus: &EventBus,
    account: &str,
    folder: &str,
) {
    let from = shared.last_seen().saturating_add(1);
    match conn.fetch_summaries(from).await {
        Ok(summaries) => {
            if let Some(max_id) = summaries.iter().map(|m| m.id).max() {
                shared.advance_last_seen(max_id);
            }
            if summaries.is_empty() {
                debug!(account = %account, folder = %folder, "count signal with no new summaries");
                return;
            }
            debug!(
                account = %account,
                folder = %folder,
                count = summaries.len(),
                "new messages fetched"
            );
            bus.new_mail.emit(&NewMailEvent {
                account: account.to_string(),
                folder: folder.to_string(),
                messages: summaries,
            });
        }
        Err(e) => {
            warn!(
                account = %account,
                folder = %folder,
                from = from,
                error = %e,
                "summary fetch failed, range will be retried on next signal"
            );
        }
    }
}
