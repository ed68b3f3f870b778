//! Mail store collaborator interfaces
//!
//! The store client itself (protocol, TLS, keepalive) lives outside this
//! crate; these traits are the seam it is injected through. The push
//! subscription is modeled as a per-target message inbox: the adapter
//! translates whatever callback or wire mechanism it has into `PushSignal`s
//! on a flume channel, and the watcher's loop consumes them in order.

use async_trait::async_trait;

use crate::config::AccountConfig;
use crate::types::error::Result;
use crate::types::MessageSummary;

/// A push event for one subscribed folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSignal {
    /// The folder's item count increased; new messages may be present.
    CountIncreased,
    /// Messages were expunged from the folder.
    Expunged,
    /// The connection was closed by the server or the transport.
    Closed,
}

/// An active push subscription on one folder.
pub struct Subscription {
    /// The store's current next sequence id for the folder, resolved at
    /// subscribe time. The baseline for "new since last check".
    pub next_id: u32,
    /// Ordered push signals for this folder.
    pub signals: flume::Receiver<PushSignal>,
}

/// Factory for authenticated store connections.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Open and authenticate a connection for `account` (password or bearer
    /// token, per the account's auth config).
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailConnection>>;
}

/// One authenticated connection, holding at most one folder subscription.
#[async_trait]
pub trait MailConnection: Send {
    /// Acquire an exclusive hold on `folder`, resolve the baseline next
    /// sequence id and start yielding push signals.
    async fn subscribe(&mut self, folder: &str) -> Result<Subscription>;

    /// Fetch summaries for every message with sequence id >= `from_seq`,
    /// in ascending id order.
    async fn fetch_summaries(&mut self, from_seq: u32) -> Result<Vec<MessageSummary>>;

    /// Release the folder hold and close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Message mutation interface used by the triage engine. Kept separate from
/// the watcher's connection so the engine never competes for the watcher's
/// single subscribed session.
#[async_trait]
pub trait MailMutator: Send + Sync {
    async fn add_label(&self, account: &str, folder: &str, id: u32, label: &str) -> Result<()>;

    async fn set_flag(&self, account: &str, folder: &str, id: u32, flagged: bool) -> Result<()>;
}
