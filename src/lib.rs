//! mailwatch - near-real-time mailbox watching with AI-assisted triage
//!
//! ## Module Organization
//!
//! - `types/`: Data structures and the crate error type
//! - `config/`: Configuration model (TOML-shaped, loaded by the embedder)
//! - `bus/`: In-process typed event bus
//! - `store/`: Mail store collaborator interfaces
//! - `reason/`: External reasoning and resource-update interfaces
//! - `watcher/`: Per-(account, folder) connection watcher
//! - `triage/`: Batching triage engine
//! - `notify/`: Multi-channel alert dispatcher
//! - `service`: Facade wiring the pipeline together

pub mod bus;
pub mod config;
pub mod notify;
pub mod reason;
pub mod service;
pub mod store;
pub mod triage;
pub mod types;
pub mod watcher;

pub use bus::EventBus;
pub use notify::{AlertSink, Notifier};
pub use reason::{EngineCapabilities, Reasoner, ResourceSink};
pub use service::WatchService;
pub use store::{MailConnection, MailMutator, MailStore, PushSignal, Subscription};
pub use triage::TriageEngine;
pub use types::{
    AlertPayload, MessageSummary, NewMailEvent, Priority, Result, TargetStatus, TriageResult,
    WatchError,
};
pub use watcher::MailboxWatcher;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the embedding process.
///
/// Debug builds default to debug-level logs for this crate and info for
/// everything else; release builds default to info. `RUST_LOG` overrides
/// both.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailwatch=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
