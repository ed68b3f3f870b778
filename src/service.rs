//! Watch service facade
//!
//! Owns the event bus, the mailbox watcher, the triage engine and the
//! notifier, and wires them together. The surrounding tool/resource layer
//! talks to this one object: start, stop, status and the introspection
//! accessors.

use std::sync::Arc;

use tracing::info;

use crate::bus::EventBus;
use crate::config::{HooksConfig, WatchConfig};
use crate::notify::Notifier;
use crate::reason::{EngineCapabilities, Reasoner, ResourceSink};
use crate::store::{MailMutator, MailStore};
use crate::triage::TriageEngine;
use crate::types::TargetStatus;
use crate::watcher::MailboxWatcher;

/// The assembled watch pipeline: watcher → bus → engine → notifier.
pub struct WatchService {
    bus: Arc<EventBus>,
    watcher: MailboxWatcher,
    engine: TriageEngine,
    notifier: Arc<Notifier>,
}

impl WatchService {
    /// Assemble a service from configuration and the injected collaborators.
    /// `reasoner` and `resources` are optional; a missing reasoner simply
    /// degrades triage to plain notification.
    pub fn new(
        config: WatchConfig,
        store: Arc<dyn MailStore>,
        mutator: Arc<dyn MailMutator>,
        reasoner: Option<Arc<dyn Reasoner>>,
        resources: Option<Arc<dyn ResourceSink>>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let notifier = Arc::new(Notifier::new(config.notifier));
        let watcher = MailboxWatcher::new(
            store,
            bus.clone(),
            config.accounts,
            config.watcher,
        );
        let engine = TriageEngine::new(
            config.hooks,
            bus.clone(),
            mutator,
            reasoner,
            notifier.clone(),
            resources,
        );

        Self {
            bus,
            watcher,
            engine,
            notifier,
        }
    }

    /// Start the engine (with the negotiated capabilities) and then the
    /// watcher, so no arrival can slip past an unsubscribed engine.
    pub fn start(&self, capabilities: EngineCapabilities) {
        info!(sampling = capabilities.sampling, "starting watch service");
        self.engine.start(capabilities);
        self.watcher.start();
    }

    /// Stop the watcher first (no new events), then the engine. Idempotent.
    pub async fn stop(&self) {
        self.watcher.stop().await;
        self.engine.stop();
        info!("watch service stopped");
    }

    /// Connection and last-seen snapshot for every configured target.
    pub fn status(&self) -> Vec<TargetStatus> {
        self.watcher.status()
    }

    /// The triage configuration in effect.
    pub fn hooks_config(&self) -> HooksConfig {
        self.engine.config().clone()
    }

    /// The alert dispatcher, for `alert` / `update_config` tooling.
    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    /// The event bus, for additional subscribers outside this crate.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }
}
