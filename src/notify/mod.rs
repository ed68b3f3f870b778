//! Alert dispatcher
//!
//! Routes alert payloads to four channels: the protocol log (always, at a
//! severity derived from priority), desktop notifications (threshold-gated
//! and rate-limited), a sound cue (urgent only) and a webhook (priority
//! filter). Channels fail independently; nothing here ever returns an error
//! to the caller.

mod desktop;
mod webhook;

use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{NotifierConfig, NotifierConfigPatch};
use crate::types::{AlertPayload, Priority};

const DESKTOP_WINDOW_SECS: u64 = 60;

/// Fixed-window counter for desktop sends.
struct DesktopBudget {
    window_start: Instant,
    sent: u32,
}

impl DesktopBudget {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            sent: 0,
        }
    }

    /// Claim one send from the current window, rolling the window over when
    /// 60 seconds have elapsed. Returns false when the cap is exhausted.
    fn try_acquire(&mut self, cap: u32) -> bool {
        if self.window_start.elapsed().as_secs() >= DESKTOP_WINDOW_SECS {
            self.window_start = Instant::now();
            self.sent = 0;
        }
        if self.sent >= cap {
            return false;
        }
        self.sent += 1;
        true
    }
}

/// Where the triage engine hands alerts off. A trait seam so tests (and any
/// alternative dispatcher) can record alerts instead of emitting them.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, payload: &AlertPayload, force_desktop: bool);
}

/// The multi-channel alert dispatcher.
pub struct Notifier {
    config: RwLock<NotifierConfig>,
    desktop_budget: Mutex<DesktopBudget>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config: RwLock::new(config),
            desktop_budget: Mutex::new(DesktopBudget::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> NotifierConfig {
        self.config.read().unwrap().clone()
    }

    /// Merge a partial configuration over the current one.
    pub fn update_config(&self, patch: NotifierConfigPatch) {
        self.config.write().unwrap().apply(patch);
    }

    /// Dispatch one alert across all channels. Best-effort, at-most-once per
    /// channel; failures degrade to log-only and are never propagated.
    pub async fn dispatch(&self, payload: &AlertPayload, force_desktop: bool) {
        escalate_to_log(payload);

        let config = self.config();

        if config.desktop_enabled
            && (force_desktop || payload.priority >= config.urgency_threshold)
        {
            let allowed = self
                .desktop_budget
                .lock()
                .unwrap()
                .try_acquire(config.desktop_max_per_minute);
            if allowed {
                desktop::notify(&config, payload).await;
            } else {
                debug!(
                    account = %payload.account,
                    "desktop alert suppressed, per-minute cap reached"
                );
            }
        }

        if let Some(webhook_config) = config.webhook {
            if webhook_config.events.contains(&payload.priority) {
                webhook::dispatch(&self.http, webhook_config, payload.clone());
            }
        }
    }

    #[cfg(test)]
    fn desktop_sent(&self) -> u32 {
        self.desktop_budget.lock().unwrap().sent
    }
}

#[async_trait]
impl AlertSink for Notifier {
    async fn alert(&self, payload: &AlertPayload, force_desktop: bool) {
        self.dispatch(payload, force_desktop).await;
    }
}

/// The protocol-log channel: no threshold, cannot be disabled.
fn escalate_to_log(payload: &AlertPayload) {
    match payload.priority {
        Priority::Urgent => error!(
            account = %payload.account,
            sender = %payload.sender,
            subject = %payload.subject,
            "urgent mail alert"
        ),
        Priority::High => warn!(
            account = %payload.account,
            sender = %payload.sender,
            subject = %payload.subject,
            "mail alert"
        ),
        Priority::Normal => info!(
            account = %payload.account,
            sender = %payload.sender,
            subject = %payload.subject,
            "mail alert"
        ),
        Priority::Low => debug!(
            account = %payload.account,
            sender = %payload.sender,
            subject = %payload.subject,
            "mail alert"
        ),
    }
}
