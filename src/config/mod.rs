//! Configuration model
//!
//! Plain serde structs, TOML-compatible. Loading and persistence belong to
//! the embedding layer; this crate only consumes the parsed values.

use serde::{Deserialize, Serialize};

use crate::types::Priority;

/// Top-level configuration for a watch service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Accounts to watch.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Connection watcher tuning.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Triage engine behavior.
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Alert dispatch channels.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// One watched account and the folders to subscribe on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Unique account name, used as the first half of every target key.
    pub name: String,

    /// Store endpoint hostname.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Folders to hold push subscriptions on.
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,

    /// Authentication method.
    pub auth: AuthConfig,
}

/// Authentication configuration, chosen per account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Password authentication.
    Password { user: String, password: String },
    /// Bearer-token authentication.
    Bearer { user: String, token: String },
}

impl AuthConfig {
    pub fn user(&self) -> &str {
        match self {
            Self::Password { user, .. } => user,
            Self::Bearer { user, .. } => user,
        }
    }
}

/// Reconnect behavior for the connection watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// First reconnect delay, in seconds.
    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,

    /// Reconnect delay cap, in seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Consecutive failed reconnect attempts before a target gives up.
    /// `None` retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backoff_initial_secs: default_backoff_initial_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            max_reconnect_attempts: None,
        }
    }
}

/// What the engine does with a flushed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriageMode {
    /// Engine is inert; no bus subscription is made.
    Disabled,
    /// Plain notifications only, no reasoning call.
    #[default]
    Notify,
    /// AI-assisted triage when the sampling capability was negotiated.
    Triage,
}

/// Triage engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub mode: TriageMode,

    /// Debounce window after the first message of a batch, in seconds.
    #[serde(default = "default_batch_window_secs")]
    pub batch_window_secs: u64,

    /// Maximum reasoning calls per rate-limit window.
    #[serde(default = "default_max_ai_calls")]
    pub max_ai_calls_per_window: u32,

    /// Rate-limit window length, in seconds. The call counter is reset on
    /// this fixed interval.
    #[serde(default = "default_ai_window_secs")]
    pub ai_window_secs: u64,

    /// Apply labels returned by triage.
    #[serde(default = "default_true")]
    pub auto_label: bool,

    /// Apply flags returned by triage.
    #[serde(default = "default_true")]
    pub auto_flag: bool,

    /// Model-selection hints passed through to the reasoning call.
    #[serde(default)]
    pub model_hints: Vec<String>,

    /// Token budget for one reasoning call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Name of the active triage preset, forwarded into alert payloads.
    pub preset: Option<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            mode: TriageMode::default(),
            batch_window_secs: default_batch_window_secs(),
            max_ai_calls_per_window: default_max_ai_calls(),
            ai_window_secs: default_ai_window_secs(),
            auto_label: true,
            auto_flag: true,
            model_hints: Vec::new(),
            max_tokens: default_max_tokens(),
            preset: None,
        }
    }
}

/// Alert channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Desktop notification channel master switch.
    #[serde(default = "default_true")]
    pub desktop_enabled: bool,

    /// Sound cue on urgent alerts.
    #[serde(default)]
    pub sound_enabled: bool,

    /// Minimum priority for the desktop channel to fire.
    #[serde(default = "default_threshold")]
    pub urgency_threshold: Priority,

    /// Desktop sends allowed per 60-second window.
    #[serde(default = "default_desktop_cap")]
    pub desktop_max_per_minute: u32,

    /// Platform command template for desktop notifications, with `{title}`
    /// and `{body}` placeholders. Sanitized values are interpolated before
    /// the command runs. `None` picks a per-OS default.
    pub desktop_command: Option<String>,

    /// Platform command for the urgent sound cue. `None` picks a per-OS
    /// default.
    pub sound_command: Option<String>,

    /// Webhook channel; absent means the channel is off.
    pub webhook: Option<WebhookConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            desktop_enabled: true,
            sound_enabled: false,
            urgency_threshold: default_threshold(),
            desktop_max_per_minute: default_desktop_cap(),
            desktop_command: None,
            sound_command: None,
            webhook: None,
        }
    }
}

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Optional bearer token sent with every POST.
    pub token: Option<String>,

    /// Priorities that are forwarded; everything else is filtered out.
    #[serde(default = "default_webhook_events")]
    pub events: Vec<Priority>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

/// Partial notifier config, merged over the current one by `update_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfigPatch {
    pub desktop_enabled: Option<bool>,
    pub sound_enabled: Option<bool>,
    pub urgency_threshold: Option<Priority>,
    pub desktop_max_per_minute: Option<u32>,
    pub desktop_command: Option<String>,
    pub sound_command: Option<String>,
    /// `Some(..)` replaces the webhook configuration wholesale.
    pub webhook: Option<WebhookConfig>,
}

impl NotifierConfig {
    /// Merge a patch into this config. `None` fields keep current values.
    pub fn apply(&mut self, patch: NotifierConfigPatch) {
        if let Some(v) = patch.desktop_enabled {
            self.desktop_enabled = v;
        }
        if let Some(v) = patch.sound_enabled {
            self.sound_enabled = v;
        }
        if let Some(v) = patch.urgency_threshold {
            self.urgency_threshold = v;
        }
        if let Some(v) = patch.desktop_max_per_minute {
            self.desktop_max_per_minute = v;
        }
        if let Some(v) = patch.desktop_command {
            self.desktop_command = Some(v);
        }
        if let Some(v) = patch.sound_command {
            self.sound_command = Some(v);
        }
        if let Some(v) = patch.webhook {
            self.webhook = Some(v);
        }
    }
}

fn default_port() -> u16 {
    993
}

fn default_folders() -> Vec<String> {
    vec!["INBOX".to_string()]
}

fn default_backoff_initial_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_batch_window_secs() -> u64 {
    5
}

fn default_max_ai_calls() -> u32 {
    10
}

fn default_ai_window_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_threshold() -> Priority {
    Priority::High
}

fn default_desktop_cap() -> u32 {
    10
}

fn default_webhook_events() -> Vec<Priority> {
    vec![Priority::High, Priority::Urgent]
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}
