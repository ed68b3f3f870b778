//! Core data structures shared across the watcher, triage engine and notifier.

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{Result, WatchError};

/// A parsed sender or recipient address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub address: String,
}

impl Address {
    /// Render as `Name <addr>` when a display name is known, bare address
    /// otherwise.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

/// Envelope-level snapshot of one message, as fetched from the store.
///
/// `id` is the store-assigned sequence id used to detect "new since last
/// check"; it is unique and monotonically increasing within a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: u32,
    pub subject: String,
    pub sender: Address,
    pub recipients: Vec<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub has_attachments: bool,
    /// Non-system labels already present on the message.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Published on the bus when a watcher observes one or more new messages.
/// Immutable once published; delivered to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMailEvent {
    pub account: String,
    pub folder: String,
    pub messages: Vec<MessageSummary>,
}

/// Published on the bus when the store signals that messages were expunged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpungeEvent {
    pub account: String,
    pub folder: String,
}

/// Alert priority. The derived order is the urgency total order:
/// `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Parse one of the four known levels, case-insensitively. Anything else
    /// is rejected so unknown model output is dropped rather than guessed at.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-message classification produced by the reasoning call.
///
/// Every field is optional: absence means "no opinion", not "negative". A
/// default value is a valid, empty result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub priority: Option<Priority>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub flag: Option<bool>,
    pub action: Option<String>,
}

impl TriageResult {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none()
            && self.labels.is_empty()
            && self.flag.is_none()
            && self.action.is_none()
    }
}

/// Stateless alert request handed to the notifier; constructed fresh per
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub account: String,
    pub sender: String,
    pub subject: String,
    pub priority: Priority,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Name of the triage preset/rule that produced this alert, if any.
    pub rule: Option<String>,
}

/// Read-only snapshot of one watch target, returned by `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetStatus {
    pub account: String,
    pub folder: String,
    pub connected: bool,
    pub last_seen: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("urgent"), Some(Priority::Urgent));
        assert_eq!(Priority::parse("  High "), Some(Priority::High));
        assert_eq!(Priority::parse("NORMAL"), Some(Priority::Normal));
        assert_eq!(Priority::parse("critical"), None);
        assert_eq!(Priority::parse(""), None);
    }

    #[test]
    fn test_address_display() {
        let with_name = Address {
            name: Some("Jane Doe".to_string()),
            address: "jane@example.com".to_string(),
        };
        assert_eq!(with_name.display(), "Jane Doe <jane@example.com>");

        let bare = Address {
            name: None,
            address: "jane@example.com".to_string(),
        };
        assert_eq!(bare.display(), "jane@example.com");
    }

    #[test]
    fn test_empty_triage_result() {
        assert!(TriageResult::default().is_empty());
        let with_flag = TriageResult {
            flag: Some(false),
            ..Default::default()
        };
        assert!(!with_flag.is_empty());
    }
}
