//! Webhook alert channel
//!
//! Dispatched asynchronously relative to the caller: the POST runs in a
//! spawned task with a fixed timeout. Non-2xx responses and transport
//! failures are logged at debug severity and never raised.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::WebhookConfig;
use crate::types::{AlertPayload, Priority};

#[derive(Debug, Clone, Serialize)]
struct WebhookEvent {
    event: &'static str,
    timestamp: DateTime<Utc>,
    account: String,
    sender: String,
    subject: String,
    priority: Priority,
    labels: Vec<String>,
    rule: Option<String>,
}

impl WebhookEvent {
    fn from_alert(payload: AlertPayload) -> Self {
        Self {
            event: "mail.alert",
            timestamp: Utc::now(),
            account: payload.account,
            sender: payload.sender,
            subject: payload.subject,
            priority: payload.priority,
            labels: payload.labels,
            rule: payload.rule,
        }
    }
}

/// Fire-and-forget JSON POST of one alert. Returns immediately.
pub(crate) fn dispatch(client: &reqwest::Client, config: WebhookConfig, payload: AlertPayload) {
    let client = client.clone();
    let timeout = std::time::Duration::from_millis(config.timeout_ms.max(1));

    tokio::spawn(async move {
        let event = WebhookEvent::from_alert(payload);

        let mut request = client.post(&config.url).json(&event).timeout(timeout);
        if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if !response.status().is_success() => {
                debug!(url = %config.url, status = %response.status(), "webhook POST rejected");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(url = %config.url, error = %e, "webhook POST failed");
            }
        }
    });
}
