//! Desktop notification channel
//!
//! Alerts are interpolated into a configurable platform command template
//! (`{title}` / `{body}` placeholders) and run through the shell under a
//! fixed timeout. Values are sanitized first: the template is user
//! configuration, the interpolated text is not. Failures degrade silently
//! to log-only.

use std::time::Duration;

use tracing::debug;

use crate::config::NotifierConfig;
use crate::types::{AlertPayload, Priority};

#[cfg(target_os = "macos")]
const DEFAULT_DESKTOP_COMMAND: &str =
    r#"osascript -e 'display notification "{body}" with title "{title}"'"#;
#[cfg(not(target_os = "macos"))]
const DEFAULT_DESKTOP_COMMAND: &str = "notify-send '{title}' '{body}'";

#[cfg(target_os = "macos")]
const DEFAULT_SOUND_COMMAND: &str = "afplay /System/Library/Sounds/Glass.aiff";
#[cfg(not(target_os = "macos"))]
const DEFAULT_SOUND_COMMAND: &str = "paplay /usr/share/sounds/freedesktop/stereo/message.oga";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum characters interpolated per field.
const MAX_FIELD_CHARS: usize = 160;

/// Show a desktop notification for `payload`, with a sound cue for urgent
/// alerts when sound is enabled. Never returns an error; every failure mode
/// is logged at debug and swallowed.
pub(crate) async fn notify(config: &NotifierConfig, payload: &AlertPayload) {
    let title = sanitize(&payload.sender);
    let body = sanitize(&payload.subject);

    let template = config
        .desktop_command
        .as_deref()
        .unwrap_or(DEFAULT_DESKTOP_COMMAND);
    let command = template.replace("{title}", &title).replace("{body}", &body);

    run_guarded(&command, "desktop").await;

    if payload.priority == Priority::Urgent && config.sound_enabled {
        let sound = config
            .sound_command
            .as_deref()
            .unwrap_or(DEFAULT_SOUND_COMMAND)
            .to_string();
        tokio::spawn(async move {
            run_guarded(&sound, "sound").await;
        });
    }
}

async fn run_guarded(command: &str, channel: &str) {
    let status = tokio::time::timeout(
        COMMAND_TIMEOUT,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status(),
    )
    .await;

    match status {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => {
            debug!(channel = channel, code = ?status.code(), "notification command exited nonzero")
        }
        Ok(Err(e)) => debug!(channel = channel, error = %e, "notification command failed"),
        Err(_) => debug!(channel = channel, "notification command timed out"),
    }
}

/// Strip control characters and shell metacharacters from text destined for
/// command interpolation, and bound its length. Idempotent.
pub(crate) fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .filter(|c| !matches!(c, '`' | '$' | '\\' | '\'' | '"' | ';' | '|' | '&' | '<' | '>' | '(' | ')' | '{' | '}'))
        .take(MAX_FIELD_CHARS)
        .collect()
}
