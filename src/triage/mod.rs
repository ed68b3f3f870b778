//! Triage engine
//!
//! Subscribes to new-mail events, coalesces bursts into debounced batches,
//! and either classifies each batch through the external reasoning call or
//! falls back to plain notifications. Classification results drive label and
//! flag mutations plus alert dispatch. Every failure path degrades; nothing
//! here surfaces an error to the caller of `start`.

pub mod parse;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::{HooksConfig, TriageMode};
use crate::notify::AlertSink;
use crate::reason::{ChatMessage, CompletionRequest, EngineCapabilities, Reasoner, ResourceSink};
use crate::store::MailMutator;
use crate::types::error::Result;
use crate::types::{AlertPayload, MessageSummary, NewMailEvent, TriageResult, WatchError};
use parse::parse_triage_response;

/// One batched message, tagged with its origin target.
#[derive(Debug, Clone)]
struct PendingMessage {
    account: String,
    folder: String,
    message: MessageSummary,
}

/// State shared between the engine handle, the bus listener and the timer
/// tasks.
struct EngineShared {
    config: HooksConfig,
    mutator: Arc<dyn MailMutator>,
    reasoner: Option<Arc<dyn Reasoner>>,
    alerts: Arc<dyn AlertSink>,
    resources: Option<Arc<dyn ResourceSink>>,
    pending: Mutex<Vec<PendingMessage>>,
    flush_scheduled: AtomicBool,
    ai_calls: AtomicU32,
    sampling: AtomicBool,
    stopped: AtomicBool,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    reset_task: Mutex<Option<JoinHandle<()>>>,
}

/// The batching triage engine.
pub struct TriageEngine {
    shared: Arc<EngineShared>,
    bus: Arc<EventBus>,
}

impl TriageEngine {
    pub fn new(
        config: HooksConfig,
        bus: Arc<EventBus>,
        mutator: Arc<dyn MailMutator>,
        reasoner: Option<Arc<dyn Reasoner>>,
        alerts: Arc<dyn AlertSink>,
        resources: Option<Arc<dyn ResourceSink>>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                mutator,
                reasoner,
                alerts,
                resources,
                pending: Mutex::new(Vec::new()),
                flush_scheduled: AtomicBool::new(false),
                ai_calls: AtomicU32::new(0),
                sampling: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                flush_task: Mutex::new(None),
                reset_task: Mutex::new(None),
            }),
            bus,
        }
    }

    pub fn config(&self) -> &HooksConfig {
        &self.shared.config
    }

    /// Subscribe to new-mail events and start the rate-limit reset timer.
    /// With mode `Disabled` no subscription is made and the engine stays
    /// inert.
    pub fn start(&self, capabilities: EngineCapabilities) {
        if self.shared.config.mode == TriageMode::Disabled {
            info!("triage engine disabled, not subscribing");
            return;
        }
        if self.shared.reset_task.lock().unwrap().is_some() {
            warn!("triage engine already started, ignoring start request");
            return;
        }

        self.shared.stopped.store(false, Ordering::SeqCst);
        self.shared
            .sampling
            .store(capabilities.sampling, Ordering::SeqCst);

        let shared = self.shared.clone();
        self.bus.new_mail.on(move |event| {
            EngineShared::enqueue(&shared, event);
            Ok(())
        });

        let shared = self.shared.clone();
        let window = Duration::from_secs(self.shared.config.ai_window_secs.max(1));
        let reset = tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            interval.tick().await;
            loop {
                interval.tick().await;
                shared.ai_calls.store(0, Ordering::SeqCst);
            }
        });
        *self.shared.reset_task.lock().unwrap() = Some(reset);

        info!(
            mode = ?self.shared.config.mode,
            sampling = capabilities.sampling,
            "triage engine started"
        );
    }

    /// Cancel pending work, discard the batch and unsubscribe. Idempotent
    /// and safe to call while a flush is mid-flight; arrivals racing a
    /// shutdown schedule nothing.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.shared.flush_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.shared.reset_task.lock().unwrap().take() {
            task.abort();
        }
        self.shared.pending.lock().unwrap().clear();
        self.shared.flush_scheduled.store(false, Ordering::SeqCst);
        self.bus.new_mail.clear();

        info!("triage engine stopped");
    }
}

impl EngineShared {
    /// Append an event's messages to the pending batch and make sure exactly
    /// one flush is scheduled, `batch_window_secs` after the batch's first
    /// message. Later arrivals never postpone the flush.
    fn enqueue(shared: &Arc<Self>, event: &NewMailEvent) {
        if shared.stopped.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut pending = shared.pending.lock().unwrap();
            pending.extend(event.messages.iter().map(|message| PendingMessage {
                account: event.account.clone(),
                folder: event.folder.clone(),
                message: message.clone(),
            }));
        }

        if !shared.flush_scheduled.swap(true, Ordering::SeqCst) {
            let window = Duration::from_secs(shared.config.batch_window_secs);
            let task_shared = shared.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(window).await;
                EngineShared::flush(task_shared).await;
            });
            *shared.flush_task.lock().unwrap() = Some(task);
        }
    }

    /// Flush the batch: swap it out before any asynchronous work begins, so
    /// arrivals during AI or network calls land in the next batch instead of
    /// being lost or double-counted.
    async fn flush(shared: Arc<Self>) {
        shared.flush_scheduled.store(false, Ordering::SeqCst);
        let batch: Vec<PendingMessage> = std::mem::take(&mut *shared.pending.lock().unwrap());

        if batch.is_empty() || shared.stopped.load(Ordering::SeqCst) {
            return;
        }

        shared.push_resource_updates(&batch).await;

        let triage = shared.config.mode == TriageMode::Triage
            && shared.sampling.load(Ordering::SeqCst);
        if triage {
            shared.run_triage(&batch).await;
        } else {
            shared.notify_plain(&batch).await;
        }
    }

    /// Tell external subscribers that unread/mailbox state changed for every
    /// distinct account in the batch. Best-effort.
    async fn push_resource_updates(&self, batch: &[PendingMessage]) {
        let Some(sink) = &self.resources else {
            return;
        };
        let accounts: BTreeSet<&str> = batch.iter().map(|p| p.account.as_str()).collect();
        for account in accounts {
            for uri in [
                format!("email://{}/unread", account),
                format!("email://{}/mailboxes", account),
            ] {
                if let Err(e) = sink.resource_updated(&uri).await {
                    debug!(uri = %uri, error = %e, "resource update notification failed");
                }
            }
        }
    }

    /// Classify the batch with one reasoning call and apply the results.
    /// Exhausted rate limit or any call-level failure falls back to plain
    /// notification for the whole batch.
    async fn run_triage(&self, batch: &[PendingMessage]) {
        if self.ai_calls.load(Ordering::SeqCst) >= self.config.max_ai_calls_per_window {
            warn!(
                batch_size = batch.len(),
                "triage rate limit reached, falling back to plain notifications"
            );
            self.notify_plain(batch).await;
            return;
        }
        self.ai_calls.fetch_add(1, Ordering::SeqCst);

        let request = CompletionRequest {
            messages: vec![ChatMessage::user(build_triage_prompt(batch))],
            model_hints: self.config.model_hints.clone(),
            max_tokens: self.config.max_tokens,
        };

        let response = match &self.reasoner {
            Some(reasoner) => reasoner.complete(request).await,
            None => Err(WatchError::NotSupported(
                "sampling negotiated but no reasoner wired in".into(),
            )),
        };

        match response {
            Ok(text) => {
                let results = parse_triage_response(&text, batch.len());
                for (entry, result) in batch.iter().zip(results) {
                    self.apply_result(entry, result).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "triage call failed, falling back to plain notifications");
                self.notify_plain(batch).await;
            }
        }
    }

    /// Apply one classification: labels and flag independently, each failure
    /// logged and non-fatal; then the summary log line and the alert, which
    /// happen regardless of mutation outcomes.
    async fn apply_result(&self, entry: &PendingMessage, result: TriageResult) {
        let priority = result.priority.unwrap_or_default();

        if self.config.auto_label {
            for label in &result.labels {
                if let Err(e) = self
                    .mutator
                    .add_label(&entry.account, &entry.folder, entry.message.id, label)
                    .await
                {
                    warn!(
                        account = %entry.account,
                        id = entry.message.id,
                        label = %label,
                        error = %e,
                        "failed to add label"
                    );
                }
            }
        }

        if self.config.auto_flag && result.flag == Some(true) {
            if let Err(e) = self
                .mutator
                .set_flag(&entry.account, &entry.folder, entry.message.id, true)
                .await
            {
                warn!(
                    account = %entry.account,
                    id = entry.message.id,
                    error = %e,
                    "failed to set flag"
                );
            }
        }

        info!(
            account = %entry.account,
            folder = %entry.folder,
            id = entry.message.id,
            sender = %entry.message.sender.display(),
            priority = %priority,
            labels = ?result.labels,
            action = result.action.as_deref().unwrap_or(""),
            "message triaged"
        );

        self.alerts
            .alert(
                &AlertPayload {
                    account: entry.account.clone(),
                    sender: entry.message.sender.display(),
                    subject: entry.message.subject.clone(),
                    priority,
                    labels: result.labels,
                    rule: self.config.preset.clone(),
                },
                false,
            )
            .await;
    }

    /// Plain notification path: one log line and one normal-priority alert
    /// per message, no mutations.
    async fn notify_plain(&self, batch: &[PendingMessage]) {
        for entry in batch {
            info!(
                account = %entry.account,
                folder = %entry.folder,
                id = entry.message.id,
                sender = %entry.message.sender.display(),
                subject = %entry.message.subject,
                "new message"
            );
            self.alerts
                .alert(
                    &AlertPayload {
                        account: entry.account.clone(),
                        sender: entry.message.sender.display(),
                        subject: entry.message.subject.clone(),
                        priority: Default::default(),
                        labels: Vec::new(),
                        rule: None,
                    },
                    false,
                )
                .await;
        }
    }
}

/// Compact status glyphs for one message: unread, flagged, answered,
/// attachments.
fn flag_glyphs(message: &MessageSummary) -> String {
    let mut glyphs = String::new();
    if !message.seen {
        glyphs.push('●');
    }
    if message.flagged {
        glyphs.push('⚑');
    }
    if message.answered {
        glyphs.push('↩');
    }
    if message.has_attachments {
        glyphs.push('📎');
    }
    if glyphs.is_empty() {
        glyphs.push('-');
    }
    glyphs
}

/// One textual request enumerating the whole batch, demanding a strict JSON
/// array in positional order.
fn build_triage_prompt(batch: &[PendingMessage]) -> String {
    let mut prompt = String::from(
        "You triage incoming email. Classify each of the following messages.\n\nMessages:\n",
    );
    for (index, entry) in batch.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. From: {} | Subject: {} | Date: {} | {}\n",
            index + 1,
            entry.message.sender.display(),
            entry.message.subject,
            entry.message.date.to_rfc3339(),
            flag_glyphs(&entry.message),
        ));
    }
    prompt.push_str(
        "\nRespond with ONLY a JSON array, one object per message, in the same \
         order. Each object may contain: \"priority\" (one of \"low\", \"normal\", \
         \"high\", \"urgent\"), \"labels\" (array of up to 5 strings), \"flag\" \
         (boolean), \"action\" (short string). Omit fields you have no opinion on. \
         No prose, no code fences.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Priority};
    use async_trait::async_trait;
    use chrono::Utc;

    fn summary(id: u32, subject: &str) -> MessageSummary {
        MessageSummary {
            id,
            subject: subject.to_string(),
            sender: Address {
                name: Some("Alice".to_string()),
                address: "alice@example.com".to_string(),
            },
            recipients: vec!["me@example.com".to_string()],
            date: Utc::now(),
            seen: false,
            flagged: false,
            answered: false,
            has_attachments: false,
            labels: Vec::new(),
        }
    }

    fn event(ids: &[u32]) -> NewMailEvent {
        NewMailEvent {
            account: "acct".to_string(),
            folder: "INBOX".to_string(),
            messages: ids.iter().map(|id| summary(*id, "subject")).collect(),
        }
    }

    #[derive(Default)]
    struct RecordingMutator {
        labels: Mutex<Vec<(u32, String)>>,
        flags: Mutex<Vec<(u32, bool)>>,
        fail_label: Mutex<Option<String>>,
    }

    #[async_trait]
    impl MailMutator for RecordingMutator {
        async fn add_label(
            &self,
            _account: &str,
            _folder: &str,
            id: u32,
            label: &str,
        ) -> Result<()> {
            if self.fail_label.lock().unwrap().as_deref() == Some(label) {
                return Err(WatchError::Store("label rejected".into()));
            }
            self.labels.lock().unwrap().push((id, label.to_string()));
            Ok(())
        }

        async fn set_flag(
            &self,
            _account: &str,
            _folder: &str,
            id: u32,
            flagged: bool,
        ) -> Result<()> {
            self.flags.lock().unwrap().push((id, flagged));
            Ok(())
        }
    }

    struct ScriptedReasoner {
        response: Mutex<Result<String>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedReasoner {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Ok(text.to_string())),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Err(WatchError::Network("sampling failed".into()))),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(text: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Ok(text.to_string())),
                calls: AtomicU32::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<AlertPayload>>,
    }

    impl RecordingSink {
        fn alerts(&self) -> Vec<AlertPayload> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn alert(&self, payload: &AlertPayload, _force_desktop: bool) {
            self.alerts.lock().unwrap().push(payload.clone());
        }
    }

    struct Harness {
        engine: TriageEngine,
        bus: Arc<EventBus>,
        mutator: Arc<RecordingMutator>,
        sink: Arc<RecordingSink>,
    }

    fn harness(
        config: HooksConfig,
        reasoner: Option<Arc<dyn Reasoner>>,
        sampling: bool,
    ) -> Harness {
        let bus = Arc::new(EventBus::new());
        let mutator = Arc::new(RecordingMutator::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = TriageEngine::new(
            config,
            bus.clone(),
            mutator.clone(),
            reasoner,
            sink.clone(),
            None,
        );
        engine.start(EngineCapabilities { sampling });
        Harness {
            engine,
            bus,
            mutator,
            sink,
        }
    }

    fn triage_config() -> HooksConfig {
        HooksConfig {
            mode: TriageMode::Triage,
            batch_window_secs: 5,
            max_ai_calls_per_window: 10,
            ai_window_secs: 60,
            ..Default::default()
        }
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_flush() {
        let h = harness(
            HooksConfig {
                mode: TriageMode::Notify,
                batch_window_secs: 5,
                ..Default::default()
            },
            None,
            false,
        );

        h.bus.new_mail.emit(&event(&[1]));
        advance(1).await;
        h.bus.new_mail.emit(&event(&[2]));
        advance(1).await;
        h.bus.new_mail.emit(&event(&[3]));

        // Window runs from the first message; three arrivals in two seconds
        // produce exactly one flush of three.
        advance(2).await;
        assert!(h.sink.alerts().is_empty());
        advance(2).await;
        assert_eq!(h.sink.alerts().len(), 3);

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_falls_back_to_plain() {
        let reasoner = ScriptedReasoner::replying("[]");
        let h = harness(
            HooksConfig {
                max_ai_calls_per_window: 0,
                ..triage_config()
            },
            Some(reasoner.clone()),
            true,
        );

        h.bus.new_mail.emit(&event(&[1, 2, 3, 4]));
        advance(6).await;

        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 4);
        assert!(alerts.iter().all(|a| a.priority == Priority::Normal));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 0);
        assert!(h.mutator.labels.lock().unwrap().is_empty());
        assert!(h.mutator.flags.lock().unwrap().is_empty());

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_triage_result_applies_flag_and_alerts_urgent() {
        let reasoner = ScriptedReasoner::replying(r#"[{"priority":"urgent","flag":true}]"#);
        let h = harness(triage_config(), Some(reasoner), true);

        h.bus.new_mail.emit(&event(&[7]));
        advance(6).await;

        assert_eq!(*h.mutator.flags.lock().unwrap(), vec![(7, true)]);
        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, Priority::Urgent);

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_failure_degrades_to_plain() {
        let h = harness(triage_config(), Some(ScriptedReasoner::failing()), true);

        h.bus.new_mail.emit(&event(&[1, 2]));
        advance(6).await;

        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.priority == Priority::Normal));
        assert!(h.mutator.flags.lock().unwrap().is_empty());

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_capability_skips_triage() {
        let reasoner = ScriptedReasoner::replying(r#"[{"priority":"urgent"}]"#);
        let h = harness(triage_config(), Some(reasoner.clone()), false);

        h.bus.new_mail.emit(&event(&[1]));
        advance(6).await;

        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.sink.alerts()[0].priority, Priority::Normal);

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_failure_does_not_block_other_labels_or_flag() {
        let reasoner = ScriptedReasoner::replying(
            r#"[{"priority":"high","labels":["bad","good"],"flag":true}]"#,
        );
        let h = harness(triage_config(), Some(reasoner), true);
        *h.mutator.fail_label.lock().unwrap() = Some("bad".to_string());

        h.bus.new_mail.emit(&event(&[5]));
        advance(6).await;

        assert_eq!(*h.mutator.labels.lock().unwrap(), vec![(5, "good".to_string())]);
        assert_eq!(*h.mutator.flags.lock().unwrap(), vec![(5, true)]);
        // Alert carries the labels from the result even when one failed to apply
        assert_eq!(h.sink.alerts()[0].labels, vec!["bad", "good"]);

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrivals_during_flush_land_in_next_flush() {
        let reasoner = ScriptedReasoner::slow(r#"[{"priority":"low"}]"#, Duration::from_secs(10));
        let h = harness(triage_config(), Some(reasoner), true);

        h.bus.new_mail.emit(&event(&[1]));
        advance(6).await;
        // The reasoner is mid-call; a new arrival must start a fresh batch
        h.bus.new_mail.emit(&event(&[2]));
        advance(3).await;
        assert_eq!(h.sink.alerts().len(), 0);

        // First call finishes, second flush fires and triggers its own call
        advance(20).await;
        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].priority, Priority::Low);

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_each_window() {
        let reasoner = ScriptedReasoner::replying("[]");
        let h = harness(
            HooksConfig {
                max_ai_calls_per_window: 1,
                ..triage_config()
            },
            Some(reasoner.clone()),
            true,
        );

        h.bus.new_mail.emit(&event(&[1]));
        advance(6).await;
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 1);

        // Second batch inside the same window is rate-limited
        h.bus.new_mail.emit(&event(&[2]));
        advance(6).await;
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 1);

        // After the window resets, triage runs again
        advance(60).await;
        h.bus.new_mail.emit(&event(&[3]));
        advance(6).await;
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 2);

        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_engine_schedules_nothing() {
        let h = harness(
            HooksConfig {
                mode: TriageMode::Notify,
                ..Default::default()
            },
            None,
            false,
        );
        h.engine.stop();

        h.bus.new_mail.emit(&event(&[1]));
        advance(10).await;
        assert!(h.sink.alerts().is_empty());

        // stop is idempotent
        h.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_mode_never_subscribes() {
        let h = harness(
            HooksConfig {
                mode: TriageMode::Disabled,
                ..Default::default()
            },
            None,
            true,
        );
        assert_eq!(h.bus.new_mail.listener_count(), 0);

        h.bus.new_mail.emit(&event(&[1]));
        advance(10).await;
        assert!(h.sink.alerts().is_empty());
    }

    #[test]
    fn test_prompt_enumerates_batch_in_order() {
        let batch = vec![
            PendingMessage {
                account: "acct".into(),
                folder: "INBOX".into(),
                message: summary(1, "first"),
            },
            PendingMessage {
                account: "acct".into(),
                folder: "INBOX".into(),
                message: summary(2, "second"),
            },
        ];
        let prompt = build_triage_prompt(&batch);
        let first = prompt.find("1. From:").unwrap();
        let second = prompt.find("2. From:").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Subject: first"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn test_flag_glyphs() {
        let mut message = summary(1, "s");
        assert_eq!(flag_glyphs(&message), "●");
        message.seen = true;
        assert_eq!(flag_glyphs(&message), "-");
        message.flagged = true;
        message.has_attachments = true;
        assert_eq!(flag_glyphs(&message), "⚑📎");
    }
}
