//! In-process event bus
//!
//! A typed publish/subscribe hub connecting the mailbox watcher to its
//! consumers. Created once at service start and passed by reference to every
//! component that needs it; there is no global instance.
//!
//! Delivery is synchronous, in registration order, fan-out (not queueing).
//! A listener returning an error is logged and never prevents delivery to
//! the remaining listeners or reaches the publisher.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::types::error::Result;
use crate::types::{ExpungeEvent, NewMailEvent};

type Listener<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// One typed event channel: an ordered listener list plus a snapshot-based
/// emit path, so delivery never holds the registration lock and the listener
/// list cannot change mid-delivery.
pub struct Channel<T> {
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Channel<T> {
    /// Register a listener for the process lifetime (or until `clear`).
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }

    /// Deliver `event` to every currently registered listener, in
    /// registration order. Listener failures are logged and swallowed.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self.listeners.lock().unwrap().clone();
        for listener in snapshot {
            if let Err(e) = listener(event) {
                warn!("event listener failed: {}", e);
            }
        }
    }

    /// Remove every registered listener.
    pub fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

/// Process-wide event hub with the two event kinds the watcher publishes.
#[derive(Default)]
pub struct EventBus {
    pub new_mail: Channel<NewMailEvent>,
    pub expunged: Channel<ExpungeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WatchError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(n: usize) -> NewMailEvent {
        NewMailEvent {
            account: "acct".into(),
            folder: "INBOX".into(),
            messages: Vec::with_capacity(n),
        }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            bus.new_mail.on(move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        bus.new_mail.emit(&event(0));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.new_mail
            .on(|_| Err(WatchError::Other("boom".into())));
        let counter = delivered.clone();
        bus.new_mail.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.new_mail.emit(&event(0));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_removes_listeners() {
        let bus = EventBus::new();
        bus.new_mail.on(|_| Ok(()));
        bus.new_mail.on(|_| Ok(()));
        assert_eq!(bus.new_mail.listener_count(), 2);
        bus.new_mail.clear();
        assert_eq!(bus.new_mail.listener_count(), 0);
        // Emitting with no listeners is a no-op
        bus.new_mail.emit(&event(0));
    }

    #[test]
    fn test_listener_may_subscribe_during_delivery() {
        // The emit path works off a snapshot, so re-entrant registration
        // must neither deadlock nor receive the in-flight event.
        let bus = Arc::new(EventBus::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let bus2 = bus.clone();
        let late = late_calls.clone();
        bus.new_mail.on(move |_| {
            let late = late.clone();
            bus2.new_mail.on(move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        bus.new_mail.emit(&event(0));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        bus.new_mail.emit(&event(0));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}
