//! Synchronous publish/subscribe channel for workflow events.

use crate::model::UpdateEvent;
use std::sync::{Arc, Mutex, PoisonError};

pub trait EventListener: Send + Sync {
    fn on_update_event(&self, event: UpdateEvent);
}

impl<F> EventListener for F
where
    F: Fn(UpdateEvent) + Send + Sync,
{
    fn on_update_event(&self, event: UpdateEvent) {
        self(event)
    }
}

/// Cheap to clone; clones share the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Arc<dyn EventListener>>>>,
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the listener was already subscribed.
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` if the listener was not subscribed.
    pub fn unsubscribe(&self, listener: &Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Deliver to a snapshot of the current subscribers, in subscription order, on this thread.
    /// Listeners may subscribe or unsubscribe from inside the callback.
    pub fn notify(&self, event: UpdateEvent) {
        let snapshot: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::debug!(?event, listeners = snapshot.len(), "notify");
        for listener in snapshot {
            listener.on_update_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(tag: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn EventListener> {
        Arc::new(move |e: UpdateEvent| log.lock().unwrap().push(format!("{tag}:{e:?}")))
    }

    #[test]
    fn delivers_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        bus.subscribe(recorder("a", log.clone()));
        bus.subscribe(recorder("b", log.clone()));

        bus.notify(UpdateEvent::Started);
        bus.notify(UpdateEvent::Applied);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:Started", "b:Started", "a:Applied", "b:Applied"]
        );
    }

    #[test]
    fn subscribe_and_unsubscribe_are_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let l = recorder("a", log.clone());

        assert!(bus.subscribe(l.clone()));
        assert!(!bus.subscribe(l.clone()));
        assert_eq!(bus.len(), 1);

        bus.notify(UpdateEvent::Postponed);
        assert_eq!(log.lock().unwrap().len(), 1);

        assert!(bus.unsubscribe(&l));
        assert!(!bus.unsubscribe(&l));
        bus.notify(UpdateEvent::Postponed);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_notify() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<Arc<dyn EventListener>>>> = Arc::new(Mutex::new(None));

        let bus2 = bus.clone();
        let hits2 = hits.clone();
        let slot2 = slot.clone();
        let l: Arc<dyn EventListener> = Arc::new(move |_e: UpdateEvent| {
            *hits2.lock().unwrap() += 1;
            if let Some(me) = slot2.lock().unwrap().take() {
                bus2.unsubscribe(&me);
            }
        });
        *slot.lock().unwrap() = Some(l.clone());
        bus.subscribe(l);

        bus.notify(UpdateEvent::Finished);
        bus.notify(UpdateEvent::Finished);
        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(bus.is_empty());
    }
}
