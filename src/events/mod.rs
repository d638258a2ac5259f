use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Telemetry emitted by the relay and the server. Built once in `main` and
/// handed to whoever needs to report, never reached through a global.
#[derive(Debug, Clone)]
pub enum Event {
    ServerStarted { addr: String, backend: String },
    RelayStarted { session: Uuid, model: String },
    MalformedFrame { session: Uuid, raw: String },
    RelayCompleted { session: Uuid, token_count: usize, text: String, elapsed: Duration },
    RelayFailed { session: Uuid, token_count: usize, error: String },
    ClientDisconnected { session: Uuid, token_count: usize },
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
    fn name(&self) -> &str;
}

pub type HandlerId = usize;

#[allow(clippy::type_complexity)]
pub struct EventBus {
    handlers: RwLock<HashMap<HandlerId, (String, Arc<dyn EventHandler>)>>,
    callbacks: RwLock<HashMap<String, Vec<EventCallback>>>,
    next_id: RwLock<HandlerId>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
        }
    }

    /// A bus with the [`LoggingHandler`] already subscribed.
    pub fn with_logging() -> Self {
        let bus = Self::new();
        bus.subscribe(LoggingHandler);
        bus
    }

    pub fn subscribe<H: EventHandler + 'static>(&self, handler: H) -> HandlerId {
        let handler_id = {
            let mut id = self.next_id.write();
            *id += 1;
            *id
        };

        let name = handler.name().to_string();
        self.handlers.write().insert(handler_id, (name, Arc::new(handler)));

        handler_id
    }

    pub fn subscribe_to(&self, event_type: &str, callback: EventCallback) {
        self.callbacks
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(callback);
    }

    pub fn unsubscribe(&self, handler_id: HandlerId) {
        self.handlers.write().remove(&handler_id);
    }

    pub fn publish(&self, event: Event) {
        for (_, handler) in self.handlers.read().values() {
            handler.handle(&event);
        }

        if let Some(callbacks) = self.callbacks.read().get(event_type_name(&event)) {
            for callback in callbacks {
                callback(&event);
            }
        }
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.read().values().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn event_type_name(event: &Event) -> &'static str {
    match event {
        Event::ServerStarted { .. } => "server_started",
        Event::RelayStarted { .. } => "relay_started",
        Event::MalformedFrame { .. } => "malformed_frame",
        Event::RelayCompleted { .. } => "relay_completed",
        Event::RelayFailed { .. } => "relay_failed",
        Event::ClientDisconnected { .. } => "client_disconnected",
    }
}

/// Writes every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &Event) {
        match event {
            Event::ServerStarted { addr, backend } => {
                tracing::info!(%addr, %backend, "relay server listening");
            }
            Event::RelayStarted { session, model } => {
                tracing::info!(%session, %model, "relay session started");
            }
            Event::MalformedFrame { session, raw } => {
                tracing::warn!(%session, %raw, "skipping malformed upstream line");
            }
            Event::RelayCompleted { session, token_count, text, elapsed } => {
                tracing::info!(
                    %session,
                    tokens = token_count,
                    chars = text.chars().count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "relay session completed"
                );
                tracing::debug!(%session, %text, "full answer");
            }
            Event::RelayFailed { session, token_count, error } => {
                tracing::error!(%session, tokens = token_count, %error, "relay session failed");
            }
            Event::ClientDisconnected { session, token_count } => {
                tracing::debug!(%session, tokens = token_count, "client went away, upstream released");
            }
        }
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    impl EventHandler for Counter {
        fn handle(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn test_subscribe_publish_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(Counter(hits.clone()));
        assert_eq!(bus.handler_names(), vec!["counter".to_string()]);

        bus.publish(Event::RelayStarted { session: Uuid::new_v4(), model: "m".into() });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.unsubscribe(id);
        bus.publish(Event::RelayStarted { session: Uuid::new_v4(), model: "m".into() });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_callbacks() {
        let bus = EventBus::with_logging();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        bus.subscribe_to("relay_failed", Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let session = Uuid::new_v4();
        bus.publish(Event::ClientDisconnected { session, token_count: 0 });
        bus.publish(Event::RelayFailed { session, token_count: 0, error: "x".into() });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
