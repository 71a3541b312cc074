//! Synchronous publish/subscribe for run lifecycle events.
//!
//! Handlers run on the publishing thread in subscription order. The handler
//! list is snapshotted before delivery, so a handler may itself publish or
//! subscribe without deadlocking the bus. A handler that errors or panics is
//! logged and skipped; delivery to the rest continues.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// Lifecycle event kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ExecutionStart,
    ExecutionProgress,
    ExecutionComplete,
    ConvertPhaseStart,
    ConvertPhaseComplete,
    ConvertStart,
    ConvertComplete,
    ScanPhaseStart,
    ScanPhaseComplete,
    ScanStart,
    ScanComplete,
    ReportPhaseStart,
    ReportPhaseComplete,
    ReportStart,
    ReportComplete,
    InspectPhaseStart,
    InspectPhaseComplete,
    Error,
    Warning,
    Info,
}

/// A published event. Consumers must tolerate unknown payload keys.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Per-run event bus. Cheap to share behind an [`Arc`].
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<BTreeMap<EventType, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(event_type).or_default().push(Arc::new(handler));
    }

    /// Subscribes one handler to several event types.
    pub fn subscribe_many<F>(&self, event_types: &[EventType], handler: F)
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let shared: Handler = Arc::new(handler);
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        for t in event_types {
            handlers.entry(*t).or_default().push(Arc::clone(&shared));
        }
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Delivers an event to every subscriber of `event_type`.
    ///
    /// A non-object `payload` is wrapped under the `"value"` key. Returns the
    /// number of handlers that completed successfully.
    pub fn publish(&self, event_type: EventType, payload: Value) -> usize {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match handlers.get(&event_type) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let event = Event {
            event_type,
            payload,
        };

        let mut delivered = 0;
        for handler in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(event = ?event_type, error = %e, "event handler failed");
                }
                Err(_) => {
                    tracing::warn!(event = ?event_type, "event handler panicked");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventType::Info, move |_| {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }
        assert_eq!(bus.subscriber_count(EventType::Info), 3);
        assert_eq!(bus.publish(EventType::Info, json!({})), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handlers_do_not_stop_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        bus.subscribe(EventType::Warning, |_| Err("boom".into()));
        bus.subscribe(EventType::Warning, |_| panic!("handler bug"));
        let h = Arc::clone(&hits);
        bus.subscribe(EventType::Warning, move |_| {
            *h.lock().unwrap() += 1;
            Ok(())
        });
        assert_eq!(bus.publish(EventType::Warning, json!({"message": "x"})), 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn handler_may_publish_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&inner);
        bus.subscribe(EventType::Info, move |e| {
            *captured.lock().unwrap() = e.get_str("message").map(str::to_string);
            Ok(())
        });
        let bus2 = Arc::clone(&bus);
        bus.subscribe(EventType::ScanStart, move |e| {
            bus2.publish(EventType::Info, json!({"message": e.get_str("scanner")}));
            Ok(())
        });
        bus.publish(EventType::ScanStart, json!({"scanner": "bandit"}));
        assert_eq!(inner.lock().unwrap().as_deref(), Some("bandit"));
    }

    #[test]
    fn scalar_payload_is_wrapped() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        bus.subscribe(EventType::Error, move |e| {
            *s.lock().unwrap() = e.payload.get("value").cloned();
            Ok(())
        });
        bus.publish(EventType::Error, json!(7));
        assert_eq!(*seen.lock().unwrap(), Some(json!(7)));
    }

    #[test]
    fn event_type_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&EventType::ScanPhaseStart).unwrap(),
            "\"SCAN_PHASE_START\""
        );
    }
}
