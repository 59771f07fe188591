//! Publicación de eventos de dominio.
//!
//! Fire-and-forget: el fallo de un suscriptor nunca afecta la ejecución ni el
//! WAL. Los eventos de una misma ejecución se publican en el orden en que los
//! produce su (único) escritor.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::DomainEvent;

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Descarta todo.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: DomainEvent) {}
}

/// Guarda los eventos en memoria agrupados por `execution_id` (tests y CLI).
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    inner: Mutex<HashMap<String, Vec<DomainEvent>>>,
}

impl InMemoryPublisher {
    pub fn events_for(&self, execution_id: &str) -> Vec<DomainEvent> {
        self.inner.lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Todos los eventos cuyo `execution_id` es `prefix` o empieza con
    /// `prefix/` (journey + steps), ordenados por timestamp.
    pub fn events_with_prefix(&self, prefix: &str) -> Vec<DomainEvent> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let nested = format!("{prefix}/");
        let mut out: Vec<DomainEvent> = guard.iter()
                                             .filter(|(k, _)| k.as_str() == prefix || k.starts_with(&nested))
                                             .flat_map(|(_, v)| v.iter().cloned())
                                             .collect();
        out.sort_by_key(|e| e.timestamp);
        out
    }
}

impl EventPublisher for InMemoryPublisher {
    fn publish(&self, event: DomainEvent) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry(event.execution_id.clone()).or_default().push(event);
    }
}

/// Reenvía eventos a un canal broadcast de tokio. Sin suscriptores, el evento
/// se pierde silenciosamente.
#[derive(Debug)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Suscripción filtrada a una ejecución (y sus steps).
    pub fn subscribe(&self, execution_id: impl Into<String>) -> ExecutionSubscription {
        ExecutionSubscription { execution_id: execution_id.into(),
                                rx: self.tx.subscribe(),
                                finished: false,
                                lagged: false }
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

pub struct ExecutionSubscription {
    execution_id: String,
    rx: broadcast::Receiver<DomainEvent>,
    finished: bool,
    lagged: bool,
}

impl ExecutionSubscription {
    fn matches(&self, event: &DomainEvent) -> bool {
        event.execution_id == self.execution_id
        || event.execution_id
                .strip_prefix(self.execution_id.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// `true` si el stream terminó porque el receptor se quedó atrás y se
    /// perdieron eventos; el estado final hay que consultarlo aparte.
    pub fn lagged(&self) -> bool {
        self.lagged
    }

    /// Siguiente evento de la ejecución; `None` después del evento terminal,
    /// si el publisher se cerró o si se perdieron eventos por lag (ver
    /// [`lagged`](Self::lagged)).
    pub async fn next(&mut self) -> Option<DomainEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(ev) if self.matches(&ev) => {
                    if ev.is_terminal() && ev.execution_id == self.execution_id {
                        self.finished = true;
                    }
                    return Some(ev);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // el terminal pudo estar entre los perdidos
                    log::warn!("subscription for {} lagged, {} events dropped; ending stream", self.execution_id, n);
                    self.finished = true;
                    self.lagged = true;
                    return None;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::event_types;
    use chrono::Utc;
    use serde_json::json;

    fn ev(exec: &str, step: Option<&str>, ty: &str) -> DomainEvent {
        DomainEvent::new(exec, step.map(str::to_string), ty, json!({}), Utc::now())
    }

    #[tokio::test]
    async fn subscription_filters_by_execution_and_ends_on_terminal() {
        let publisher = BroadcastPublisher::new(16);
        let mut sub = publisher.subscribe("j1");
        publisher.publish(ev("other", None, event_types::JOURNEY_STARTED));
        publisher.publish(ev("j1", None, event_types::JOURNEY_STARTED));
        publisher.publish(ev("j1/a", Some("a"), event_types::STEP_DONE));
        publisher.publish(ev("j1", None, event_types::JOURNEY_COMPLETED));
        publisher.publish(ev("j1", None, "late"));

        assert_eq!(sub.next().await.unwrap().event_type, event_types::JOURNEY_STARTED);
        assert_eq!(sub.next().await.unwrap().event_type, event_types::STEP_DONE);
        assert_eq!(sub.next().await.unwrap().event_type, event_types::JOURNEY_COMPLETED);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscription_ends_instead_of_waiting_forever() {
        let publisher = BroadcastPublisher::new(2);
        let mut sub = publisher.subscribe("j1");
        publisher.publish(ev("j1", None, event_types::JOURNEY_STARTED));
        publisher.publish(ev("j1", None, event_types::JOURNEY_COMPLETED));
        for i in 0..4 {
            publisher.publish(ev(&format!("other-{i}"), None, event_types::JOURNEY_STARTED));
        }

        let ended = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next()).await
                                                                                   .expect("stream must not hang");
        assert!(ended.is_none());
        assert!(sub.lagged());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn drained_subscription_is_not_lagged() {
        let publisher = BroadcastPublisher::new(2);
        let mut sub = publisher.subscribe("j1");
        publisher.publish(ev("j1", None, event_types::JOURNEY_COMPLETED));
        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
        assert!(!sub.lagged());
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let publisher = BroadcastPublisher::default();
        publisher.publish(ev("x", None, event_types::INTENT_COMPLETED));
    }

    #[test]
    fn in_memory_groups_by_prefix() {
        let p = InMemoryPublisher::default();
        p.publish(ev("j1", None, event_types::JOURNEY_STARTED));
        p.publish(ev("j1/a", Some("a"), event_types::STEP_RUNNING));
        p.publish(ev("j10", None, event_types::JOURNEY_STARTED));
        assert_eq!(p.events_with_prefix("j1").len(), 2);
        assert_eq!(p.events_for("j10").len(), 1);
    }

    #[test]
    fn step_events_are_never_terminal() {
        assert!(!ev("j/a", Some("a"), event_types::INTENT_FAILED).is_terminal());
        assert!(ev("j", None, event_types::JOURNEY_CANCELLED).is_terminal());
    }
}
