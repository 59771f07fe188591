pub mod publisher;
pub mod types;

pub use publisher::{BroadcastPublisher, EventPublisher, ExecutionSubscription, InMemoryPublisher, NoopPublisher};
pub use types::{DomainEvent, EventDraft};
