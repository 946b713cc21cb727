//! Observability for the persistence layer
//!
//! - Structured JSON log lines ([`Logger`])
//! - A closed catalogue of event names ([`Event`])
//! - Monotonic counters ([`MetricsRegistry`])
//! - Begin/complete scopes for multi-step work ([`ObservationScope`])
//!
//! Observability never fails the operation it observes.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log an event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
