//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus exporter installation

pub mod events;
pub mod server;

pub use server::init;

/// Emit an internal event (Vector-style pattern).
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding metric and a trace-level log line.
///
/// ```ignore
/// emit!(SentinelsEmitted { queue: "PriceQueue".into(), count: 2 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
