//! Prometheus metrics for the compaction fleet.

pub mod events;
pub mod server;

pub use events::InternalEvent;
pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test};

/// Emit a metrics event.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
