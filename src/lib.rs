//! metricstream - live metrics streaming for monitoring dashboards.
//!
//! Multiplexes any number of subscribers over one server-push connection
//! per monitored target, keeps a rolling history per metric series, and
//! recovers from connection loss on its own.

pub mod config;
pub mod history;
pub mod hook;
pub mod sample;
pub mod stream;
pub mod transport;

pub use config::StreamConfig;
pub use history::{HistoryCache, HistoryPoint, MemoryCache, Series};
pub use hook::LiveMetrics;
pub use sample::{MetricSample, TargetId};
pub use stream::{ConnectionState, MetricsManager, Subscription};
pub use transport::{SseTransport, Transport, TransportEvent};
