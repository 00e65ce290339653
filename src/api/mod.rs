//! API Module
//!
//! HTTP surface of the cache service: health, Prometheus metrics, cache
//! administration, and the caching reverse proxy.

pub mod metrics;
pub mod rest;
pub mod server;

pub use metrics::ApiMetrics;
pub use rest::{ApiErrorResponse, AppState, RestRouter};
pub use server::{ApiServer, ApiServerConfig};
