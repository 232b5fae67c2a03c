//! Application state for the Actix-web server
//!
//! The `AppState` struct is wrapped in `web::Data` and shared across all
//! HTTP request handlers. Everything in it is already thread-safe: the
//! worker serializes its own session state, the store guards its
//! connection, and the metrics tracker is lock-protected internally.

use std::sync::Arc;

use crate::config::Config;
use crate::metrics::MetricsTracker;
use crate::store::TaskStore;
use crate::worker::LicenseWorker;

/// Shared application state for Actix-web handlers
pub struct AppState {
    /// The session coordinator running license lookups
    pub worker: Arc<LicenseWorker>,
    /// Task data store backing task records and the persisted session
    pub store: Arc<dyn TaskStore>,
    /// Metrics for outgoing requests and refresh failures
    pub metrics: MetricsTracker,
    /// Application configuration
    pub config: Config,
}
