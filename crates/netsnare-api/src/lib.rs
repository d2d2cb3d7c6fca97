//! netsnare-api — the diagnostics HTTP surface.
//!
//! Served on the HTTP listener port, excluded from attack detection.
//!
//! # Routes
//!
//! | Method | Path | Availability |
//! |---|---|---|
//! | GET | `/monitor` | always |
//! | GET | `/test-heartbeat` | always |
//! | GET | `/api-diagnostics` | debug mode |
//! | GET | `/offline-attacks` | debug mode |
//! | POST | `/upload-offline-attacks` | debug mode |

pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};

use netsnare_report::ReportClient;
use netsnare_throttle::ThrottleCache;
use snare_core::{Config, ModuleRegistry};

/// Shared state for the diagnostics handlers.
#[derive(Clone)]
pub struct DiagState {
    pub config: Arc<Config>,
    pub client: Arc<ReportClient>,
    pub throttle: Arc<ThrottleCache>,
    pub modules: ModuleRegistry,
    pub started_at: Instant,
    pub tls_fingerprint: Option<String>,
}

/// Build the diagnostics router. Debug-only routes are simply absent
/// outside debug mode and fall through to the honeypot's 404 handler.
pub fn build_router(state: DiagState) -> Router {
    let mut router = Router::new()
        .route("/monitor", get(handlers::monitor))
        .route("/test-heartbeat", get(handlers::test_heartbeat));

    if state.config.debug_mode {
        router = router
            .route("/api-diagnostics", get(handlers::api_diagnostics))
            .route("/offline-attacks", get(handlers::offline_attacks))
            .route("/upload-offline-attacks", post(handlers::upload_offline_attacks));
    }

    router.with_state(state)
}
