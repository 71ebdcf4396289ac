//! Prometheus metrics for the session gateway.
//!
//! All metric types use atomics internally (no locks on the hot path).
//! The `Metrics` struct is `Clone`-cheap (Arc-based registry + Arc-based collectors).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;

use crate::api::handlers::AppState;

/// All Prometheus metrics for the gateway.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- Sessions --
    pub sessions_created_total: IntCounterVec,
    pub validations_total: IntCounterVec,
    pub sessions_evicted_total: IntCounter,
    pub login_failures_total: IntCounterVec,

    // -- OAuth --
    pub oauth_exchanges_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // -- Process & Build --
        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process").unwrap();
        registry
            .register(Box::new(process_start_time_seconds.clone()))
            .unwrap();

        let build_info = GaugeVec::new(
            Opts::new("dashgate_build_info", "Build information"),
            &["version", "store"],
        )
        .unwrap();
        registry.register(Box::new(build_info.clone())).unwrap();

        // Register standard process metrics (RSS, CPU, open FDs on Linux)
        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        // -- Sessions --
        let sessions_created_total = IntCounterVec::new(
            Opts::new(
                "dashgate_sessions_created_total",
                "Sessions issued, by principal role",
            ),
            &["role"],
        )
        .unwrap();
        registry
            .register(Box::new(sessions_created_total.clone()))
            .unwrap();

        let validations_total = IntCounterVec::new(
            Opts::new(
                "dashgate_validations_total",
                "Identifier lookups by outcome (valid, expired, unknown)",
            ),
            &["outcome"],
        )
        .unwrap();
        registry
            .register(Box::new(validations_total.clone()))
            .unwrap();

        let sessions_evicted_total = IntCounter::new(
            "dashgate_sessions_evicted_total",
            "Sessions deleted by lazy eviction or the periodic sweep",
        )
        .unwrap();
        registry
            .register(Box::new(sessions_evicted_total.clone()))
            .unwrap();

        let login_failures_total = IntCounterVec::new(
            Opts::new(
                "dashgate_login_failures_total",
                "Rejected sign-in attempts, by principal role",
            ),
            &["role"],
        )
        .unwrap();
        registry
            .register(Box::new(login_failures_total.clone()))
            .unwrap();

        // -- OAuth --
        let oauth_exchanges_total = IntCounterVec::new(
            Opts::new(
                "dashgate_oauth_exchanges_total",
                "OAuth code exchanges by outcome (ok, network_error, denied)",
            ),
            &["outcome"],
        )
        .unwrap();
        registry
            .register(Box::new(oauth_exchanges_total.clone()))
            .unwrap();

        Metrics {
            registry,
            process_start_time_seconds,
            build_info,
            sessions_created_total,
            validations_total,
            sessions_evicted_total,
            login_failures_total,
            oauth_exchanges_total,
        }
    }
}

/// Handler for GET /metrics — returns Prometheus text format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}
