//! The health surface: liveness, readiness and detailed status.
//!
//! Liveness always answers 200. Readiness pings every dependency in
//! parallel under a five-second overall deadline; only critical failures
//! (store, catalogue) downgrade the result to 503, a degraded cache is
//! reported but tolerated. The detailed endpoint adds process-level
//! information.

use std::time::{Duration, Instant};

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::{Map, Value, json};

use crate::app::AppState;

const READINESS_DEADLINE: Duration = Duration::from_secs(5);

struct CheckOutcome {
    name: &'static str,
    critical: bool,
    healthy: bool,
    duration: Duration,
    error: Option<String>,
}

impl CheckOutcome {
    fn to_json(&self) -> Value {
        json!({
            "status": if self.healthy { "UP" } else { "DOWN" },
            "time": format!("{:?}", self.duration),
            "critical": self.critical,
            "error": self.error,
        })
    }
}

async fn run_check<F>(name: &'static str, critical: bool, check: F) -> CheckOutcome
where
    F: std::future::Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(READINESS_DEADLINE, check).await {
        Ok(result) => result,
        Err(_) => Err(format!("check timed out after {READINESS_DEADLINE:?}")),
    };
    let duration = start.elapsed();

    match result {
        Ok(()) => CheckOutcome {
            name,
            critical,
            healthy: true,
            duration,
            error: None,
        },
        Err(error) => {
            tracing::error!(dependency = name, error, "health check failed");
            CheckOutcome {
                name,
                critical,
                healthy: false,
                duration,
                error: Some(error),
            }
        }
    }
}

async fn dependency_checks(state: &AppState) -> (StatusCode, Map<String, Value>) {
    let repo = state.repo.clone();
    let cache = state.cache.clone();
    let catalog = state.catalog.clone();

    // All dependencies are probed concurrently; the slowest bounds the
    // response, never the sum.
    let (database, cache_check, router) = tokio::join!(
        run_check("database", true, async move {
            repo.ping().await.map_err(|e| e.to_string())
        }),
        run_check("cache", false, async move {
            cache.ping().await.map_err(|e| e.to_string())
        }),
        run_check("router", true, async move {
            catalog
                .get_routes()
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }),
    );

    let mut status = StatusCode::OK;
    let mut checks = Map::new();
    for outcome in [database, cache_check, router] {
        if !outcome.healthy && outcome.critical {
            status = StatusCode::SERVICE_UNAVAILABLE;
        }
        checks.insert(outcome.name.to_string(), outcome.to_json());
    }

    (status, checks)
}

/// `GET /health/liveness`: the process is running.
pub async fn liveness() -> impl IntoResponse {
    Json(json!({
        "status": "UP",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /health/readiness`: every critical dependency answers its ping.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let (status, checks) = dependency_checks(&state).await;

    let body = json!({
        "status": if status == StatusCode::OK { "UP" } else { "DOWN" },
        "time": chrono::Utc::now().to_rfc3339(),
        "checks": checks,
    });

    (status, Json(body))
}

/// `GET /health`: readiness plus process-level detail.
pub async fn detailed(State(state): State<AppState>) -> impl IntoResponse {
    let (status, checks) = dependency_checks(&state).await;
    let uptime = chrono::Utc::now() - state.started_at;

    let body = json!({
        "status": if status == StatusCode::OK { "UP" } else { "DOWN" },
        "time": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "uptime_secs": uptime.num_seconds(),
        "checks": checks,
        "system": system_info(),
    });

    (status, Json(body))
}

/// `GET /metrics`: a JSON snapshot of gateway-level gauges. A scrape
/// exporter can be wired externally through the `metrics` facade.
pub async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;

    Json(json!({
        "service": "gantry",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.num_seconds(),
        "circuit_breakers": state.breakers.snapshot(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn system_info() -> Value {
    json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(0),
        "memory_rss_kb": resident_memory_kb(),
    })
}

#[cfg(target_os = "linux")]
fn resident_memory_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_kb() -> Option<u64> {
    None
}
