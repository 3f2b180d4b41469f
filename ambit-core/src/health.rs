//! Liveness/readiness probes.
//!
//! A [`HealthIndicator`] reports the state of one dependency (the database
//! pool, a cache, ...). [`HealthBuilder`] assembles indicators into a router:
//!
//! | Path                | Description                                     |
//! |---------------------|-------------------------------------------------|
//! | `GET /health`       | Aggregated status: 200 if UP, 503 if DOWN       |
//! | `GET /health/live`  | Liveness probe: always 200                      |
//! | `GET /health/ready` | Readiness probe: 200 if readiness checks pass   |

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down(String),
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// A named health indicator.
pub trait HealthIndicator: Send + Sync + 'static {
    /// The name of this health check (e.g. `"db"`).
    fn name(&self) -> &str;

    fn check(&self) -> impl Future<Output = HealthStatus> + Send;

    /// Whether this check gates the readiness probe (default: `true`).
    fn affects_readiness(&self) -> bool {
        true
    }
}

/// Object-safe wrapper for [`HealthIndicator`].
#[doc(hidden)]
pub trait HealthIndicatorErased: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>>;
    fn affects_readiness(&self) -> bool;
}

impl<T: HealthIndicator> HealthIndicatorErased for T {
    fn name(&self) -> &str {
        HealthIndicator::name(self)
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>> {
        Box::pin(HealthIndicator::check(self))
    }

    fn affects_readiness(&self) -> bool {
        HealthIndicator::affects_readiness(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckStatus {
    Up,
    Down,
}

/// A single check result in the health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthCheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub affects_readiness: bool,
}

/// Aggregated health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthCheckStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<HealthCheck>,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    fn from_checks(checks: Vec<HealthCheck>, uptime: Duration) -> Self {
        let status = if checks.iter().all(|c| c.status == HealthCheckStatus::Up) {
            HealthCheckStatus::Up
        } else {
            HealthCheckStatus::Down
        };
        Self {
            status,
            checks,
            uptime_seconds: uptime.as_secs(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.status {
            HealthCheckStatus::Up => StatusCode::OK,
            HealthCheckStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Builder for assembling health checks into a router.
#[derive(Default)]
pub struct HealthBuilder {
    checks: Vec<Box<dyn HealthIndicatorErased>>,
    cache_ttl: Option<Duration>,
}

impl HealthBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a health check.
    pub fn check<H: HealthIndicator>(mut self, indicator: H) -> Self {
        self.checks.push(Box::new(indicator));
        self
    }

    /// Re-use check results for `ttl` before probing again.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn into_state(self) -> Arc<HealthState> {
        Arc::new(HealthState::new(self.checks, self.cache_ttl))
    }

    /// Build the `/health` router. Merge it into the application router.
    pub fn build<S: Clone + Send + Sync + 'static>(self) -> Router<S> {
        let state = self.into_state();
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state)
            .route("/health/live", get(liveness_handler))
    }
}

/// Shared state for health check handlers.
pub struct HealthState {
    checks: Vec<Box<dyn HealthIndicatorErased>>,
    start_time: Instant,
    cache_ttl: Option<Duration>,
    cache: tokio::sync::RwLock<Option<(Vec<HealthCheck>, Instant)>>,
}

impl HealthState {
    pub fn new(checks: Vec<Box<dyn HealthIndicatorErased>>, cache_ttl: Option<Duration>) -> Self {
        Self {
            checks,
            start_time: Instant::now(),
            cache_ttl,
            cache: tokio::sync::RwLock::new(None),
        }
    }

    /// Run every check (or serve cached results) and aggregate them.
    pub async fn aggregate(&self) -> HealthResponse {
        let checks = self.run_checks().await;
        HealthResponse::from_checks(checks, self.start_time.elapsed())
    }

    /// Aggregate only the checks that gate readiness.
    pub async fn aggregate_readiness(&self) -> HealthResponse {
        let checks = self
            .run_checks()
            .await
            .into_iter()
            .filter(|c| c.affects_readiness)
            .collect();
        HealthResponse::from_checks(checks, self.start_time.elapsed())
    }

    async fn run_checks(&self) -> Vec<HealthCheck> {
        if let Some(ttl) = self.cache_ttl {
            if let Some((checks, at)) = self.cache.read().await.as_ref() {
                if at.elapsed() < ttl {
                    return checks.clone();
                }
            }
        }

        let mut checks = Vec::with_capacity(self.checks.len());
        for indicator in &self.checks {
            let start = Instant::now();
            let status = indicator.check().await;
            let (status, reason) = match status {
                HealthStatus::Up => (HealthCheckStatus::Up, None),
                HealthStatus::Down(reason) => {
                    tracing::warn!(check = indicator.name(), %reason, "health check down");
                    (HealthCheckStatus::Down, Some(reason))
                }
            };
            checks.push(HealthCheck {
                name: indicator.name().to_string(),
                status,
                reason,
                duration_ms: start.elapsed().as_millis() as u64,
                affects_readiness: indicator.affects_readiness(),
            });
        }

        if self.cache_ttl.is_some() {
            *self.cache.write().await = Some((checks.clone(), Instant::now()));
        }
        checks
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = state.aggregate().await;
    (response.status_code(), Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = state.aggregate_readiness().await;
    (response.status_code(), Json(response))
}
