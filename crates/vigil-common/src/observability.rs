//! Structured logging setup and lightweight health-check types.
//!
//! The intake core never ships logs anywhere itself — remote shipping and
//! telemetry batching are out of scope (§1) — but it does own its own
//! process-local structured logging, which this module wires up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the global `tracing` subscriber. `json` selects the
/// machine-readable formatter (production); otherwise a human-readable
/// pretty formatter is used (local development). Falls back to `info`
/// level when `RUST_LOG` is unset.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter);

    if json {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one owned resource (a registrar socket, a per-worker ring).
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        ComponentHealth {
            name: name.into(),
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, detail: impl Into<String>) -> Self {
        ComponentHealth {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregates component health for an `Offline` status-printing routine.
#[derive(Debug, Default)]
pub struct HealthChecker {
    components: Vec<ComponentHealth>,
}

impl HealthChecker {
    pub fn new() -> Self {
        HealthChecker::default()
    }

    pub fn record(&mut self, component: ComponentHealth) {
        self.components.push(component);
    }

    pub fn overall(&self) -> HealthStatus {
        if self
            .components
            .iter()
            .any(|c| c.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if self
            .components
            .iter()
            .any(|c| c.status == HealthStatus::Degraded)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn components(&self) -> &[ComponentHealth] {
        &self.components
    }
}

/// Monotonic epoch-millisecond timestamp helper used by audit/incident
/// records; avoids pulling `chrono::Utc::now()` into hot paths that only
/// need a sortable timestamp.
pub fn epoch_millis() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    LAST.store(now, Ordering::Relaxed);
    now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_health_escalates_to_worst_component() {
        let mut checker = HealthChecker::new();
        checker.record(ComponentHealth::healthy("registrar"));
        assert_eq!(checker.overall(), HealthStatus::Healthy);

        checker.record(ComponentHealth::unhealthy("ring", "corrupted"));
        assert_eq!(checker.overall(), HealthStatus::Unhealthy);
    }

    #[test]
    fn epoch_millis_is_nonzero() {
        assert!(epoch_millis() > 0);
    }
}
