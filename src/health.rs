//! Health aggregation over the upstream source and the repository.
//!
//! | Upstream | Repository | Overall |
//! |----------|------------|---------|
//! | any | unhealthy | `unhealthy` |
//! | unhealthy | healthy | `degraded` |
//! | healthy | healthy | `healthy` |
//!
//! The upstream probe is a real `fetch_random_quote` call, so it passes
//! through the retry loop and the circuit breaker like any other request.

use chrono::{DateTime, Utc};
use quote_relay_core::store::QuoteRepository;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::breaker::BreakerState;
use crate::config::Environment;
use crate::upstream::QuoteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamCheck {
    pub status: HealthStatus,
    /// Probe round-trip in milliseconds, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCheck {
    pub status: HealthStatus,
    pub quotes_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthChecks {
    pub upstream: UpstreamCheck,
    pub repository: RepositoryCheck,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the checker was created.
    pub uptime: f64,
    pub environment: String,
    pub circuit_breaker: BreakerState,
    pub checks: HealthChecks,
}

impl HealthReport {
    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

pub struct HealthCheck {
    source: Arc<dyn QuoteSource>,
    repository: Arc<dyn QuoteRepository>,
    environment: Environment,
    started: Instant,
}

impl HealthCheck {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        repository: Arc<dyn QuoteRepository>,
        environment: Environment,
    ) -> Self {
        Self {
            source,
            repository,
            environment,
            started: Instant::now(),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let upstream = self.check_upstream().await;
        let repository = self.check_repository();

        HealthReport {
            status: overall_status(&upstream, &repository),
            timestamp: Utc::now(),
            uptime: self.started.elapsed().as_secs_f64(),
            environment: self.environment.as_str().to_string(),
            circuit_breaker: self.source.breaker_state(),
            checks: HealthChecks {
                upstream,
                repository,
            },
        }
    }

    async fn check_upstream(&self) -> UpstreamCheck {
        let start = Instant::now();
        match self.source.fetch_random_quote().await {
            Ok(_) => UpstreamCheck {
                status: HealthStatus::Healthy,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => UpstreamCheck {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn check_repository(&self) -> RepositoryCheck {
        match self.repository.count() {
            Ok(count) => RepositoryCheck {
                status: HealthStatus::Healthy,
                quotes_count: count,
            },
            Err(e) => {
                tracing::error!(error = %e, "Repository health check failed");
                RepositoryCheck {
                    status: HealthStatus::Unhealthy,
                    quotes_count: 0,
                }
            }
        }
    }
}

pub fn overall_status(upstream: &UpstreamCheck, repository: &RepositoryCheck) -> HealthStatus {
    if repository.status == HealthStatus::Unhealthy {
        HealthStatus::Unhealthy
    } else if upstream.status == HealthStatus::Unhealthy {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
