//! # Alarm Health
//!
//! Rolling success/failure/latency windows per backend.
//!
//! The monitor is pure logic: callers report call outcomes and read back a
//! [`HealthStatus`]. Only availability failures (unavailable, unknown,
//! timeouts) count as failures. A backend that answers with a refusal is
//! still available.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use alarm_store::BackendKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one backend call as far as availability is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The backend answered (success or a definitive refusal).
    Answered,
    /// Unavailable, unknown error or deadline expiry.
    Failed,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HealthError {
    #[error("window size must be positive")]
    EmptyWindow,
    #[error("thresholds must satisfy 0 < degraded ({degraded}) <= unavailable ({unavailable}) <= 1")]
    InvalidThresholds { degraded: f64, unavailable: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Maximum samples kept per backend.
    pub window_size: usize,
    /// Samples older than this expire.
    pub max_age: Duration,
    /// Failure ratio at or above which a backend is Degraded.
    pub degraded_ratio: f64,
    /// Failure ratio at or above which a backend is Unavailable.
    pub unavailable_ratio: f64,
    /// Fewer samples than this always reads as Healthy.
    pub min_samples: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            max_age: Duration::from_secs(300),
            degraded_ratio: 0.25,
            unavailable_ratio: 0.6,
            min_samples: 4,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.window_size == 0 {
            return Err(HealthError::EmptyWindow);
        }
        let ok = self.degraded_ratio > 0.0
            && self.degraded_ratio <= self.unavailable_ratio
            && self.unavailable_ratio <= 1.0;
        if !ok {
            return Err(HealthError::InvalidThresholds {
                degraded: self.degraded_ratio,
                unavailable: self.unavailable_ratio,
            });
        }
        Ok(())
    }
}

/// A status change worth broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub backend: BackendKind,
    pub from: HealthStatus,
    pub to: HealthStatus,
}

/// Point-in-time view of one backend's window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: BackendKind,
    pub status: HealthStatus,
    pub samples: usize,
    pub failures: usize,
    pub failure_ratio: f64,
    pub mean_latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    failed: bool,
    latency: Duration,
}

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<Sample>,
    status: HealthStatus,
}

impl Window {
    fn expire(&mut self, now: Instant, max_age: Duration) {
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.at) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> usize {
        self.samples.iter().filter(|s| s.failed).count()
    }

    fn evaluate(&self, config: &HealthConfig) -> HealthStatus {
        let total = self.samples.len();
        if total == 0 || total < config.min_samples {
            return HealthStatus::Healthy;
        }
        let ratio = self.failures() as f64 / total as f64;
        if ratio >= config.unavailable_ratio {
            HealthStatus::Unavailable
        } else if ratio >= config.degraded_ratio {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Re-evaluates and returns the previous status if it changed.
    fn settle(&mut self, config: &HealthConfig) -> Option<HealthStatus> {
        let next = self.evaluate(config);
        if next == self.status {
            return None;
        }
        let previous = self.status;
        self.status = next;
        Some(previous)
    }
}

/// Per-backend health tracking. Each backend has its own lock.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    native: Mutex<Window>,
    legacy: Mutex<Window>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Result<Self, HealthError> {
        config.validate()?;
        Ok(Self {
            config,
            native: Mutex::new(Window::default()),
            legacy: Mutex::new(Window::default()),
        })
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn window(&self, backend: BackendKind) -> &Mutex<Window> {
        match backend {
            BackendKind::Native => &self.native,
            BackendKind::Legacy => &self.legacy,
        }
    }

    /// Records one call. Returns the transition if the status changed.
    pub fn record(
        &self,
        backend: BackendKind,
        outcome: CallOutcome,
        latency: Duration,
    ) -> Option<HealthTransition> {
        self.record_at(backend, outcome, latency, Instant::now())
    }

    pub fn record_at(
        &self,
        backend: BackendKind,
        outcome: CallOutcome,
        latency: Duration,
        now: Instant,
    ) -> Option<HealthTransition> {
        let mut window = self.window(backend).lock();
        window.samples.push_back(Sample {
            at: now,
            failed: outcome == CallOutcome::Failed,
            latency,
        });
        while window.samples.len() > self.config.window_size {
            window.samples.pop_front();
        }
        window.expire(now, self.config.max_age);
        let from = window.settle(&self.config)?;
        let transition = HealthTransition {
            backend,
            from,
            to: window.status,
        };
        log_transition(&transition);
        Some(transition)
    }

    /// Current status, after expiring old samples.
    pub fn status(&self, backend: BackendKind) -> HealthStatus {
        let mut window = self.window(backend).lock();
        window.expire(Instant::now(), self.config.max_age);
        window.evaluate(&self.config)
    }

    /// Expires old samples on both backends and reports resulting transitions.
    pub fn refresh(&self) -> Vec<HealthTransition> {
        self.refresh_at(Instant::now())
    }

    pub fn refresh_at(&self, now: Instant) -> Vec<HealthTransition> {
        BackendKind::ALL
            .into_iter()
            .filter_map(|backend| {
                let mut window = self.window(backend).lock();
                window.expire(now, self.config.max_age);
                let from = window.settle(&self.config)?;
                let transition = HealthTransition {
                    backend,
                    from,
                    to: window.status,
                };
                log_transition(&transition);
                Some(transition)
            })
            .collect()
    }

    pub fn snapshot(&self) -> Vec<BackendHealth> {
        BackendKind::ALL
            .into_iter()
            .map(|backend| {
                let mut window = self.window(backend).lock();
                window.expire(Instant::now(), self.config.max_age);
                let samples = window.samples.len();
                let failures = window.failures();
                let mean_latency_ms = (samples > 0).then(|| {
                    let total: Duration = window.samples.iter().map(|s| s.latency).sum();
                    (total / samples as u32).as_millis() as u64
                });
                BackendHealth {
                    backend,
                    status: window.evaluate(&self.config),
                    samples,
                    failures,
                    failure_ratio: if samples == 0 {
                        0.0
                    } else {
                        failures as f64 / samples as f64
                    },
                    mean_latency_ms,
                }
            })
            .collect()
    }
}

fn log_transition(transition: &HealthTransition) {
    if transition.to == HealthStatus::Healthy {
        info!(
            backend = %transition.backend,
            from = %transition.from,
            "backend recovered"
        );
    } else {
        warn!(
            backend = %transition.backend,
            from = %transition.from,
            to = %transition.to,
            "backend health changed"
        );
    }
}
