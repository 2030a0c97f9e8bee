//! Rolling per-service latency and error-rate tracking.

use crate::config::HealthConfig;
use crate::core::HealthStatus;
use crate::utils::{millis, now_utc, Timestamp};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Serializable view of one service's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Service name.
    pub service: String,
    /// EMA of call latency in milliseconds.
    pub ema_latency_ms: f64,
    /// EMA of the failure indicator (0 for success, 1 for failure).
    pub ema_error_rate: f64,
    /// Wall-clock time of the last recorded call.
    pub last_heartbeat: Timestamp,
    /// Derived status.
    pub status: HealthStatus,
    /// Lifetime successful calls.
    pub successes: u64,
    /// Lifetime failed calls.
    pub failures: u64,
}

#[derive(Debug)]
struct HealthRecord {
    ema_latency_ms: f64,
    ema_error_rate: f64,
    last_heartbeat: Instant,
    last_heartbeat_at: Timestamp,
    successes: u64,
    failures: u64,
    stale: bool,
}

impl HealthRecord {
    fn seeded(duration: Duration, success: bool) -> Self {
        Self {
            ema_latency_ms: millis(duration) as f64,
            ema_error_rate: if success { 0.0 } else { 1.0 },
            last_heartbeat: Instant::now(),
            last_heartbeat_at: now_utc(),
            successes: u64::from(success),
            failures: u64::from(!success),
            stale: false,
        }
    }

    fn observe(&mut self, alpha: f64, duration: Duration, success: bool) {
        let latency = millis(duration) as f64;
        let error = if success { 0.0 } else { 1.0 };
        self.ema_latency_ms = alpha.mul_add(latency, (1.0 - alpha) * self.ema_latency_ms);
        self.ema_error_rate = alpha.mul_add(error, (1.0 - alpha) * self.ema_error_rate);
        self.last_heartbeat = Instant::now();
        self.last_heartbeat_at = now_utc();
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.stale = false;
    }

    fn status(&self, threshold: f64) -> HealthStatus {
        if self.stale {
            HealthStatus::Failed
        } else if self.ema_error_rate <= threshold {
            HealthStatus::Healthy
        } else if self.ema_error_rate <= threshold * 2.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Failed
        }
    }
}

/// Health of every named service, shared by all runs.
///
/// Records live in a concurrent map and each carries its own lock, so
/// updates to different services never contend.
#[derive(Debug)]
pub struct HealthRegistry {
    config: HealthConfig,
    services: DashMap<String, Arc<Mutex<HealthRecord>>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            services: DashMap::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Records one call to `service`.
    ///
    /// The first observation seeds both averages directly.
    pub fn record(&self, service: &str, duration: Duration, success: bool) {
        if let Some(record) = self.lookup(service) {
            let mut record = record.lock();
            let before = record.status(self.config.failover_threshold);
            record.observe(self.config.alpha, duration, success);
            let after = record.status(self.config.failover_threshold);
            if before != after {
                warn!(
                    service = %service,
                    from = %before,
                    to = %after,
                    error_rate = record.ema_error_rate,
                    "Service health changed"
                );
            }
            return;
        }

        // First sight; another caller may have raced us to the insert.
        let mut created = false;
        let record = {
            let entry = self.services.entry(service.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(HealthRecord::seeded(duration, success)))
            });
            Arc::clone(entry.value())
        };
        if created {
            debug!(service = %service, success, duration_ms = millis(duration), "Health record created");
        } else {
            record.lock().observe(self.config.alpha, duration, success);
        }
    }

    /// Current status of `service`. Services never seen are healthy.
    #[must_use]
    pub fn status(&self, service: &str) -> HealthStatus {
        self.lookup(service)
            .map_or(HealthStatus::Healthy, |r| r.lock().status(self.config.failover_threshold))
    }

    /// Snapshot of one service, if it has been recorded.
    #[must_use]
    pub fn snapshot(&self, service: &str) -> Option<ServiceHealth> {
        self.lookup(service).map(|record| self.view(service, &record.lock()))
    }

    /// Snapshots of every known service, sorted by name.
    #[must_use]
    pub fn report(&self) -> Vec<ServiceHealth> {
        let mut report: Vec<ServiceHealth> = self
            .services
            .iter()
            .map(|entry| self.view(entry.key(), &entry.value().lock()))
            .collect();
        report.sort_by(|a, b| a.service.cmp(&b.service));
        report
    }

    /// Marks services without a recent heartbeat as failed.
    ///
    /// Returns the names newly marked by this sweep.
    pub fn sweep(&self) -> Vec<String> {
        let stale_after = self.config.stale_after();
        let now = Instant::now();
        let mut marked = Vec::new();

        for entry in &self.services {
            let mut record = entry.value().lock();
            if !record.stale && now.duration_since(record.last_heartbeat) > stale_after {
                record.stale = true;
                marked.push(entry.key().clone());
            }
        }

        for service in &marked {
            warn!(service = %service, stale_after_ms = millis(stale_after), "No heartbeat, marking service failed");
        }
        marked.sort();
        marked
    }

    /// Number of services recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn lookup(&self, service: &str) -> Option<Arc<Mutex<HealthRecord>>> {
        self.services.get(service).map(|entry| Arc::clone(entry.value()))
    }

    fn view(&self, service: &str, record: &HealthRecord) -> ServiceHealth {
        ServiceHealth {
            service: service.to_string(),
            ema_latency_ms: record.ema_latency_ms,
            ema_error_rate: record.ema_error_rate,
            last_heartbeat: record.last_heartbeat_at,
            status: record.status(self.config.failover_threshold),
            successes: record.successes,
            failures: record.failures,
        }
    }
}
