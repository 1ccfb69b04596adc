//! Periodic health monitoring of downstream services.
//!
//! The monitor polls every registered [`HealthProbe`] on a fixed interval.
//! Each tick spawns one task per probe, bounded by the probe timeout, and
//! waits for all of them before updating records, so a slow or hung probe
//! never delays its siblings' results beyond the timeout.
//!
//! # Status rules
//!
//! | Condition                                               | Status    |
//! |---------------------------------------------------------|-----------|
//! | success rate < 0.1                                      | critical  |
//! | success rate < `unhealthy_threshold`                    | unhealthy |
//! | response time > `degraded_response_time` or rate < 0.9  | degraded  |
//! | otherwise                                               | healthy   |
//!
//! The success rate is taken over the last `success_window` checks. Timeouts,
//! probe errors and probe panics are failed checks; the record's metadata
//! carries `failure_kind` and `last_error` until the next success.
//!
//! # Example
//!
//! ```no_run
//! use llm_resilience_core::domain::HealthMonitorConfig;
//! use llm_resilience_engine::observability::HealthMonitor;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let monitor = HealthMonitor::new(HealthMonitorConfig::default());
//! monitor
//!     .register_fn("search", || async { Ok(true) }, HashMap::new())
//!     .await?;
//!
//! monitor.start()?;
//! // ...
//! monitor.stop().await;
//! println!("{:?}", monitor.overall_health().await.status);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use llm_resilience_core::domain::{
    HealthCheckEntry, HealthMonitorConfig, HealthRecord, HealthStatus, OverallHealth,
    ProbeFailureKind, META_FAILURE_KIND, META_LAST_ERROR,
};
use llm_resilience_core::traits::{AlertHandler, HealthAlert, HealthProbe};
use metrics::{counter, gauge};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::alerting::LoggingAlertHandler;
use crate::resilience::timeout::{with_timeout, TimeoutError};

/// Success rate below which a service is critical.
const CRITICAL_SUCCESS_RATE: f64 = 0.1;
/// Success rate below which a service is at least degraded.
const DEGRADED_SUCCESS_RATE: f64 = 0.9;
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Health monitor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthMonitorError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Health monitor is already running")]
    AlreadyRunning,

    #[error("Service already registered: {0}")]
    DuplicateService(String),
}

/// Adapts an async closure into a [`HealthProbe`].
pub struct FnProbe<F> {
    check: F,
}

impl<F> FnProbe<F> {
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn probe(&self) -> anyhow::Result<bool> {
        (self.check)().await
    }
}

/// Result of running one probe once
#[derive(Debug, Clone)]
struct ProbeOutcome {
    elapsed: Duration,
    failure: Option<(ProbeFailureKind, String)>,
}

struct ServiceEntry {
    probe: Arc<dyn HealthProbe>,
    registration_metadata: HashMap<String, String>,
    record: HealthRecord,
    recent: VecDeque<bool>,
    successes: u64,
    history: VecDeque<HealthCheckEntry>,
}

struct MonitorInner {
    config: HealthMonitorConfig,
    services: RwLock<HashMap<String, ServiceEntry>>,
    alert_handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls registered services and keeps a health record for each.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    running: Mutex<Option<RunningLoop>>,
}

impl HealthMonitor {
    /// Creates a monitor with a [`LoggingAlertHandler`] installed.
    pub fn new(config: HealthMonitorConfig) -> Self {
        let handlers: Vec<Arc<dyn AlertHandler>> = vec![Arc::new(LoggingAlertHandler)];
        Self::with_handlers(config, handlers)
    }

    pub fn with_handlers(config: HealthMonitorConfig, handlers: Vec<Arc<dyn AlertHandler>>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                services: RwLock::new(HashMap::new()),
                alert_handlers: RwLock::new(handlers),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.inner.config
    }

    pub async fn add_alert_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.inner.alert_handlers.write().await.push(handler);
    }

    /// Registers a service. Its record starts healthy until the first check.
    pub async fn register(
        &self,
        name: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
        metadata: HashMap<String, String>,
    ) -> Result<(), HealthMonitorError> {
        let name = name.into();
        let mut services = self.inner.services.write().await;
        if services.contains_key(&name) {
            return Err(HealthMonitorError::DuplicateService(name));
        }

        info!("Registering health probe for {}", name);
        gauge!("health_service_status", "service" => name.clone())
            .set(HealthStatus::Healthy.as_gauge());

        services.insert(
            name.clone(),
            ServiceEntry {
                probe,
                record: HealthRecord::new(name, metadata.clone()),
                registration_metadata: metadata,
                recent: VecDeque::with_capacity(self.inner.config.success_window),
                successes: 0,
                history: VecDeque::new(),
            },
        );
        Ok(())
    }

    /// Registers an async closure as a service probe.
    pub async fn register_fn<F, Fut>(
        &self,
        name: impl Into<String>,
        check: F,
        metadata: HashMap<String, String>,
    ) -> Result<(), HealthMonitorError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.register(name, Arc::new(FnProbe::new(check)), metadata)
            .await
    }

    /// Removes a service; returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        self.inner.services.write().await.remove(name).is_some()
    }

    pub async fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts the polling loop. The first tick runs immediately.
    pub fn start(&self) -> Result<(), HealthMonitorError> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                return Err(HealthMonitorError::AlreadyRunning);
            }
        }

        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(inner.config.check_interval.max(MIN_CHECK_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            biased;
                            _ = loop_token.cancelled() => break,
                            _ = inner.run_checks() => {}
                        }
                    }
                }
            }
            debug!("Health monitor loop exited");
        });

        info!(
            "Health monitor started with interval {:?}",
            self.inner.config.check_interval
        );
        *running = Some(RunningLoop { token, handle });
        Ok(())
    }

    /// Cancels the polling loop and waits for it to exit.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(RunningLoop { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await {
                error!("Health monitor loop ended abnormally: {}", e);
            }
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Runs one service's probe immediately and returns its updated record.
    pub async fn check_now(&self, name: &str) -> Result<HealthRecord, HealthMonitorError> {
        let probe = self
            .inner
            .services
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.probe))
            .ok_or_else(|| HealthMonitorError::UnknownService(name.to_string()))?;

        let outcome = run_probe(probe, self.inner.config.probe_timeout).await;
        self.inner
            .apply_outcomes(vec![(name.to_string(), outcome)])
            .await;

        self.service_health(name)
            .await
            .ok_or_else(|| HealthMonitorError::UnknownService(name.to_string()))
    }

    /// Runs every probe once, as a single tick would.
    pub async fn check_all(&self) {
        self.inner.run_checks().await;
    }

    pub async fn service_health(&self, name: &str) -> Option<HealthRecord> {
        self.inner
            .services
            .read()
            .await
            .get(name)
            .map(|entry| entry.record.clone())
    }

    pub async fn overall_health(&self) -> OverallHealth {
        let services = self
            .inner
            .services
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.record.clone()))
            .collect();
        OverallHealth::new(services)
    }

    /// Most recent check results for a service, oldest first.
    pub async fn history(&self, name: &str, limit: Option<usize>) -> Option<Vec<HealthCheckEntry>> {
        let services = self.inner.services.read().await;
        let entry = services.get(name)?;
        let skip = limit.map_or(0, |n| entry.history.len().saturating_sub(n));
        Some(entry.history.iter().skip(skip).cloned().collect())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(running) = running.as_ref() {
            running.token.cancel();
        }
    }
}

impl MonitorInner {
    async fn run_checks(&self) {
        let probes: Vec<(String, Arc<dyn HealthProbe>)> = self
            .services
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.probe)))
            .collect();

        if probes.is_empty() {
            return;
        }

        let timeout = self.config.probe_timeout;
        let checks = probes.into_iter().map(|(name, probe)| async move {
            let outcome = run_probe(probe, timeout).await;
            (name, outcome)
        });

        let outcomes = join_all(checks).await;
        self.apply_outcomes(outcomes).await;
    }

    async fn apply_outcomes(&self, outcomes: Vec<(String, ProbeOutcome)>) {
        let mut alerts = Vec::new();

        {
            let mut services = self.services.write().await;
            for (name, outcome) in outcomes {
                // Service may have been unregistered while its probe ran
                let Some(entry) = services.get_mut(&name) else {
                    continue;
                };
                if let Some(alert) = self.apply(entry, &outcome) {
                    alerts.push(alert);
                }
            }
        }

        if alerts.is_empty() {
            return;
        }
        let handlers = self.alert_handlers.read().await.clone();
        for alert in alerts {
            for handler in &handlers {
                handler.handle_alert(alert.clone()).await;
            }
        }
    }

    fn apply(&self, entry: &mut ServiceEntry, outcome: &ProbeOutcome) -> Option<HealthAlert> {
        let success = outcome.failure.is_none();
        let response_time_ms = outcome.elapsed.as_secs_f64() * 1000.0;
        let record = &mut entry.record;
        let previous = record.status;

        record.check_count += 1;
        record.last_check = Some(Utc::now());
        record.last_response_time_ms = Some(response_time_ms);
        record.metadata = entry.registration_metadata.clone();

        if entry.recent.len() >= self.config.success_window {
            entry.recent.pop_front();
        }
        entry.recent.push_back(success);

        counter!(
            "health_check_total",
            "service" => record.name.clone(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);

        match &outcome.failure {
            None => {
                entry.successes += 1;
                record.consecutive_failures = 0;
            }
            Some((kind, message)) => {
                record.error_count += 1;
                record.consecutive_failures += 1;
                record
                    .metadata
                    .insert(META_FAILURE_KIND.to_string(), kind.to_string());
                record
                    .metadata
                    .insert(META_LAST_ERROR.to_string(), message.clone());

                counter!(
                    "health_check_failures_total",
                    "service" => record.name.clone(),
                    "kind" => kind.to_string()
                )
                .increment(1);
                if *kind == ProbeFailureKind::Panic {
                    error!("Health probe for {} panicked: {}", record.name, message);
                } else {
                    warn!(
                        kind = %kind,
                        consecutive_failures = record.consecutive_failures,
                        "Health check failed for {}: {}",
                        record.name,
                        message
                    );
                }
            }
        }

        let recent_successes = entry.recent.iter().filter(|ok| **ok).count();
        record.success_rate = recent_successes as f64 / entry.recent.len() as f64;
        record.uptime_percentage = entry.successes as f64 / record.check_count as f64 * 100.0;
        record.status = evaluate_status(&self.config, record.success_rate, outcome.elapsed);

        if entry.history.len() >= self.config.history_size {
            entry.history.pop_front();
        }
        entry.history.push_back(HealthCheckEntry {
            timestamp: Utc::now(),
            success,
            response_time_ms,
            failure_kind: outcome.failure.as_ref().map(|(kind, _)| *kind),
            status: record.status,
        });

        gauge!("health_service_status", "service" => record.name.clone())
            .set(record.status.as_gauge());

        if record.status == previous {
            return None;
        }

        let mut message = format!(
            "{} changed from {} to {} (success rate {:.2})",
            record.name, previous, record.status, record.success_rate
        );
        if let Some(error) = record.metadata.get(META_LAST_ERROR) {
            message.push_str(&format!(", last error: {}", error));
        }

        Some(HealthAlert {
            service: record.name.clone(),
            previous,
            current: record.status,
            message,
            triggered_at: Utc::now(),
        })
    }
}

/// Maps a success rate and response time onto a status.
pub fn evaluate_status(
    config: &HealthMonitorConfig,
    success_rate: f64,
    response_time: Duration,
) -> HealthStatus {
    if success_rate < CRITICAL_SUCCESS_RATE {
        HealthStatus::Critical
    } else if success_rate < config.unhealthy_threshold {
        HealthStatus::Unhealthy
    } else if response_time > config.degraded_response_time || success_rate < DEGRADED_SUCCESS_RATE
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Aborts the wrapped probe task when the awaiting check is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs a probe in its own task, bounded by `timeout`.
///
/// Cancelling the check (for instance when the polling loop is stopped)
/// aborts the probe task instead of leaving it running detached.
async fn run_probe(probe: Arc<dyn HealthProbe>, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();
    let mut task = AbortOnDrop(tokio::spawn(async move {
        with_timeout(timeout, probe.probe()).await
    }));
    let joined = (&mut task.0).await;
    let elapsed = started.elapsed();

    let failure = match joined {
        Ok(Ok(true)) => None,
        Ok(Ok(false)) => Some((
            ProbeFailureKind::Negative,
            "probe reported the service as down".to_string(),
        )),
        Ok(Err(TimeoutError::Elapsed { elapsed })) => Some((
            ProbeFailureKind::Timeout,
            format!("probe timed out after {:?}", elapsed),
        )),
        Ok(Err(TimeoutError::Inner(e))) => Some((ProbeFailureKind::Exception, format!("{:#}", e))),
        Err(join_error) if join_error.is_panic() => {
            Some((ProbeFailureKind::Panic, "probe task panicked".to_string()))
        }
        Err(join_error) => Some((ProbeFailureKind::Exception, join_error.to_string())),
    };

    ProbeOutcome { elapsed, failure }
}
