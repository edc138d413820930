//! Service health adapter.
//!
//! Probes each producer's `/health` endpoint on an interval, aggregates
//! per-service statuses into one `system_status` snapshot with alerts, and
//! broadcasts it when the per-service status set changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::event::{
    Alert, AlertLevel, EventKind, ServiceHealth, ServiceStatus, SystemStatusPayload,
};
use crate::metrics::UPSTREAM_ERRORS_TOTAL;
use crate::router::MessageRouter;

const ADAPTER: &str = "health";

/// Per-probe timeout, independent of the polling interval.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Response time above which a healthy service still raises an alert.
const SLOW_RESPONSE_SECS: f64 = 5.0;

/// One monitored `/health` endpoint.
#[derive(Debug, Clone)]
pub struct HealthTarget {
    pub name: String,
    pub url: String,
}

pub struct HealthAdapter {
    client: reqwest::Client,
    targets: Vec<HealthTarget>,
    poll_interval: Duration,
    router: Arc<MessageRouter>,
    shutdown: broadcast::Sender<()>,
}

impl HealthAdapter {
    pub fn new(
        client: reqwest::Client,
        targets: Vec<HealthTarget>,
        poll_interval: Duration,
        router: Arc<MessageRouter>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            client,
            targets,
            poll_interval,
            router,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            targets = self.targets.len(),
            interval_secs = self.poll_interval.as_secs(),
            "Starting health adapter"
        );
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_statuses: Option<BTreeMap<String, ServiceStatus>> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Health adapter stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let services = self.probe_all().await;
                    let statuses: BTreeMap<String, ServiceStatus> =
                        services.iter().map(|(k, v)| (k.clone(), v.status)).collect();

                    if last_statuses.as_ref() != Some(&statuses) {
                        self.broadcast(&services);
                        last_statuses = Some(statuses);
                    }
                }
            }
        }
    }

    async fn probe_all(&self) -> BTreeMap<String, ServiceHealth> {
        let probes = self.targets.iter().map(|target| async {
            let health = self.probe(target).await;
            (target.name.clone(), health)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    async fn probe(&self, target: &HealthTarget) -> ServiceHealth {
        let start = Instant::now();
        let result = tokio::time::timeout(PROBE_TIMEOUT, self.client.get(&target.url).send()).await;
        let response_time = start.elapsed().as_secs_f64();

        match result {
            Ok(Ok(response)) if response.status().is_success() => ServiceHealth {
                status: ServiceStatus::Healthy,
                response_time: Some(response_time),
                last_check: Utc::now(),
                error: None,
            },
            Ok(Ok(response)) => ServiceHealth {
                status: ServiceStatus::Unhealthy,
                response_time: Some(response_time),
                last_check: Utc::now(),
                error: Some(format!("HTTP {}", response.status().as_u16())),
            },
            Ok(Err(e)) => {
                UPSTREAM_ERRORS_TOTAL.with_label_values(&[ADAPTER]).inc();
                ServiceHealth {
                    status: ServiceStatus::Unreachable,
                    response_time: None,
                    last_check: Utc::now(),
                    error: Some(e.to_string()),
                }
            }
            Err(_elapsed) => {
                UPSTREAM_ERRORS_TOTAL.with_label_values(&[ADAPTER]).inc();
                ServiceHealth {
                    status: ServiceStatus::Unreachable,
                    response_time: None,
                    last_check: Utc::now(),
                    error: Some("health probe timed out".to_string()),
                }
            }
        }
    }

    fn broadcast(&self, services: &BTreeMap<String, ServiceHealth>) {
        let payload = SystemStatusPayload {
            overall_status: overall_status(services),
            alerts: generate_alerts(services),
            services: services.clone(),
        };
        tracing::info!(
            overall_status = ?payload.overall_status,
            alerts = payload.alerts.len(),
            "Broadcasting system status"
        );
        match serde_json::to_value(&payload) {
            Ok(data) => self.router.broadcast(EventKind::SystemStatus, data),
            Err(e) => tracing::warn!(error = %e, "Failed to encode system status"),
        }
    }
}

/// The worst status across all services; healthy when there are none.
fn overall_status(services: &BTreeMap<String, ServiceHealth>) -> ServiceStatus {
    services
        .values()
        .map(|h| h.status)
        .max_by_key(|s| s.severity())
        .unwrap_or(ServiceStatus::Healthy)
}

/// One alert per non-healthy service, plus a warning for slow responders.
fn generate_alerts(services: &BTreeMap<String, ServiceHealth>) -> Vec<Alert> {
    let now = Utc::now();
    let mut alerts = Vec::new();

    for (name, health) in services {
        match health.status {
            ServiceStatus::Healthy => {}
            ServiceStatus::Unhealthy => alerts.push(Alert {
                level: AlertLevel::Warning,
                service: name.clone(),
                message: format!("Service {} is unhealthy", name),
                timestamp: now,
            }),
            ServiceStatus::Unreachable => alerts.push(Alert {
                level: AlertLevel::Error,
                service: name.clone(),
                message: format!("Service {} is unreachable", name),
                timestamp: now,
            }),
        }

        if let Some(response_time) = health.response_time {
            if response_time > SLOW_RESPONSE_SECS {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    service: name.clone(),
                    message: format!(
                        "Service {} responding slowly ({:.1}s)",
                        name, response_time
                    ),
                    timestamp: now,
                });
            }
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(status: ServiceStatus, response_time: Option<f64>) -> ServiceHealth {
        ServiceHealth {
            status,
            response_time,
            last_check: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn overall_status_is_worst() {
        let mut services = BTreeMap::new();
        services.insert("a".into(), health(ServiceStatus::Healthy, Some(0.1)));
        services.insert("b".into(), health(ServiceStatus::Unhealthy, Some(0.2)));
        assert_eq!(overall_status(&services), ServiceStatus::Unhealthy);

        services.insert("c".into(), health(ServiceStatus::Unreachable, None));
        assert_eq!(overall_status(&services), ServiceStatus::Unreachable);
    }

    #[test]
    fn overall_status_healthy_when_empty_or_all_healthy() {
        assert_eq!(overall_status(&BTreeMap::new()), ServiceStatus::Healthy);

        let mut services = BTreeMap::new();
        services.insert("a".into(), health(ServiceStatus::Healthy, Some(0.1)));
        assert_eq!(overall_status(&services), ServiceStatus::Healthy);
    }

    #[test]
    fn alerts_match_statuses() {
        let mut services = BTreeMap::new();
        services.insert("ok".into(), health(ServiceStatus::Healthy, Some(0.1)));
        services.insert("warn".into(), health(ServiceStatus::Unhealthy, Some(0.2)));
        services.insert("down".into(), health(ServiceStatus::Unreachable, None));

        let alerts = generate_alerts(&services);
        assert_eq!(alerts.len(), 2);

        let down = alerts.iter().find(|a| a.service == "down").unwrap();
        assert_eq!(down.level, AlertLevel::Error);
        let warn = alerts.iter().find(|a| a.service == "warn").unwrap();
        assert_eq!(warn.level, AlertLevel::Warning);
    }

    #[test]
    fn slow_healthy_service_raises_warning() {
        let mut services = BTreeMap::new();
        services.insert("slow".into(), health(ServiceStatus::Healthy, Some(6.5)));

        let alerts = generate_alerts(&services);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert!(alerts[0].message.contains("slowly"));
    }
}
