//! Cost tracking adapter.
//!
//! Polls the cost service and broadcasts a `cost_update` to every session
//! when the figure moves by more than the significance threshold. Small
//! jitter below the threshold is suppressed to avoid noisy broadcasts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::event::{BudgetPeriod, CostUpdatePayload, EventKind};
use crate::metrics::UPSTREAM_ERRORS_TOTAL;
use crate::router::MessageRouter;

use super::backoff::ExponentialBackoff;

const ADAPTER: &str = "cost";

/// Minimum absolute change in dollars that triggers a broadcast.
const COST_DELTA_THRESHOLD: f64 = 0.01;

/// Snapshot returned by the cost service.
#[derive(Debug, Clone, Deserialize)]
struct CostSnapshot {
    #[serde(default)]
    current_cost: f64,
    #[serde(default)]
    budget_remaining: f64,
    #[serde(default)]
    cost_breakdown: HashMap<String, f64>,
    #[serde(default)]
    period: BudgetPeriod,
}

pub struct CostAdapter {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    router: Arc<MessageRouter>,
    shutdown: broadcast::Sender<()>,
}

impl CostAdapter {
    pub fn new(
        client: reqwest::Client,
        url: String,
        poll_interval: Duration,
        router: Arc<MessageRouter>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            client,
            url,
            poll_interval,
            router,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            url = %self.url,
            interval_secs = self.poll_interval.as_secs(),
            "Starting cost adapter"
        );
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = ExponentialBackoff::new();
        let mut last_broadcast: Option<f64> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cost adapter stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.poll().await {
                        Ok(snapshot) => {
                            backoff.reset();
                            if significant_change(last_broadcast, snapshot.current_cost) {
                                last_broadcast = Some(snapshot.current_cost);
                                self.broadcast(snapshot);
                            }
                        }
                        Err(e) => {
                            UPSTREAM_ERRORS_TOTAL.with_label_values(&[ADAPTER]).inc();
                            let delay = backoff.next_delay();
                            tracing::warn!(
                                url = %self.url,
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "Cost poll failed"
                            );
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    tracing::info!("Cost adapter stopped");
                                    return;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    async fn poll(&self) -> anyhow::Result<CostSnapshot> {
        let snapshot = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<CostSnapshot>()
            .await?;
        Ok(snapshot)
    }

    fn broadcast(&self, snapshot: CostSnapshot) {
        let payload = CostUpdatePayload {
            current_cost: snapshot.current_cost,
            budget_remaining: snapshot.budget_remaining,
            cost_breakdown: snapshot.cost_breakdown,
            period: snapshot.period,
        };
        match serde_json::to_value(&payload) {
            Ok(data) => {
                tracing::debug!(current_cost = payload.current_cost, "Broadcasting cost update");
                self.router.broadcast(EventKind::CostUpdate, data);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode cost update");
            }
        }
    }
}

/// True when the cost moved enough since the last broadcast to matter.
fn significant_change(last_broadcast: Option<f64>, current: f64) -> bool {
    match last_broadcast {
        None => true,
        Some(last) => (current - last).abs() > COST_DELTA_THRESHOLD,
    }
}
