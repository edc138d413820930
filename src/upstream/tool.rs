//! Tool execution progress adapter.
//!
//! Consumes an NDJSON stream of progress updates from the tool executor
//! and publishes each as a `tool_progress` event for its session.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::event::{Event, EventKind, ToolProgressPayload};
use crate::metrics::{UPSTREAM_ERRORS_TOTAL, UPSTREAM_RECONNECTS_TOTAL};
use crate::router::MessageRouter;

use super::backoff::ExponentialBackoff;
use super::{stream_ndjson, StreamEnd};

const ADAPTER: &str = "tool";

/// One NDJSON line from the tool executor.
#[derive(Debug, Deserialize)]
struct ToolFragment {
    session_id: String,
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

pub struct ToolProgressAdapter {
    client: reqwest::Client,
    url: String,
    router: Arc<MessageRouter>,
    shutdown: broadcast::Sender<()>,
}

impl ToolProgressAdapter {
    pub fn new(
        client: reqwest::Client,
        url: String,
        router: Arc<MessageRouter>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            client,
            url,
            router,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(url = %self.url, "Starting tool progress adapter");
        let mut backoff = ExponentialBackoff::new();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let result = stream_ndjson(&self.client, &self.url, &mut shutdown_rx, |line| {
                self.handle_fragment(line)
            })
            .await;

            let delay = match result {
                Ok((StreamEnd::Shutdown, _)) => {
                    tracing::info!("Tool progress adapter stopped");
                    return;
                }
                Ok((StreamEnd::Eof, lines)) => {
                    if lines > 0 {
                        backoff.reset();
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        url = %self.url,
                        retry_in_ms = delay.as_millis() as u64,
                        "Tool progress stream ended, reconnecting"
                    );
                    delay
                }
                Err(e) => {
                    UPSTREAM_ERRORS_TOTAL.with_label_values(&[ADAPTER]).inc();
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        url = %self.url,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Tool progress stream error, reconnecting"
                    );
                    delay
                }
            };

            UPSTREAM_RECONNECTS_TOTAL.with_label_values(&[ADAPTER]).inc();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Tool progress adapter stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn handle_fragment(&self, line: &str) {
        let fragment: ToolFragment = match serde_json::from_str(line) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed tool progress fragment");
                return;
            }
        };

        let payload = ToolProgressPayload {
            tool_name: fragment.tool_name,
            status: fragment.status,
            progress: fragment.progress,
            message: fragment.message,
            result: fragment.result,
        };
        match Event::from_payload(EventKind::ToolProgress, fragment.session_id, &payload) {
            Ok(event) => {
                self.router.publish(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode tool progress fragment");
            }
        }
    }
}
