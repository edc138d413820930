//! Chat token stream adapter.
//!
//! Consumes an NDJSON stream of token fragments from the LLM backend and
//! publishes each as a `chat_stream` event for its session.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::event::{ChatStreamPayload, Event, EventKind};
use crate::metrics::{UPSTREAM_ERRORS_TOTAL, UPSTREAM_RECONNECTS_TOTAL};
use crate::router::MessageRouter;

use super::backoff::ExponentialBackoff;
use super::{stream_ndjson, StreamEnd};

const ADAPTER: &str = "chat";

/// One NDJSON line from the chat backend.
#[derive(Debug, Deserialize)]
struct ChatFragment {
    session_id: String,
    #[serde(default)]
    delta: String,
    #[serde(default)]
    token_count: u64,
    #[serde(default)]
    is_complete: bool,
}

pub struct ChatStreamAdapter {
    client: reqwest::Client,
    url: String,
    router: Arc<MessageRouter>,
    shutdown: broadcast::Sender<()>,
}

impl ChatStreamAdapter {
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
        tracing::info!(url = %self.url, "Starting chat stream adapter");
        let mut backoff = ExponentialBackoff::new();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let result = stream_ndjson(&self.client, &self.url, &mut shutdown_rx, |line| {
                self.handle_fragment(line)
            })
            .await;

            let delay = match result {
                Ok((StreamEnd::Shutdown, _)) => {
                    tracing::info!("Chat stream adapter stopped");
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
                        "Chat stream ended, reconnecting"
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
                        "Chat stream error, reconnecting"
                    );
                    delay
                }
            };

            UPSTREAM_RECONNECTS_TOTAL.with_label_values(&[ADAPTER]).inc();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Chat stream adapter stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn handle_fragment(&self, line: &str) {
        let fragment: ChatFragment = match serde_json::from_str(line) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed chat fragment");
                return;
            }
        };

        let payload = ChatStreamPayload {
            delta: fragment.delta,
            token_count: fragment.token_count,
            is_complete: fragment.is_complete,
        };
        match Event::from_payload(EventKind::ChatStream, fragment.session_id, &payload) {
            Ok(event) => {
                self.router.publish(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode chat fragment");
            }
        }
    }
}
