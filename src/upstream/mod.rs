//! Upstream producer adapters.
//!
//! Each adapter is an independent long-lived task that turns one backend
//! producer into canonical event publishes. Streaming adapters reconnect
//! with exponential backoff; polling adapters back off between failed
//! polls. Upstream failure never takes the gateway down, it only shows up
//! as degraded `system_status`.

mod backoff;
mod chat;
mod cost;
mod health;
mod tool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use chat::ChatStreamAdapter;
pub use cost::CostAdapter;
pub use health::{HealthAdapter, HealthTarget};
pub use tool::ToolProgressAdapter;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{Settings, UpstreamConfig};
use crate::router::MessageRouter;

/// Why an NDJSON stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    Shutdown,
    Eof,
}

/// Read an NDJSON response line by line, invoking `on_line` per non-empty
/// line, until EOF or shutdown. Returns how it ended and the line count.
pub(crate) async fn stream_ndjson<F>(
    client: &reqwest::Client,
    url: &str,
    shutdown: &mut broadcast::Receiver<()>,
    mut on_line: F,
) -> anyhow::Result<(StreamEnd, u64)>
where
    F: FnMut(&str),
{
    let response = client.get(url).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut lines = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok((StreamEnd::Shutdown, lines)),
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        if let Ok(text) = std::str::from_utf8(&raw[..raw.len() - 1]) {
                            let text = text.trim();
                            if !text.is_empty() {
                                lines += 1;
                                on_line(text);
                            }
                        }
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok((StreamEnd::Eof, lines)),
            }
        }
    }
}

/// Spawn one task per configured adapter. Returns the join handles so the
/// binary can await them during shutdown.
pub fn spawn_adapters(
    settings: &Settings,
    router: Arc<MessageRouter>,
    shutdown: &broadcast::Sender<()>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let upstream = settings.upstream.clone();
    let mut handles = Vec::new();

    // Streams stay open indefinitely, so only bound the connect phase;
    // polls get a full request timeout.
    let streaming_client = reqwest::Client::builder()
        .connect_timeout(upstream.request_timeout())
        .build()?;
    let polling_client = reqwest::Client::builder()
        .timeout(upstream.request_timeout())
        .build()?;

    if let Some(url) = upstream.chat_url.clone() {
        let adapter = ChatStreamAdapter::new(
            streaming_client.clone(),
            url,
            router.clone(),
            shutdown.clone(),
        );
        handles.push(tokio::spawn(async move { adapter.run().await }));
    }

    if let Some(url) = upstream.tool_url.clone() {
        let adapter =
            ToolProgressAdapter::new(streaming_client, url, router.clone(), shutdown.clone());
        handles.push(tokio::spawn(async move { adapter.run().await }));
    }

    if let Some(url) = upstream.cost_url.clone() {
        let adapter = CostAdapter::new(
            polling_client.clone(),
            url,
            Duration::from_secs(upstream.cost_poll_interval_secs),
            router.clone(),
            shutdown.clone(),
        );
        handles.push(tokio::spawn(async move { adapter.run().await }));
    }

    let targets = health_targets(&upstream);
    if !targets.is_empty() {
        let adapter = HealthAdapter::new(
            polling_client,
            targets,
            Duration::from_secs(upstream.health_poll_interval_secs),
            router,
            shutdown.clone(),
        );
        handles.push(tokio::spawn(async move { adapter.run().await }));
    }

    Ok(handles)
}

/// Derive `/health` probe targets from the configured producer endpoints.
fn health_targets(upstream: &UpstreamConfig) -> Vec<HealthTarget> {
    let candidates = [
        ("chat", upstream.chat_url.as_deref()),
        ("tool", upstream.tool_url.as_deref()),
        ("cost", upstream.cost_url.as_deref()),
    ];

    let mut targets = Vec::new();
    for (name, url) in candidates {
        let Some(url) = url else { continue };
        match reqwest::Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_path("/health");
                parsed.set_query(None);
                targets.push(HealthTarget {
                    name: name.to_string(),
                    url: parsed.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(name, url, error = %e, "Skipping unparsable upstream URL");
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_targets_use_service_origin() {
        let upstream = UpstreamConfig {
            chat_url: Some("http://chat.internal:9100/stream/chat?mode=live".into()),
            tool_url: None,
            cost_url: Some("http://cost.internal:9200/api/costs".into()),
            ..Default::default()
        };

        let targets = health_targets(&upstream);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "chat");
        assert_eq!(targets[0].url, "http://chat.internal:9100/health");
        assert_eq!(targets[1].name, "cost");
        assert_eq!(targets[1].url, "http://cost.internal:9200/health");
    }

    #[test]
    fn health_targets_empty_without_upstreams() {
        assert!(health_targets(&UpstreamConfig::default()).is_empty());
    }
}
