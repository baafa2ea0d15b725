//! Server-sent events transport over HTTP.

use std::time::Duration;

use reqwest::header::ACCEPT;
use tokio::sync::mpsc;

use super::{EventStream, SseParser, Transport, TransportError, TransportEvent, EVENT_BUFFER};
use crate::sample::TargetId;

/// Event name the server sends once the stream is established.
pub const CONFIRM_EVENT: &str = "connected";
/// Event name carrying a metrics payload.
pub const DATA_EVENT: &str = "metrics";

/// Opens `GET {base_url}/api/instances/{id}/metrics/stream` per target.
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    /// Create a transport for the server at `base_url`.
    ///
    /// A bare `host:port` is treated as plain HTTP.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(TransportError::InvalidUrl("empty base URL".to_string()));
        }

        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("http://{}", base_url)
        };

        // No overall timeout: the response body never ends on a healthy stream.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Stream endpoint of `target_id`.
    pub fn stream_url(&self, target_id: TargetId) -> String {
        format!("{}/api/instances/{}/metrics/stream", self.base_url, target_id)
    }
}

impl Transport for SseTransport {
    fn open(&self, target_id: TargetId) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client = self.client.clone();
        let url = self.stream_url(target_id);

        let producer = tokio::spawn(async move {
            tracing::debug!("SseTransport: connecting to {}", url);
            if let Err(e) = run_stream(&client, &url, &tx).await {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
            }
            let _ = tx.send(TransportEvent::Closed).await;
        });

        EventStream::new(rx, producer)
    }
}

/// Read the event stream at `url` until it ends or the receiver goes away.
async fn run_stream(
    client: &reqwest::Client,
    url: &str,
    tx: &mpsc::Sender<TransportEvent>,
) -> Result<(), TransportError> {
    let mut response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let mut parser = SseParser::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TransportError::Body(e.to_string()))?
    {
        for event in parser.feed(&chunk) {
            let mapped = match event.event.as_str() {
                CONFIRM_EVENT => TransportEvent::Open,
                DATA_EVENT => TransportEvent::Data(event.data),
                other => {
                    tracing::trace!("SseTransport: ignoring event {:?} from {}", other, url);
                    continue;
                }
            };

            if tx.send(mapped).await.is_err() {
                // Connection was dropped by its owner.
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let transport = tokio_test::assert_ok!(SseTransport::new("metrics.local:8080/"));
        assert_eq!(
            transport.stream_url(12),
            "http://metrics.local:8080/api/instances/12/metrics/stream"
        );

        let transport = tokio_test::assert_ok!(SseTransport::new("https://example.com"));
        assert_eq!(
            transport.stream_url(1),
            "https://example.com/api/instances/1/metrics/stream"
        );
    }

    #[test]
    fn test_empty_base_url() {
        assert!(matches!(
            SseTransport::new("  "),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error_then_close() {
        let transport = SseTransport::new("http://127.0.0.1:1").unwrap();
        let mut stream = transport.open(1);

        assert!(matches!(stream.next().await, Some(TransportEvent::Error(_))));
        assert_eq!(stream.next().await, Some(TransportEvent::Closed));
    }
}
