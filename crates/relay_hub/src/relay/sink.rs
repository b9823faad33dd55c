//! Backend sink abstraction and its HTTP implementation.

use crate::relay::Envelope;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a single delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend responded with status {0}")]
    Status(u16),
}

/// Destination for forwarded envelopes.
///
/// Implementations accept one envelope per call. Failures are reported back
/// to the forwarder, which logs them and moves on.
#[async_trait]
pub trait BackendSink: Send + Sync {
    /// Attempts a single delivery of `envelope`.
    async fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError>;

    /// Whether the backend link is usable right now. The forwarder skips its
    /// tick, leaving the queue intact, while this returns `false`.
    fn is_link_up(&self) -> bool {
        true
    }

    /// Told when the caller's deadline cut a delivery short before the sink
    /// could report its own failure.
    fn on_timeout(&self) {}
}

/// POSTs each envelope as `application/json` to a fixed URL.
///
/// A transport failure (connect error, timeout) marks the link down for
/// `link_cooldown`; an error status from a reachable backend does not.
#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    link_cooldown: Duration,
    down_until: Mutex<Option<Instant>>,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration, link_cooldown: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            link_cooldown,
            down_until: Mutex::new(None),
        })
    }

    fn mark_link_down(&self) {
        *self.down_until.lock() = Some(Instant::now() + self.link_cooldown);
        warn!("🔌 Backend link marked down for {:?}", self.link_cooldown);
    }

    fn mark_link_up(&self) {
        *self.down_until.lock() = None;
    }
}

#[async_trait]
impl BackendSink for HttpSink {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let result = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(envelope.as_str().to_owned())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.mark_link_down();
                return Err(if e.is_timeout() {
                    SinkError::Timeout(self.timeout)
                } else {
                    SinkError::Transport(e.to_string())
                });
            }
        };

        self.mark_link_up();
        let status = response.status();
        if status.is_success() {
            debug!("📡 Backend accepted envelope ({})", status);
            Ok(())
        } else {
            Err(SinkError::Status(status.as_u16()))
        }
    }

    fn on_timeout(&self) {
        self.mark_link_down();
    }

    fn is_link_up(&self) -> bool {
        match *self.down_until.lock() {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink_for(server: &MockServer) -> HttpSink {
        HttpSink::new(
            format!("{}/api/esp32/data", server.uri()),
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_posts_envelope_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/esp32/data"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"type": "GPS", "lat": 1.0})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink_for(&server);
        sink.deliver(&Envelope::new(r#"{"type":"GPS","lat":1.0}"#))
            .await
            .unwrap();
        assert!(sink.is_link_up());
    }

    #[tokio::test]
    async fn test_error_status_keeps_link_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = sink_for(&server);
        let err = sink.deliver(&Envelope::new("{}")).await.unwrap_err();
        assert!(matches!(err, SinkError::Status(500)));
        assert!(sink.is_link_up());
    }

    #[tokio::test]
    async fn test_unreachable_backend_marks_link_down() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = HttpSink::new(
            format!("http://{}/api/esp32/data", addr),
            Duration::from_millis(500),
            Duration::from_secs(30),
        )
        .unwrap();

        let err = sink.deliver(&Envelope::new("{}")).await.unwrap_err();
        assert!(matches!(err, SinkError::Transport(_)));
        assert!(!sink.is_link_up());
    }

    #[tokio::test]
    async fn test_stalled_backend_pauses_forwarding() {
        use crate::relay::{Forwarder, RelayQueue, TickOutcome};
        use std::sync::Arc;

        // Accepts TCP but never answers a request.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        // The client deadline is far beyond the forwarder's, so only the
        // forwarder's cut-off can take the link down.
        let sink = Arc::new(
            HttpSink::new(
                format!("http://{}/api/esp32/data", addr),
                Duration::from_secs(30),
                Duration::from_secs(30),
            )
            .unwrap(),
        );
        let queue = Arc::new(RelayQueue::new(10));
        for body in ["{\"seq\":1}", "{\"seq\":2}", "{\"seq\":3}"] {
            queue.enqueue(Envelope::new(body));
        }
        let forwarder = Forwarder::new(queue.clone(), sink.clone(), Duration::from_millis(100));

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(forwarder.tick().await);
        }

        assert_eq!(outcomes, vec![TickOutcome::Failed, TickOutcome::LinkDown, TickOutcome::LinkDown]);
        assert!(!sink.is_link_up());
        assert_eq!(queue.len(), 2);
    }
}
