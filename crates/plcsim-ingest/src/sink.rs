//! ---
//! plcsim_section: "06-ingest"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Time-series point sinks: in-memory and HTTP line protocol."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plcsim_transport::backoff_delay;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::transform::DataPoint;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("write request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sink rejected write with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("sink write failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Destination for transformed points.
#[async_trait]
pub trait PointSink: Send + Sync {
    async fn write(&self, points: &[DataPoint]) -> Result<(), SinkError>;

    fn name(&self) -> &'static str;
}

/// Keeps every written point; used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPointSink {
    points: Arc<Mutex<Vec<DataPoint>>>,
}

impl InMemoryPointSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<DataPoint> {
        self.points.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }
}

#[async_trait]
impl PointSink for InMemoryPointSink {
    async fn write(&self, points: &[DataPoint]) -> Result<(), SinkError> {
        self.points.lock().extend_from_slice(points);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// POSTs newline-separated line protocol to `<base>/write`.
#[derive(Debug, Clone)]
pub struct HttpLineProtocolSink {
    client: Client,
    endpoint: String,
    token: Option<String>,
    retry_delay: Duration,
    max_attempts: u32,
}

impl HttpLineProtocolSink {
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(SinkError::Client)?;
        Ok(Self {
            client,
            endpoint: format!("{}/write", base_url.trim_end_matches('/')),
            token: None,
            retry_delay: Duration::from_millis(250),
            max_attempts: 3,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, retry_delay: Duration, max_attempts: u32) -> Self {
        self.retry_delay = retry_delay;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_once(&self, body: String) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected { status, body })
    }
}

#[async_trait]
impl PointSink for HttpLineProtocolSink {
    async fn write(&self, points: &[DataPoint]) -> Result<(), SinkError> {
        let lines: Vec<String> = points.iter().filter_map(DataPoint::to_line_protocol).collect();
        if lines.len() < points.len() {
            warn!(
                endpoint = %self.endpoint,
                skipped = points.len() - lines.len(),
                "points without finite fields skipped"
            );
        }
        if lines.is_empty() {
            return Ok(());
        }
        let body = lines.join("\n");

        let mut attempt = 0;
        loop {
            match self.post_once(body.clone()).await {
                Ok(()) => {
                    debug!(endpoint = %self.endpoint, points = points.len(), "points written");
                    return Ok(());
                }
                // Client errors other than throttling will not succeed on retry.
                Err(SinkError::Rejected { status, body })
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS =>
                {
                    return Err(SinkError::Rejected { status, body });
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(SinkError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    let delay = backoff_delay(self.retry_delay, attempt - 1);
                    warn!(endpoint = %self.endpoint, attempt, ?delay, error = %err, "point write failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FieldValue;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn point() -> DataPoint {
        DataPoint::new("plc_data", Utc::now())
            .tag("equipment_id", "oven1")
            .field("value", FieldValue::Float(1.5))
    }

    /// Answers each connection with the next status line and returns the raw requests.
    async fn responder(statuses: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for status in statuses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut raw = Vec::new();
                let mut chunk = [0_u8; 4096];
                loop {
                    let read = socket.read(&mut chunk).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    raw.extend_from_slice(&chunk[..read]);
                    let text = String::from_utf8_lossy(&raw);
                    if let Some(split) = text.find("\r\n\r\n") {
                        let length = text[..split]
                            .lines()
                            .find_map(|line| {
                                let lower = line.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|value| value.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if raw.len() >= split + 4 + length {
                            break;
                        }
                    }
                }
                requests.push(String::from_utf8_lossy(&raw).into_owned());
                let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn in_memory_sink_collects_points() {
        let sink = InMemoryPointSink::new();
        sink.write(&[point(), point()]).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.name(), "memory");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn http_sink_posts_line_protocol_with_token() {
        let (base, server) = responder(vec!["204 No Content"]).await;
        let sink = HttpLineProtocolSink::new(&format!("{base}/")).unwrap().with_token("secret");
        assert_eq!(sink.endpoint(), format!("{base}/write"));

        sink.write(&[point()]).await.unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.starts_with("POST /write HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("plc_data,equipment_id=oven1 value=1.5 "));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn http_sink_skips_points_without_finite_fields() {
        let (base, server) = responder(vec!["204 No Content"]).await;
        let sink = HttpLineProtocolSink::new(&base).unwrap();
        let broken = DataPoint::new("plc_data", Utc::now())
            .tag("equipment_id", "oven2")
            .field("value", FieldValue::Float(f64::NAN));

        sink.write(&[broken.clone(), point()]).await.unwrap();
        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("plc_data,equipment_id=oven1 value=1.5 "));
        assert!(!requests[0].contains("oven2"));

        // nothing writable means no request at all
        sink.write(&[broken]).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn http_sink_retries_server_errors() {
        let (base, server) = responder(vec!["503 Service Unavailable", "204 No Content"]).await;
        let sink = HttpLineProtocolSink::new(&base)
            .unwrap()
            .with_retry(Duration::from_millis(10), 3);

        sink.write(&[point()]).await.unwrap();
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn http_sink_does_not_retry_bad_requests() {
        let (base, server) = responder(vec!["400 Bad Request"]).await;
        let sink = HttpLineProtocolSink::new(&base)
            .unwrap()
            .with_retry(Duration::from_millis(10), 3);

        let err = sink.write(&[point()]).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected { status, .. } if status == StatusCode::BAD_REQUEST));
        assert_eq!(server.await.unwrap().len(), 1);
    }
}
