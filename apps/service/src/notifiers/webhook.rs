use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::debug;
use url::Url;

use super::{Notifier, Policy};
use crate::monitoring::TestResult;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs results as JSON to an HTTP endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    policy: Policy,
}

impl WebhookNotifier {
    pub fn new(url: &str, policy: Policy) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow!("invalid webhook URL '{}': {}", url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("webhook URL must be http or https, got '{}'", url.scheme());
        }

        // Endpoints are reached directly, same as the probes.
        let client = reqwest::Client::builder().no_proxy().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, url, policy })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, result: &TestResult) -> Result<()> {
        if !self.policy.should_send(result) {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url.clone())
            .json(result)
            .send()
            .await
            .map_err(|e| anyhow!("webhook request failed: {}", e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            bail!("webhook returned {}: {}", status, body.trim());
        }

        debug!(url = %self.url, %status, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Accept one request, answer with `status_line` and hand back the body
    async fn endpoint(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];

            let body = loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length || n == 0 {
                        break text[end + 4..].to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };

            let response = format!("HTTP/1.1 {}\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(body);
        });

        (url, rx)
    }

    fn failed() -> TestResult {
        TestResult {
            input: "example.org must run ftp".to_string(),
            target: "example.org".to_string(),
            time: 1_700_000_000,
            test_type: "ftp".to_string(),
            tag: "prod".to_string(),
            test_label: None,
            error: Some("connection refused".to_string()),
            details: None,
            is_dedup: false,
            recovered: false,
        }
    }

    #[tokio::test]
    async fn test_posts_result_json() {
        let (url, body) = endpoint("200 OK").await;
        let notifier = WebhookNotifier::new(&url, Policy::default()).unwrap();

        notifier.notify(&failed()).await.unwrap();

        let posted = TestResult::from_json(&body.await.unwrap()).unwrap();
        assert_eq!(posted, failed());
    }

    #[tokio::test]
    async fn test_error_status() {
        let (url, _body) = endpoint("500 Internal Server Error").await;
        let notifier = WebhookNotifier::new(&url, Policy::default()).unwrap();

        let error = notifier.notify(&failed()).await.unwrap_err();
        assert!(error.to_string().contains("500"), "{error}");
    }

    #[tokio::test]
    async fn test_passing_result_skipped_by_policy() {
        // Nothing listens here, a request would fail.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", Policy::default()).unwrap();
        let passed = TestResult { error: None, ..failed() };
        notifier.notify(&passed).await.unwrap();
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(WebhookNotifier::new("ftp://example.org/", Policy::default()).is_err());
        assert!(WebhookNotifier::new("not a url", Policy::default()).is_err());
    }
}
