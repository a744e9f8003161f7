//! HTTP and HTTPS checks.
//!
//! The target is the URL to fetch. Redirects are not followed so a check
//! can assert on a 301 itself:
//!
//!    https://example.com/ must run https with status 301
//!    http://example.com/ must run http with content 'Welcome'

use std::sync::Arc;

use anyhow::{Result, anyhow};
use reqwest::{Method, redirect::Policy};
use sha2::{Digest, Sha256};

use super::{ProtocolTest, Registry};
use crate::monitoring::types::{Options, Test};

const ARGUMENTS: &[(&str, &str)] = &[
    ("content", ".*"),
    ("status", "^(any|[0-9]{3})$"),
    ("method", "^(GET|HEAD|POST)$"),
    ("data", ".*"),
    ("insecure", "^(true|false)$"),
];

const EXAMPLE: &str = "\
https://example.com/ must run https [with status 200] [with content 'text'] [with method POST] [with data 'a=b']

  Fetches the URL without following redirects. The status defaults to 200,
  'any' accepts every status. 'content' must appear in the response body.
  'insecure true' skips certificate validation.";

/// Fetch a URL and compare status and body
pub struct HttpTest;

#[async_trait::async_trait]
impl ProtocolTest for HttpTest {
    fn arguments(&self) -> &[(&'static str, &'static str)] {
        ARGUMENTS
    }

    fn should_resolve_hostname(&self) -> bool {
        false
    }

    async fn run_test(&self, test: &Test, target: &str, options: &Options) -> Result<()> {
        let insecure = test.arguments.get("insecure").is_some_and(|v| v == "true");
        // Probes talk to the target directly, never through a proxy.
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(options.timeout)
            .redirect(Policy::none())
            .danger_accept_invalid_certs(insecure)
            .build()?;

        let method = match test.arguments.get("method") {
            Some(method) => Method::from_bytes(method.as_bytes())?,
            None if test.arguments.contains_key("data") => Method::POST,
            None => Method::GET,
        };

        let mut request = client.request(method, target);
        if let Some(data) = test.arguments.get("data") {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(data.clone());
        }

        let response = request.send().await.map_err(|e| anyhow!("HTTP request failed: {}", e))?;
        let status = response.status().as_u16();

        if options.verbose {
            tracing::info!(url = target, status, "HTTP response received");
        }

        match test.arguments.get("status").map(String::as_str) {
            Some("any") => {}
            Some(expected) if expected != status.to_string() => {
                return Err(anyhow!("status code was {} not {}", status, expected));
            }
            None if status != 200 => return Err(anyhow!("status code was {} not 200", status)),
            _ => {}
        }

        if let Some(content) = test.arguments.get("content") {
            let body = response.text().await.map_err(|e| anyhow!("failed to read body: {}", e))?;
            if !body.contains(content.as_str()) {
                return Err(anyhow!("body didn't contain '{}'", content));
            }
        }

        Ok(())
    }

    fn unique_hash(&self, test: &Test, _options: &Options) -> Option<String> {
        let mut arguments: Vec<(&String, &String)> = test.arguments.iter().collect();
        arguments.sort();

        let mut hasher = Sha256::new();
        hasher.update(test.test_type.as_bytes());
        hasher.update(test.target.as_bytes());
        for (key, value) in arguments {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        Some(hex::encode(hasher.finalize()))
    }

    fn example(&self) -> &str {
        EXAMPLE
    }
}

pub fn register(registry: &mut Registry) {
    registry.register("http", || Arc::new(HttpTest));
    registry.register("https", || Arc::new(HttpTest));
}
