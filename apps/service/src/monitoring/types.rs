use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single parsed test definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    /// Source line the test was parsed from, with macros substituted
    pub input: String,

    /// Host, address or URL the test runs against
    pub target: String,

    /// Registered protocol key (http, ssh, ...)
    #[serde(rename = "type")]
    pub test_type: String,

    /// Free-form tag attached by the runner that parsed the test
    #[serde(default)]
    pub tag: String,

    /// Optional human label, set with `with label '...'`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_label: Option<String>,

    /// Protocol specific arguments
    #[serde(default)]
    pub arguments: HashMap<String, String>,
}

impl Test {
    /// Serialize as a job queue payload
    pub fn to_job(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a job queue payload
    pub fn from_job(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Options shared by every test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub verbose: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub retry: bool,
    /// Deadline of a single attempt
    pub timeout: Duration,
    /// Pause between two attempts when retrying
    pub retry_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            ipv4: true,
            ipv6: true,
            retry: true,
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Result of running a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub input: String,
    pub target: String,

    /// Unix timestamp (seconds) of when the result was produced
    pub time: i64,

    #[serde(rename = "type")]
    pub test_type: String,

    #[serde(default)]
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_label: Option<String>,

    /// If set, the test has failed
    pub error: Option<String>,

    /// Full cause chain of the failure, when there is more than one cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// The failure is a repeat of an ongoing failure streak
    #[serde(default)]
    pub is_dedup: bool,

    /// The test passed after a failure streak
    #[serde(default)]
    pub recovered: bool,
}

impl TestResult {
    /// Create a passing result for the given test
    pub fn new(test: &Test) -> Self {
        Self {
            input: test.input.clone(),
            target: test.target.clone(),
            time: chrono::Utc::now().timestamp(),
            test_type: test.test_type.clone(),
            tag: test.tag.clone(),
            test_label: test.test_label.clone(),
            error: None,
            details: None,
            is_dedup: false,
            recovered: false,
        }
    }

    /// Mark the result as failed
    pub fn failure(mut self, error: String, details: Option<String>) -> Self {
        self.error = Some(error);
        self.details = details;
        self
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    /// Identity of the logical check, independent of the outcome
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.input.as_bytes());
        hasher.update(self.target.as_bytes());
        hasher.update(self.test_type.as_bytes());
        hasher.update(self.tag.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a result queue payload.
    ///
    /// Older producers publish a flat string map where `time` is a numeric
    /// string and `result` is `"failed"` for failures, that shape is accepted
    /// as well.
    pub fn from_json(payload: &str) -> Result<Self> {
        if let Ok(result) = serde_json::from_str::<Self>(payload) {
            return Ok(result);
        }

        let data: BTreeMap<String, String> = serde_json::from_str(payload)
            .map_err(|e| anyhow!("failed to parse test result entry: {}", e))?;

        let time = data
            .get("time")
            .ok_or_else(|| anyhow!("failed to parse test result entry: missing time"))?
            .parse::<i64>()
            .map_err(|e| anyhow!("invalid time in test result entry: {}", e))?;

        let field = |key: &str| data.get(key).cloned().unwrap_or_default();
        let error = (field("result") == "failed").then(|| field("error"));

        Ok(Self {
            input: field("input"),
            target: field("target"),
            time,
            test_type: field("type"),
            tag: field("tag"),
            test_label: None,
            error,
            details: None,
            is_dedup: false,
            recovered: false,
        })
    }
}
