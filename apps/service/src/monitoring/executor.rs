use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::dedup::DedupState;
use super::resolve::resolve;
use super::types::{Options, Test, TestResult};
use crate::protocols::{ProtocolTest, Registry};

/// Attempts made for one test when retrying is enabled
pub const RETRY_ATTEMPTS: usize = 3;

/// Failure of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub message: String,
    pub details: Option<String>,
}

impl AttemptError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), details: None }
    }
}

impl From<anyhow::Error> for AttemptError {
    fn from(error: anyhow::Error) -> Self {
        let details = error.chain().nth(1).map(|_| format!("{error:#}"));
        Self { message: error.to_string(), details }
    }
}

type SharedAttempt = Shared<BoxFuture<'static, Result<(), AttemptError>>>;
type InFlight = Mutex<HashMap<String, SharedAttempt>>;

/// Test executor - runs tests and turns raw outcomes into alert lifecycle results
///
/// The executor owns the dedup state, so one executor should serve every
/// run of a given set of tests (a local runner or a worker process).
pub struct TestExecutor {
    registry: Arc<Registry>,
    dedup: DedupState,
    in_flight: InFlight,
}

impl TestExecutor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, dedup: DedupState::new(), in_flight: Mutex::new(HashMap::new()) }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dedup(&self) -> &DedupState {
        &self.dedup
    }

    /// Run a test, retrying when enabled, and record the outcome
    pub async fn run(&self, test: &Test, options: &Options) -> TestResult {
        let outcome = match self.registry.get(&test.test_type) {
            Some(probe) => self.run_with_retries(probe, test, options).await,
            None => Err(AttemptError::new(format!("unknown test-type '{}'", test.test_type))),
        };

        let mut result = TestResult::new(test);
        if let Err(error) = outcome {
            result = result.failure(error.message, error.details);
        }

        let identity = result.hash();
        let verdict = self.dedup.record(&identity, result.passed(), result.time);
        result.is_dedup = verdict.is_dedup;
        result.recovered = verdict.recovered;

        match &result.error {
            Some(error) if result.is_dedup => {
                let failures = self.dedup.streak(&identity).map_or(0, |streak| streak.failures);
                debug!(input = %test.input, failures, "Test still failing: {}", error)
            }
            Some(error) => warn!(input = %test.input, "Test failed: {}", error),
            None if result.recovered => info!(input = %test.input, "Test recovered"),
            None => debug!(input = %test.input, "Test passed"),
        }

        result
    }

    async fn run_with_retries(
        &self,
        probe: Arc<dyn ProtocolTest>,
        test: &Test,
        options: &Options,
    ) -> Result<(), AttemptError> {
        let attempts = if options.retry { RETRY_ATTEMPTS } else { 1 };
        let mut attempt = 1;

        loop {
            match self.attempt(&probe, test, options).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < attempts => {
                    if options.verbose {
                        info!(input = %test.input, attempt, "Attempt failed, retrying: {}", error.message);
                    }
                    attempt += 1;
                    sleep(options.retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One bounded attempt: resolve, then probe under the timeout
    async fn attempt(&self, probe: &Arc<dyn ProtocolTest>, test: &Test, options: &Options) -> Result<(), AttemptError> {
        let target = if probe.should_resolve_hostname() {
            let address = resolve(&test.target, options).await.map_err(|e| AttemptError::new(e.to_string()))?;
            debug!(target = %test.target, %address, "Resolved target");
            address.to_string()
        } else {
            test.target.clone()
        };

        timeout(options.timeout, self.probe(probe, test, target, options))
            .await
            .unwrap_or_else(|_| Err(AttemptError::new(format!("timed out after {}s", options.timeout.as_secs_f32()))))
    }

    /// Run the probe, joining an identical run that is already in flight
    async fn probe(
        &self,
        probe: &Arc<dyn ProtocolTest>,
        test: &Test,
        target: String,
        options: &Options,
    ) -> Result<(), AttemptError> {
        let Some(hash) = probe.unique_hash(test, options) else {
            return probe.run_test(test, &target, options).await.map_err(AttemptError::from);
        };
        let key = format!("{}:{}:{}", test.test_type, target, hash);

        let (shared, _guard) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            if let Some(existing) = in_flight.get(&key) {
                debug!(%key, "Joining in-flight probe");
                (existing.clone(), None)
            } else {
                let (probe, test, options) = (probe.clone(), test.clone(), options.clone());
                let shared = async move { probe.run_test(&test, &target, &options).await.map_err(AttemptError::from) }
                    .boxed()
                    .shared();
                in_flight.insert(key.clone(), shared.clone());
                (shared, Some(InFlightGuard { in_flight: &self.in_flight, key }))
            }
        };

        shared.await
    }
}

/// Removes the in-flight entry once the run that created it finishes or is dropped
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.key);
    }
}
