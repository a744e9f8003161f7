use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ERROR_BACKOFF, Queue};
use crate::monitoring::{Options, TestExecutor};
use crate::parser::Parser;

/// Pops jobs, runs them and publishes the results
pub struct Worker {
    queue: Arc<dyn Queue>,
    executor: Arc<TestExecutor>,
    options: Options,
    parser: Parser,
    job_queue: String,
    result_queue: String,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn Queue>,
        executor: Arc<TestExecutor>,
        options: Options,
        job_queue: impl Into<String>,
        result_queue: impl Into<String>,
    ) -> Self {
        let parser = Parser::new(executor.registry().clone());
        Self { queue, executor, options, parser, job_queue: job_queue.into(), result_queue: result_queue.into() }
    }

    /// Process jobs until cancelled
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(queue = %self.job_queue, "Worker waiting for jobs");

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.blocking_pop(&self.job_queue) => popped,
            };

            match popped {
                Ok(payload) => {
                    self.process(&payload).await;
                }
                Err(e) => {
                    error!(queue = %self.job_queue, "Failed to pop job: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Worker stopped");
    }

    /// Run a single job payload and publish its result.
    ///
    /// Returns whether a result was published.
    pub async fn process(&mut self, payload: &str) -> bool {
        let test = match self.parser.parse_job(payload) {
            Ok(test) => test,
            Err(e) => {
                warn!("Dropping undecodable job: {}", e);
                return false;
            }
        };

        debug!(input = %test.input, "Running job");
        let result = self.executor.run(&test, &self.options).await;

        let encoded = match result.to_json() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(input = %test.input, "Failed to encode result: {e:#}");
                return false;
            }
        };

        if let Err(e) = self.queue.push(&self.result_queue, encoded).await {
            error!(input = %test.input, queue = %self.result_queue, "Failed to publish result: {}", e);
            return false;
        }
        true
    }
}
