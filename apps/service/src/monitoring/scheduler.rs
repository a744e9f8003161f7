use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::executor::TestExecutor;
use super::types::{Options, Test, TestResult};
use crate::notifiers::Notifier;
use crate::parser::Parser;
use crate::queue::Queue;

/// Where a locally produced result goes
#[derive(Clone)]
pub enum ResultSink {
    /// Hand the result straight to a notifier
    Notify(Arc<dyn Notifier>),
    /// Push the result onto a result queue for the bridges
    Publish { queue: Arc<dyn Queue>, name: String },
}

impl ResultSink {
    pub async fn deliver(&self, result: &TestResult) -> Result<()> {
        match self {
            ResultSink::Notify(notifier) => notifier.notify(result).await,
            ResultSink::Publish { queue, name } => {
                queue.push(name, result.to_json()?).await?;
                Ok(())
            }
        }
    }
}

/// Outcome counts of one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub passed: usize,
    pub failed: usize,
}

/// Local scheduler - runs the tests of a set of files in file order
pub struct LocalScheduler {
    executor: Arc<TestExecutor>,
    options: Options,
    sink: ResultSink,
    tag: String,
}

impl LocalScheduler {
    pub fn new(executor: Arc<TestExecutor>, options: Options, sink: ResultSink) -> Self {
        Self { executor, options, sink, tag: String::new() }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Parse every file, then run its tests one after another.
    ///
    /// A file with a parse error is reported, the tests parsed before the
    /// offending line still run.
    pub async fn run_round(&self, files: &[PathBuf]) -> RoundSummary {
        let mut summary = RoundSummary::default();

        for file in files {
            for test in self.load(file) {
                let result = self.executor.run(&test, &self.options).await;
                if result.passed() {
                    summary.passed += 1;
                } else {
                    summary.failed += 1;
                }

                if let Err(e) = self.sink.deliver(&result).await {
                    error!(input = %test.input, "Failed to deliver result: {e:#}");
                }
            }
        }

        summary
    }

    /// Run rounds until cancelled, or a single round without an interval
    pub async fn run(&self, files: &[PathBuf], every: Option<Duration>, cancel: CancellationToken) -> RoundSummary {
        let Some(every) = every else {
            return tokio::select! {
                summary = self.run_round(files) => summary,
                _ = cancel.cancelled() => RoundSummary::default(),
            };
        };

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = RoundSummary::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            tokio::select! {
                summary = self.run_round(files) => last = summary,
                _ = cancel.cancelled() => break,
            }
            info!(passed = last.passed, failed = last.failed, failing = self.executor.dedup().failing(), "Round complete");
        }

        last
    }

    fn load(&self, file: &Path) -> Vec<Test> {
        let mut parser = Parser::new(self.executor.registry().clone()).with_tag(self.tag.clone());
        let mut tests = Vec::new();

        if let Err(e) = parser.parse_file(file, |test| {
            tests.push(test);
            Ok(())
        }) {
            error!(file = %file.display(), "Error parsing file: {e}");
        }

        tests
    }
}
