use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ERROR_BACKOFF, Queue};
use crate::filter::ResultFilter;
use crate::monitoring::TestResult;
use crate::notifiers::Notifier;

/// Forwards published results that match a filter to a notifier
pub struct Bridge {
    queue: Arc<dyn Queue>,
    result_queue: String,
    filter: ResultFilter,
    notifier: Arc<dyn Notifier>,
}

impl Bridge {
    pub fn new(
        queue: Arc<dyn Queue>,
        result_queue: impl Into<String>,
        filter: ResultFilter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { queue, result_queue: result_queue.into(), filter, notifier }
    }

    /// Consume results until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(queue = %self.result_queue, "Bridge waiting for results");

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.blocking_pop(&self.result_queue) => popped,
            };

            match popped {
                Ok(payload) => {
                    self.handle(&payload).await;
                }
                Err(e) => {
                    error!(queue = %self.result_queue, "Failed to pop result: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Bridge stopped");
    }

    /// Decode one payload and notify when it matches.
    ///
    /// Returns whether the notifier accepted the result.
    pub async fn handle(&self, payload: &str) -> bool {
        let result = match TestResult::from_json(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!("Dropping malformed result: {e:#}");
                return false;
            }
        };

        if !self.filter.matches(&result) {
            debug!(input = %result.input, "Result filtered out");
            return false;
        }

        match self.notifier.notify(&result).await {
            Ok(()) => true,
            Err(e) => {
                error!(input = %result.input, "Notifier failed: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{Options, TestExecutor};
    use crate::protocols::Registry;
    use crate::queue::{Dispatcher, MemoryQueue, Worker};
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<TestResult>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<TestResult> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, result: &TestResult) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _result: &TestResult) -> anyhow::Result<()> {
            anyhow::bail!("channel unavailable")
        }
    }

    #[tokio::test]
    async fn test_handle_applies_filter() {
        let recorder = Arc::new(Recorder::default());
        let filter = ResultFilter::compile("tag=^prod$").unwrap();
        let bridge = Bridge::new(Arc::new(MemoryQueue::new()), "results", filter, recorder.clone());

        let legacy = r#"{"input":"a must run ssh","target":"a","time":"1700000000","type":"ssh","tag":"prod","result":"failed","error":"refused"}"#;
        let other = r#"{"input":"b must run ssh","target":"b","time":1700000000,"type":"ssh","tag":"dev","error":null}"#;

        assert!(bridge.handle(legacy).await);
        assert!(!bridge.handle(other).await);
        assert!(!bridge.handle("garbage").await);

        let seen = recorder.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].error.as_deref(), Some("refused"));
    }

    #[tokio::test]
    async fn test_notifier_failure_is_dropped() {
        let bridge = Bridge::new(Arc::new(MemoryQueue::new()), "results", ResultFilter::default(), Arc::new(Failing));
        let payload = r#"{"input":"a","target":"a","time":1,"type":"ssh","error":"x"}"#;
        assert!(!bridge.handle(payload).await);
    }

    #[tokio::test]
    async fn test_dispatch_work_bridge_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "127.0.0.1 must run tcp with port {port} with label 'loopback'").unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let registry = Arc::new(Registry::builtin());

        let dispatcher = Dispatcher::new(queue.clone(), "jobs", registry.clone()).with_tag("e2e");
        assert_eq!(dispatcher.dispatch_file(file.path()).await.unwrap(), 1);

        let cancel = CancellationToken::new();
        let executor = Arc::new(TestExecutor::new(registry));
        let mut worker = Worker::new(queue.clone(), executor, Options::default(), "jobs", "results");
        let worker_cancel = cancel.clone();
        let worker_task = tokio::spawn(async move { worker.run(worker_cancel).await });

        let recorder = Arc::new(Recorder::default());
        let filter = ResultFilter::compile("testLabel=loopback,isDedup=false").unwrap();
        let bridge = Arc::new(Bridge::new(queue.clone(), "results", filter, recorder.clone()));
        let bridge_task = {
            let bridge = bridge.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.run(cancel).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.seen().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("result never reached the notifier");

        cancel.cancel();
        worker_task.await.unwrap();
        bridge_task.await.unwrap();

        let seen = recorder.seen();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].passed());
        assert_eq!(seen[0].tag, "e2e");
        assert_eq!(seen[0].test_label.as_deref(), Some("loopback"));
        assert_eq!(queue.len("jobs"), 0);
        assert_eq!(queue.len("results"), 0);
    }
}
