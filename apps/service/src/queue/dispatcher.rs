use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::Queue;
use crate::parser::{ParseError, Parser};
use crate::protocols::Registry;

/// Turns test files into jobs on the job queue
pub struct Dispatcher {
    queue: Arc<dyn Queue>,
    job_queue: String,
    registry: Arc<Registry>,
    tag: String,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn Queue>, job_queue: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self { queue, job_queue: job_queue.into(), registry, tag: String::new() }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Parse `path` and push one job per test, in file order.
    ///
    /// Returns the number of jobs that reached the queue. Jobs pushed before
    /// a parse error stay queued.
    pub async fn dispatch_file(&self, path: &Path) -> Result<usize, ParseError> {
        let mut parser = Parser::new(self.registry.clone()).with_tag(self.tag.clone());
        let mut jobs = Vec::new();
        let parsed = parser.parse_file(path, |test| {
            jobs.push(test.to_job()?);
            Ok(())
        });

        let mut pushed = 0;
        for job in jobs {
            match self.queue.push(&self.job_queue, job).await {
                Ok(()) => pushed += 1,
                Err(e) => tracing::error!(file = %path.display(), "Failed to push job: {}", e),
            }
        }

        debug!(file = %path.display(), pushed, "Dispatched jobs");
        parsed?;
        info!(file = %path.display(), jobs = pushed, queue = %self.job_queue, "File dispatched");
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::Test;
    use crate::queue::MemoryQueue;
    use std::io::Write;

    fn dispatcher(queue: Arc<MemoryQueue>) -> Dispatcher {
        Dispatcher::new(queue, "jobs", Arc::new(Registry::builtin())).with_tag("edge")
    }

    #[tokio::test]
    async fn test_dispatch_pushes_jobs_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# routers").unwrap();
        writeln!(file, "EDGE are 10.0.0.1, 10.0.0.2").unwrap();
        writeln!(file, "EDGE must run tcp with port 22").unwrap();
        writeln!(file, "https://example.org must run https with status 301").unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let pushed = dispatcher(queue.clone()).dispatch_file(file.path()).await.unwrap();
        assert_eq!(pushed, 3);

        let mut jobs = Vec::new();
        while let Some(job) = queue.pop("jobs").await.unwrap() {
            jobs.push(Test::from_job(&job).unwrap());
        }

        let targets: Vec<_> = jobs.iter().map(|test| test.target.as_str()).collect();
        assert_eq!(targets, vec!["10.0.0.1", "10.0.0.2", "https://example.org"]);
        assert_eq!(jobs[0].input, "10.0.0.1 must run tcp with port 22");
        assert_eq!(jobs[2].arguments.get("status").map(String::as_str), Some("301"));
        assert!(jobs.iter().all(|test| test.tag == "edge"));
    }

    #[tokio::test]
    async fn test_jobs_before_parse_error_stay_queued() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "example.org must run ssh").unwrap();
        writeln!(file, "example.org must run gopher").unwrap();
        writeln!(file, "example.org must run ftp").unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let error = dispatcher(queue.clone()).dispatch_file(file.path()).await.unwrap_err();

        assert!(matches!(error, ParseError::AtLine { line: 2, .. }));
        assert_eq!(queue.len("jobs"), 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let queue = Arc::new(MemoryQueue::new());
        let error = dispatcher(queue).dispatch_file(Path::new("/nonexistent/vigil.tests")).await.unwrap_err();
        assert!(matches!(error, ParseError::Io { .. }));
    }
}
