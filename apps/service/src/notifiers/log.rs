use anyhow::Result;
use tracing::{info, warn};

use super::{Notifier, format_message};
use crate::monitoring::TestResult;

/// Reports every result through tracing, failures as warnings
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, result: &TestResult) -> Result<()> {
        let message = format_message(result);
        if result.passed() {
            info!(tag = %result.tag, time = result.time, "{}", message);
        } else {
            warn!(tag = %result.tag, time = result.time, details = ?result.details, "{}", message);
        }
        Ok(())
    }
}
