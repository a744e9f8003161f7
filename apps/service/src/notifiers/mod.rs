/// Notification channels for test results
///
/// A notifier receives every result a bridge (or a local run) lets through.
/// The log notifier reports all of them, the webhook and IRC notifiers
/// forward failures and, depending on the [`Policy`], recoveries and passes.
pub mod irc;
pub mod log;
pub mod webhook;

pub use irc::IrcNotifier;
pub use log::LogNotifier;
pub use webhook::WebhookNotifier;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{NotifierConfig, NotifierKind};
use crate::monitoring::TestResult;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, result: &TestResult) -> Result<()>;
}

/// Which non-failing results a remote channel should hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    pub send_success: bool,
    pub send_recovered: bool,
}

impl Policy {
    pub fn should_send(&self, result: &TestResult) -> bool {
        !result.passed() || self.send_success || (self.send_recovered && result.recovered)
    }
}

/// One line summary of a result
pub fn format_message(result: &TestResult) -> String {
    let state = match (&result.error, result.is_dedup, result.recovered) {
        (Some(_), true, _) => "REPEATED",
        (Some(_), false, _) => "FAILED",
        (None, _, true) => "RECOVERED",
        (None, _, false) => "OK",
    };

    let mut message = format!("[{}] {} ({})", state, result.input, result.target);
    if let Some(error) = &result.error {
        message.push_str(": ");
        message.push_str(error);
    }
    message
}

/// Build the configured notifier, connecting to it when needed
pub async fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    let policy = Policy { send_success: config.send_success, send_recovered: config.send_recovered };

    Ok(match config.kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Webhook => Arc::new(WebhookNotifier::new(&config.url, policy).context("invalid webhook notifier")?),
        NotifierKind::Irc => Arc::new(IrcNotifier::connect(&config.url, policy).await.context("IRC notifier unavailable")?),
    })
}
