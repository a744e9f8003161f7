//! ICMP reachability check.
//!
//! Raw ICMP sockets need elevated privileges, so the check runs the system
//! `ping` binary instead:
//!
//!    host.example.com must run ping [with count 3]

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::process::Command;
use tokio::time::timeout;

use super::{ProtocolTest, Registry};
use crate::monitoring::types::{Options, Test};

const ARGUMENTS: &[(&str, &str)] = &[("count", "^[1-9][0-9]?$")];

pub struct PingTest;

#[async_trait::async_trait]
impl ProtocolTest for PingTest {
    fn arguments(&self) -> &[(&'static str, &'static str)] {
        ARGUMENTS
    }

    fn should_resolve_hostname(&self) -> bool {
        true
    }

    async fn run_test(&self, test: &Test, target: &str, options: &Options) -> Result<()> {
        let count = test.arguments.get("count").map(String::as_str).unwrap_or("1");
        let wait = options.timeout.as_secs().max(1).to_string();

        let mut command = Command::new("ping");
        if matches!(target.parse::<IpAddr>(), Ok(IpAddr::V6(_))) {
            command.arg("-6");
        }
        command
            .args(["-c", count, "-W", &wait, target])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(options.timeout, command.output())
            .await
            .map_err(|_| anyhow!("ping to {} timed out", target))?
            .map_err(|e| anyhow!("failed to run ping: {}", e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(anyhow!("ping to {} failed ({}) {}", target, output.status, stderr.trim()))
        }
    }

    fn example(&self) -> &str {
        "host.example.com must run ping [with count 3]\n\n  Runs the system ping binary against the resolved address."
    }
}

pub fn register(registry: &mut Registry) {
    registry.register("ping", || Arc::new(PingTest));
}
