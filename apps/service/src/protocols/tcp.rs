//! Plain TCP connect check.
//!
//!    host.example.com must run tcp with port 8080

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{PORT_PATTERN, ProtocolTest, Registry, port_argument, socket_address};
use crate::monitoring::types::{Options, Test};

const ARGUMENTS: &[(&str, &str)] = &[("port", PORT_PATTERN)];

/// Succeeds when a TCP connection to the port can be opened
pub struct TcpTest;

#[async_trait::async_trait]
impl ProtocolTest for TcpTest {
    fn arguments(&self) -> &[(&'static str, &'static str)] {
        ARGUMENTS
    }

    fn should_resolve_hostname(&self) -> bool {
        true
    }

    async fn run_test(&self, test: &Test, target: &str, options: &Options) -> Result<()> {
        let port = port_argument(test, None)?;
        connect(target, port, options).await?;
        Ok(())
    }

    fn example(&self) -> &str {
        "host.example.com must run tcp with port 8080\n\n  Opens a TCP connection to the given port, the port is required."
    }
}

/// Connect to `target:port` within the configured timeout
pub(crate) async fn connect(target: &str, port: u16, options: &Options) -> Result<TcpStream> {
    let address = socket_address(target, port);

    timeout(options.timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| anyhow!("TCP connection to {} timed out", address))?
        .map_err(|e| anyhow!("TCP connection to {} failed: {}", address, e))
}

pub fn register(registry: &mut Registry) {
    registry.register("tcp", || Arc::new(TcpTest));
}
