/// Protocol tests - pluggable checks selected by the `must run TYPE` clause
///
/// Each probe module exposes a `register` function adding its protocol keys
/// to a [`Registry`]. The registry is a plain value handed to the parser and
/// the executor, so tests can build one holding only fake probes.
pub mod banner;
pub mod http;
pub mod ping;
pub mod psql;
pub mod tcp;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::monitoring::types::{Options, Test};

/// Decimal port in 1..=65535
pub(crate) const PORT_PATTERN: &str =
    "^([1-9][0-9]{0,3}|[1-5][0-9]{4}|6[0-4][0-9]{3}|65[0-4][0-9]{2}|655[0-2][0-9]|6553[0-5])$";

/// Capability every protocol check implements
#[async_trait::async_trait]
pub trait ProtocolTest: Send + Sync {
    /// Accepted argument names with the regular expression their value must match
    fn arguments(&self) -> &[(&'static str, &'static str)];

    /// Whether the executor resolves the target to an address before running
    fn should_resolve_hostname(&self) -> bool;

    /// Run the check against `target` (the resolved address when resolution is enabled)
    async fn run_test(&self, test: &Test, target: &str, options: &Options) -> Result<()>;

    /// Identity shared by runs that may be coalesced while one is in flight
    fn unique_hash(&self, _test: &Test, _options: &Options) -> Option<String> {
        None
    }

    /// Usage example shown by `vigil protocols`
    fn example(&self) -> &str;
}

pub type Factory = Arc<dyn Fn() -> Arc<dyn ProtocolTest> + Send + Sync>;

/// Protocol key to probe factory map
#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every probe shipped with vigil
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        http::register(&mut registry);
        tcp::register(&mut registry);
        banner::register(&mut registry);
        psql::register(&mut registry);
        ping::register(&mut registry);
        registry
    }

    /// Register a probe, replacing any previous probe under the same key
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ProtocolTest> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ProtocolTest>> {
        self.factories.get(key).map(|factory| factory())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Port from the `port` argument, or `default` when absent
pub(crate) fn port_argument(test: &Test, default: Option<u16>) -> Result<u16> {
    match test.arguments.get("port") {
        Some(port) => port.parse().map_err(|e| anyhow!("invalid port {}: {}", port, e)),
        None => default.ok_or_else(|| anyhow!("no port specified")),
    }
}

/// `host:port` string, bracketing IPv6 literals
pub(crate) fn socket_address(target: &str, port: u16) -> String {
    match target.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", target, port),
    }
}
