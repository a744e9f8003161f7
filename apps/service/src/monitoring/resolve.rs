use std::net::IpAddr;

use thiserror::Error;
use tokio::net::lookup_host;

use super::types::Options;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("both IPv4 and IPv6 are disabled")]
    NoFamilyEnabled,

    #[error("address {0} belongs to a disabled address family")]
    FamilyDisabled(IpAddr),

    #[error("failed to resolve {host}: {reason}")]
    Lookup { host: String, reason: String },

    #[error("no usable address found for {0}")]
    NoAddress(String),
}

/// Pick one address for `target` within the families enabled in `options`.
///
/// IPv4 addresses win over IPv6 when both families are enabled. Bracketed
/// IPv6 literals (`[::1]`) are accepted.
pub async fn resolve(target: &str, options: &Options) -> Result<IpAddr, ResolveError> {
    if !options.ipv4 && !options.ipv6 {
        return Err(ResolveError::NoFamilyEnabled);
    }

    let host = target.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        return if family_enabled(&ip, options) { Ok(ip) } else { Err(ResolveError::FamilyDisabled(ip)) };
    }

    let addresses: Vec<IpAddr> = lookup_host((host, 0))
        .await
        .map_err(|e| ResolveError::Lookup { host: host.to_string(), reason: e.to_string() })?
        .map(|addr| addr.ip())
        .collect();

    pick(&addresses, options).ok_or_else(|| ResolveError::NoAddress(host.to_string()))
}

fn family_enabled(ip: &IpAddr, options: &Options) -> bool {
    match ip {
        IpAddr::V4(_) => options.ipv4,
        IpAddr::V6(_) => options.ipv6,
    }
}

fn pick(addresses: &[IpAddr], options: &Options) -> Option<IpAddr> {
    let v4 = addresses.iter().find(|ip| ip.is_ipv4());
    let v6 = addresses.iter().find(|ip| ip.is_ipv6());

    match (options.ipv4, options.ipv6) {
        (true, true) => v4.or(v6),
        (true, false) => v4,
        (false, true) => v6,
        (false, false) => None,
    }
    .copied()
}
