//! Helpers for the plain-string addresses carried by the relay.
//!
//! Address syntax validation is left to the protocol layer; these helpers
//! only split and format.

use std::net::IpAddr;

/// Returns the domain part of `address`: everything after the first `@`.
///
/// Returns `None` when there is no `@` or nothing follows it.
#[must_use]
pub fn domain_of(address: &str) -> Option<&str> {
    address
        .split_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

/// Normalises a mail exchanger name as returned by DNS (`mx.example.com.`)
/// into a host usable for connecting and for TLS server names.
#[must_use]
pub fn normalise_host(host: &str) -> &str {
    let host = host.strip_suffix('.').unwrap_or(host);
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Formats a `host:port` socket address, bracketing IPv6 literals.
#[must_use]
pub fn socket_address(host: &str, port: u16) -> String {
    match normalise_host(host).parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]:{port}"),
        Ok(IpAddr::V4(ip)) => format!("{ip}:{port}"),
        Err(_) => format!("{}:{port}", normalise_host(host)),
    }
}
