//! Mail exchanger resolution.

use std::time::Duration;

use async_trait::async_trait;
use courier_common::address::{domain_of, normalise_host};
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::DeliveryError;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS lookup failed: {0}")]
    LookupFailed(String),
}

impl From<hickory_resolver::ResolveError> for DnsError {
    fn from(err: hickory_resolver::ResolveError) -> Self {
        Self::LookupFailed(err.to_string())
    }
}

/// A mail exchanger for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub host: String,
    /// Lower is tried first.
    pub preference: u16,
}

impl MxRecord {
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
        }
    }
}

/// Looks up the MX records of a domain.
///
/// A domain without MX records resolves to an empty list; an error is
/// reserved for lookups that couldn't be completed.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError>;
}

/// Resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DnsConfig {
    /// Timeout for a single DNS query.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// [`MxResolver`] backed by the system's DNS configuration.
///
/// Every lookup goes to the network; nothing is cached between recipients.
#[derive(Debug)]
pub struct HickoryMxResolver {
    resolver: TokioResolver,
}

impl HickoryMxResolver {
    /// Uses the system configuration, or the resolver's built-in upstreams
    /// when that can't be read.
    pub fn new(config: &DnsConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let builder = TokioResolver::builder(TokioConnectionProvider::default())
            .unwrap_or_else(|err| {
                warn!("System resolver configuration unavailable ({err}), using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
            });

        Self {
            resolver: builder.with_options(opts).build(),
        }
    }
}

#[async_trait]
impl MxResolver for HickoryMxResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|mx| MxRecord::new(mx.exchange().to_utf8(), mx.preference()))
                .collect()),
            Err(err) if err.is_no_records_found() => {
                debug!("No MX records found for {domain}");
                Ok(Vec::new())
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                Err(err.into())
            }
        }
    }
}

/// Resolve the mail exchangers for a recipient address.
///
/// The domain is whatever follows the first `@`. Records come back ordered
/// by preference, keeping the resolver's order between equal preferences.
/// Host names lose their trailing root dot, and null MX records (RFC 7505)
/// are dropped.
///
/// # Errors
///
/// - [`DeliveryError::MalformedAddress`] without a domain, before any lookup
/// - [`DeliveryError::ResolutionFailure`] when the lookup fails
/// - [`DeliveryError::NoMxRecords`] when no usable record remains
pub async fn resolve(
    resolver: &dyn MxResolver,
    recipient: &str,
) -> Result<Vec<MxRecord>, DeliveryError> {
    let domain = domain_of(recipient)
        .ok_or_else(|| DeliveryError::MalformedAddress(recipient.to_string()))?;

    let mut records: Vec<MxRecord> = resolver
        .lookup_mx(domain)
        .await
        .map_err(|err| DeliveryError::ResolutionFailure {
            domain: domain.to_string(),
            cause: err.to_string(),
        })?
        .into_iter()
        .filter_map(|record| {
            let host = normalise_host(&record.host);
            (!host.is_empty()).then(|| MxRecord::new(host, record.preference))
        })
        .collect();

    if records.is_empty() {
        return Err(DeliveryError::NoMxRecords(domain.to_string()));
    }

    records.sort_by_key(|record| record.preference);
    debug!("Resolved {} MX record(s) for {domain}", records.len());

    Ok(records)
}
