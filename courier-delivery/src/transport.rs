//! Transport tiers and the route fallback policy.
//!
//! Each mail exchanger is tried over an ordered list of tiers, each a port
//! paired with a security posture. The list is data: the default prefers the
//! lowest-friction tier first, and a stricter configuration can reorder or
//! trim it.

use core::fmt::{self, Display, Formatter};
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// How a connection on a tier is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Security {
    /// Cleartext, upgraded with `STARTTLS` when the server offers it.
    Opportunistic,
    /// Cleartext that must be upgraded before the envelope is sent.
    ExplicitUpgrade,
    /// Encrypted from the first byte.
    ImplicitTls,
}

impl Display for Security {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Opportunistic => "opportunistic",
            Self::ExplicitUpgrade => "explicit-upgrade",
            Self::ImplicitTls => "implicit-tls",
        })
    }
}

/// One transport tier: a port and how to secure it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TierSpec {
    pub port: u16,
    pub security: Security,
}

impl TierSpec {
    pub const fn new(port: u16, security: Security) -> Self {
        Self { port, security }
    }
}

impl Display for TierSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.security)
    }
}

/// The ordered tiers tried against every host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransportPolicy {
    tiers: Vec<TierSpec>,
}

impl TransportPolicy {
    pub const fn new(tiers: Vec<TierSpec>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[TierSpec] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Every `(host, tier)` pair in attempt order: hosts outer, tiers inner.
    pub fn routes<'a>(&'a self, hosts: &'a [String]) -> impl Iterator<Item = Route> + 'a {
        hosts.iter().flat_map(move |host| {
            self.tiers.iter().map(move |tier| Route {
                host: host.clone(),
                tier: *tier,
            })
        })
    }
}

impl Default for TransportPolicy {
    /// 25 opportunistic, then 587 with a required upgrade, then 465.
    fn default() -> Self {
        Self::new(vec![
            TierSpec::new(25, Security::Opportunistic),
            TierSpec::new(587, Security::ExplicitUpgrade),
            TierSpec::new(465, Security::ImplicitTls),
        ])
    }
}

/// A single host and tier combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub host: String,
    pub tier: TierSpec,
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.host, self.tier)
    }
}

/// An established session with a remote mail server.
#[async_trait]
pub trait MailTransport: Send {
    /// Run the envelope and content phases for one recipient.
    ///
    /// # Errors
    ///
    /// Any refusal or I/O failure, as [`DeliveryError::TransferFailure`].
    async fn send(&mut self, from: &str, to: &str, message: &[u8]) -> Result<(), DeliveryError>;

    /// End the session politely after the content was accepted.
    ///
    /// # Errors
    ///
    /// Reported for logging only; the message has already been accepted.
    async fn quit(&mut self) -> Result<(), DeliveryError>;

    /// Release the connection. Called on every exit path, more than once is
    /// harmless.
    async fn close(&mut self);
}

/// Opens sessions over a given tier.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// [`DeliveryError::ConnectFailure`] when the session can't be
    /// established, including a required upgrade that didn't happen.
    async fn connect(
        &self,
        host: &str,
        tier: TierSpec,
    ) -> Result<Box<dyn MailTransport>, DeliveryError>;
}

/// What [`first_success`] found.
#[derive(Debug)]
pub struct Fallback<C, T> {
    /// The winning value, or the error that ended the search.
    pub result: Result<T, DeliveryError>,
    /// Every candidate tried, in order, with its failure if it failed.
    pub tried: Vec<(C, Option<DeliveryError>)>,
}

/// Try `candidates` in order until one succeeds.
///
/// Fallback errors move on to the next candidate; a fatal error ends the
/// search at once. Running out of candidates yields
/// [`DeliveryError::AllRoutesExhausted`].
pub async fn first_success<C, T, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Fallback<C, T>
where
    C: Clone,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
{
    let mut tried = Vec::new();
    let mut last = None;

    for candidate in candidates {
        match attempt(candidate.clone()).await {
            Ok(value) => {
                tried.push((candidate, None));
                return Fallback {
                    result: Ok(value),
                    tried,
                };
            }
            Err(err) if err.is_fallback() => {
                last = Some(err.to_string());
                tried.push((candidate, Some(err)));
            }
            Err(err) => {
                tried.push((candidate, Some(err.clone())));
                return Fallback {
                    result: Err(err),
                    tried,
                };
            }
        }
    }

    Fallback {
        result: Err(DeliveryError::AllRoutesExhausted {
            attempts: tried.len(),
            last: last.unwrap_or_else(|| String::from("no routes to try")),
        }),
        tried,
    }
}
