//! Outbound delivery for the courier relay.
//!
//! For each recipient the engine resolves the domain's mail exchangers,
//! walks every host over the configured transport tiers, signs the message
//! with DKIM once a session is up, and submits it. The first route that
//! takes the message wins; failures are contained to the route or the
//! recipient they happened on and reported as a [`DeliveryOutcome`].

pub mod attempt;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod signer;
pub mod smtp;
pub mod transport;

pub use config::{ConfigError, DeliveryConfig};
pub use dns::{DnsConfig, HickoryMxResolver, MxRecord, MxResolver};
pub use engine::DeliveryEngine;
pub use error::DeliveryError;
pub use outcome::{DeliveryOutcome, DeliveryStatus, RouteAttempt};
pub use signer::{DkimConfig, DkimSigner, HashAlgorithm, MessageSigner, SigningError};
pub use smtp::SmtpConnector;
pub use transport::{Connector, MailTransport, Route, Security, TierSpec, TransportPolicy};
