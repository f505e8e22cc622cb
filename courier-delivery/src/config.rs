//! The `delivery` configuration section and engine assembly.

use std::sync::Arc;

use courier_common::config::{ClientTimeouts, TlsConfig};
use courier_smtp::client::{ClientError, ClientTls};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    dns::{DnsConfig, HickoryMxResolver},
    engine::DeliveryEngine,
    signer::MessageSigner,
    smtp::SmtpConnector,
    transport::TransportPolicy,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No transport tiers configured")]
    NoTiers,

    #[error("Outbound TLS setup failed: {0}")]
    Tls(#[from] ClientError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Name announced in `EHLO`/`HELO`.
    #[serde(default = "defaults::ehlo_name")]
    pub ehlo_name: String,

    #[serde(default)]
    pub timeouts: ClientTimeouts,

    /// Tried in order against every mail exchanger.
    #[serde(default)]
    pub tiers: TransportPolicy,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub dns: DnsConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ehlo_name: defaults::ehlo_name(),
            timeouts: ClientTimeouts::default(),
            tiers: TransportPolicy::default(),
            tls: TlsConfig::default(),
            dns: DnsConfig::default(),
        }
    }
}

mod defaults {
    pub fn ehlo_name() -> String {
        String::from("smtp.custom-server.com")
    }
}

impl DeliveryConfig {
    /// # Errors
    ///
    /// Returns an error if the TLS identity can't be loaded.
    pub fn connector(&self) -> Result<SmtpConnector, ConfigError> {
        let tls = ClientTls::from_config(&self.tls)?;

        Ok(SmtpConnector::new(
            self.ehlo_name.clone(),
            self.timeouts.clone(),
            tls,
        ))
    }

    /// Assemble an engine backed by the system resolver and real network
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns an error if no tiers are configured or the TLS identity can't
    /// be loaded.
    pub fn engine(&self, signer: Arc<dyn MessageSigner>) -> Result<DeliveryEngine, ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }

        Ok(DeliveryEngine::new(
            Arc::new(HickoryMxResolver::new(&self.dns)),
            Arc::new(self.connector()?),
            signer,
            self.tiers.clone(),
        ))
    }
}
