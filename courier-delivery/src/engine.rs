//! Per-recipient fan-out over hosts and tiers.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    attempt::{Envelope, attempt_route},
    dns::{MxResolver, resolve},
    outcome::{DeliveryOutcome, DeliveryStatus, RouteAttempt},
    signer::MessageSigner,
    transport::{Connector, Route, TransportPolicy, first_success},
};

/// Delivers messages to remote mail exchangers.
///
/// Holds only shared, read-only collaborators, so one engine serves every
/// session.
#[derive(Clone)]
pub struct DeliveryEngine {
    resolver: Arc<dyn MxResolver>,
    connector: Arc<dyn Connector>,
    signer: Arc<dyn MessageSigner>,
    policy: TransportPolicy,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    pub fn new(
        resolver: Arc<dyn MxResolver>,
        connector: Arc<dyn Connector>,
        signer: Arc<dyn MessageSigner>,
        policy: TransportPolicy,
    ) -> Self {
        Self {
            resolver,
            connector,
            signer,
            policy,
        }
    }

    pub const fn policy(&self) -> &TransportPolicy {
        &self.policy
    }

    /// Deliver `message` to a single recipient.
    ///
    /// Hosts are tried in preference order and, for each host, every tier in
    /// policy order. The first route that accepts the message ends the
    /// search. Never fails: the outcome records what went wrong.
    #[tracing::instrument(name = "recipient", skip(self, from, to, message), fields(%to))]
    pub async fn deliver(&self, from: &str, to: &str, message: &[u8]) -> DeliveryOutcome {
        let hosts: Vec<String> = match resolve(self.resolver.as_ref(), to).await {
            Ok(records) => records.into_iter().map(|record| record.host).collect(),
            Err(err) => {
                error!("Delivery failed: {err}");
                return DeliveryOutcome {
                    recipient: to.to_string(),
                    status: DeliveryStatus::Failed(err),
                    attempts: Vec::new(),
                };
            }
        };

        let envelope = Envelope { from, to, message };
        let connector = self.connector.as_ref();
        let signer = self.signer.as_ref();

        let fallback = first_success(self.policy.routes(&hosts), move |route: Route| async move {
            debug!(host = %route.host, tier = %route.tier, port = route.tier.port, "Attempting route");

            let result = attempt_route(connector, signer, &route, envelope).await;
            if let Err(err) = &result {
                warn!(host = %route.host, tier = %route.tier, "Route failed: {err}");
            }

            result
        })
        .await;

        let attempts = fallback
            .tried
            .into_iter()
            .map(|(route, error)| RouteAttempt { route, error })
            .collect();

        let status = match fallback.result {
            Ok(()) => {
                info!("Delivered");
                DeliveryStatus::Delivered
            }
            Err(err) => {
                error!("Delivery failed: {err}");
                DeliveryStatus::Failed(err)
            }
        };

        DeliveryOutcome {
            recipient: to.to_string(),
            status,
            attempts,
        }
    }

    /// Deliver to every recipient in turn, in the order given.
    ///
    /// One outcome per recipient, duplicates included. A failure for one
    /// recipient has no effect on the others.
    pub async fn deliver_all(
        &self,
        from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            outcomes.push(self.deliver(from, recipient, message).await);
        }

        outcomes
    }
}
