//! SMTP sessions with remote mail exchangers, one per route.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use courier_common::{
    address::{normalise_host, socket_address},
    config::ClientTimeouts,
    tracing::{self, debug, warn},
};
use courier_smtp::client::{ClientError, ClientTls, SmtpClient};
use tokio::time::timeout;

use crate::{
    error::DeliveryError,
    transport::{Connector, MailTransport, Security, TierSpec},
};

/// Runs one client exchange under `limit`, describing failures by `step`.
async fn timed<T>(
    limit: Duration,
    step: &str,
    exchange: impl Future<Output = Result<T, ClientError>> + Send,
) -> Result<T, String> {
    match timeout(limit, exchange).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(ClientError::UnexpectedResponse { code, message })) => {
            Err(format!("{step} refused with {code}: {message}"))
        }
        Ok(Err(err)) => Err(format!("{step} failed: {err}")),
        Err(_) => Err(format!("{step} timed out after {limit:?}")),
    }
}

async fn close_quietly(client: &mut SmtpClient) {
    if let Err(err) = client.close().await {
        debug!("Error while closing connection: {err}");
    }
}

/// Why a session couldn't be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenError {
    /// The TLS handshake after `STARTTLS` failed, leaving no connection.
    Handshake(String),
    Other(String),
}

impl From<String> for OpenError {
    fn from(reason: String) -> Self {
        Self::Other(reason)
    }
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(reason) | Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// How the cleartext tiers deal with `STARTTLS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upgrade {
    /// Don't attempt it.
    Skip,
    /// Attempt it when advertised; a failed handshake retries without.
    IfOffered,
    /// The session is useless without it.
    Required,
}

/// Opens [`SmtpTransport`]s with real network connections.
#[derive(Debug)]
pub struct SmtpConnector {
    ehlo_name: String,
    timeouts: ClientTimeouts,
    tls: ClientTls,
}

impl SmtpConnector {
    pub const fn new(ehlo_name: String, timeouts: ClientTimeouts, tls: ClientTls) -> Self {
        Self {
            ehlo_name,
            timeouts,
            tls,
        }
    }

    /// Greeting plus `EHLO`, falling back to `HELO` for servers that don't
    /// speak ESMTP. Returns whether `STARTTLS` is on offer.
    async fn greet(&self, client: &mut SmtpClient) -> Result<bool, String> {
        let limit = self.timeouts.command();

        timed(limit, "Greeting", async {
            client.read_greeting().await?.expect_class(2)
        })
        .await?;

        let ehlo = timed(limit, "EHLO", client.ehlo(&self.ehlo_name)).await?;
        if ehlo.is_success() {
            return Ok(ehlo.advertises("STARTTLS"));
        }

        timed(limit, "HELO", async {
            client.helo(&self.ehlo_name).await?.expect_class(2)
        })
        .await?;

        Ok(false)
    }

    async fn cleartext(
        &self,
        address: &str,
        server_name: &str,
        upgrade: Upgrade,
    ) -> Result<SmtpClient, OpenError> {
        let mut client = timed(
            self.timeouts.connect(),
            "Connect",
            SmtpClient::connect(address, server_name),
        )
        .await?;

        match self.negotiate(&mut client, upgrade).await {
            Ok(()) => Ok(client),
            Err(err) => {
                close_quietly(&mut client).await;
                Err(err)
            }
        }
    }

    async fn negotiate(
        &self,
        client: &mut SmtpClient,
        upgrade: Upgrade,
    ) -> Result<(), OpenError> {
        let offered = self.greet(client).await?;

        match upgrade {
            Upgrade::Skip => return Ok(()),
            Upgrade::IfOffered if !offered => return Ok(()),
            Upgrade::Required if !offered => {
                return Err(String::from("STARTTLS required but not offered").into());
            }
            Upgrade::IfOffered | Upgrade::Required => {}
        }

        let response = timed(
            self.timeouts.connect(),
            "STARTTLS",
            client.starttls(&self.tls),
        )
        .await
        .map_err(OpenError::Handshake)?;

        if !response.is_success() {
            return match upgrade {
                Upgrade::Required => Err(OpenError::Other(format!(
                    "STARTTLS refused with {}: {}",
                    response.code,
                    response.message()
                ))),
                _ => Ok(()),
            };
        }

        // The session starts over once encrypted.
        timed(self.timeouts.command(), "EHLO", async {
            client.ehlo(&self.ehlo_name).await?.expect_class(2)
        })
        .await?;

        Ok(())
    }

    async fn implicit(&self, address: &str, server_name: &str) -> Result<SmtpClient, OpenError> {
        let mut client = timed(
            self.timeouts.connect(),
            "TLS connect",
            SmtpClient::connect_tls(address, server_name, &self.tls),
        )
        .await?;

        match self.greet(&mut client).await {
            Ok(_) => Ok(client),
            Err(err) => {
                close_quietly(&mut client).await;
                Err(err.into())
            }
        }
    }

    async fn open(&self, host: &str, tier: TierSpec) -> Result<SmtpClient, OpenError> {
        let address = socket_address(host, tier.port);
        let server_name = normalise_host(host);

        match tier.security {
            Security::Opportunistic => {
                match self.cleartext(&address, server_name, Upgrade::IfOffered).await {
                    Ok(client) => Ok(client),
                    // A failed handshake leaves nothing to continue on, so
                    // start over in cleartext.
                    Err(OpenError::Handshake(err)) => {
                        warn!("Opportunistic TLS with {address} failed ({err}), retrying without");
                        self.cleartext(&address, server_name, Upgrade::Skip).await
                    }
                    Err(err) => Err(err),
                }
            }
            Security::ExplicitUpgrade => {
                self.cleartext(&address, server_name, Upgrade::Required).await
            }
            Security::ImplicitTls => self.implicit(&address, server_name).await,
        }
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    #[tracing::instrument(skip(self, tier), fields(tier = %tier))]
    async fn connect(
        &self,
        host: &str,
        tier: TierSpec,
    ) -> Result<Box<dyn MailTransport>, DeliveryError> {
        let client = self
            .open(host, tier)
            .await
            .map_err(|err| DeliveryError::ConnectFailure(format!("{host} on {tier}: {err}")))?;

        debug!(encrypted = client.is_encrypted(), "Session established");

        Ok(Box::new(SmtpTransport {
            client,
            timeouts: self.timeouts.clone(),
        }))
    }
}

/// An established, greeted session.
pub struct SmtpTransport {
    client: SmtpClient,
    timeouts: ClientTimeouts,
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&mut self, from: &str, to: &str, message: &[u8]) -> Result<(), DeliveryError> {
        let limit = self.timeouts.command();
        let data_limit = self.timeouts.data();
        let client = &mut self.client;

        let transfer = async {
            timed(limit, "MAIL FROM", async {
                client.mail_from(from).await?.expect_class(2)
            })
            .await?;

            timed(limit, "RCPT TO", async {
                client.rcpt_to(to).await?.expect_class(2)
            })
            .await?;

            timed(limit, "DATA", async { client.data().await?.expect_class(3) }).await?;

            timed(data_limit, "Message content", async {
                client.send_data(message).await?.expect_class(2)
            })
            .await
        };

        transfer.await.map(|_| ()).map_err(DeliveryError::TransferFailure)
    }

    async fn quit(&mut self) -> Result<(), DeliveryError> {
        timed(self.timeouts.quit(), "QUIT", async {
            self.client.quit().await?.expect_class(2)
        })
        .await
        .map(|_| ())
        .map_err(DeliveryError::TransferFailure)
    }

    async fn close(&mut self) {
        close_quietly(&mut self.client).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timed_reports_refusals_and_timeouts() {
        let refused = timed(Duration::from_secs(1), "RCPT TO", async {
            Err::<(), _>(ClientError::UnexpectedResponse {
                code: 550,
                message: String::from("No such user"),
            })
        })
        .await;
        assert_eq!(
            refused,
            Err(String::from("RCPT TO refused with 550: No such user"))
        );

        let stalled = timed(Duration::from_millis(10), "DATA", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ClientError>(())
        })
        .await;
        assert_eq!(stalled, Err(String::from("DATA timed out after 10ms")));
    }
}
