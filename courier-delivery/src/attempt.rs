//! A single delivery attempt over one route.

use tracing::debug;

use crate::{
    error::DeliveryError,
    signer::MessageSigner,
    transport::{Connector, MailTransport, Route},
};

/// The parts of a message that don't change between attempts.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub message: &'a [u8],
}

/// Connect over `route`, sign, transfer and quit.
///
/// The transport is closed on every path out of here once it was opened.
/// The message is signed afresh for every attempt.
///
/// # Errors
///
/// Whatever stopped the attempt: a connect or transfer failure lets the
/// caller move on to the next route, a signing failure doesn't.
pub async fn attempt_route(
    connector: &dyn Connector,
    signer: &dyn MessageSigner,
    route: &Route,
    envelope: Envelope<'_>,
) -> Result<(), DeliveryError> {
    let mut transport = connector.connect(&route.host, route.tier).await?;

    let result = transfer(transport.as_mut(), signer, envelope).await;
    transport.close().await;

    result
}

async fn transfer(
    transport: &mut dyn MailTransport,
    signer: &dyn MessageSigner,
    envelope: Envelope<'_>,
) -> Result<(), DeliveryError> {
    let signed = signer.sign(envelope.message)?;

    transport
        .send(envelope.from, envelope.to, &signed)
        .await?;

    // The content has been accepted at this point.
    if let Err(err) = transport.quit().await {
        debug!("Ignoring failed QUIT after delivery: {err}");
    }

    Ok(())
}
