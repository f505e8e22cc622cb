//! The per-connection relay session.
//!
//! Accumulates the envelope for one transaction and, once the body has been
//! read, hands everything to the delivery engine one recipient at a time.
//! Delivery failures end up in the outcomes, never in the reply to the
//! client.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use courier_common::internal;
use courier_delivery::{DeliveryEngine, DeliveryOutcome};
use courier_smtp::{Session, SessionError};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Where a session is in its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SenderSet,
    RecipientsCollected,
    Completed,
    LoggedOut,
}

#[derive(Debug)]
pub struct RelaySession {
    peer: SocketAddr,
    engine: Arc<DeliveryEngine>,
    phase: Phase,
    sender: String,
    recipients: Vec<String>,
    outcomes: Vec<DeliveryOutcome>,
}

impl RelaySession {
    pub const fn new(peer: SocketAddr, engine: Arc<DeliveryEngine>) -> Self {
        Self {
            peer,
            engine,
            phase: Phase::Idle,
            sender: String::new(),
            recipients: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Empty until `MAIL FROM`.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Outcomes of the most recent submission, one per recipient.
    pub fn outcomes(&self) -> &[DeliveryOutcome] {
        &self.outcomes
    }

    fn clear(&mut self) {
        self.sender.clear();
        self.recipients.clear();
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.phase == Phase::LoggedOut {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Session for RelaySession {
    async fn mail(&mut self, from: &str) -> Result<(), SessionError> {
        self.ensure_open()?;

        if !matches!(self.phase, Phase::Idle | Phase::Completed) {
            return Err(SessionError::BadSequence(String::from(
                "Sender already specified",
            )));
        }

        if from.is_empty() {
            return Err(SessionError::InvalidArgument(String::from(
                "Empty sender address",
            )));
        }

        from.clone_into(&mut self.sender);
        self.recipients.clear();
        self.phase = Phase::SenderSet;

        internal!("[{}] Sender set to {from}", self.peer);
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), SessionError> {
        self.ensure_open()?;

        if !matches!(self.phase, Phase::SenderSet | Phase::RecipientsCollected) {
            return Err(SessionError::BadSequence(String::from(
                "Need MAIL before RCPT",
            )));
        }

        self.recipients.push(to.to_string());
        self.phase = Phase::RecipientsCollected;

        internal!("[{}] Recipient {to} added", self.peer);
        Ok(())
    }

    async fn data(&mut self, body: &mut (dyn AsyncRead + Unpin + Send)) -> Result<(), SessionError> {
        self.ensure_open()?;

        let mut message = Vec::new();
        body.read_to_end(&mut message).await?;

        internal!(
            level = DEBUG,
            "[{}] Received {} byte message for {} recipient(s)",
            self.peer,
            message.len(),
            self.recipients.len()
        );

        self.outcomes = self
            .engine
            .deliver_all(&self.sender, &self.recipients, &message)
            .await;

        let delivered = self.outcomes.iter().filter(|o| o.is_delivered()).count();
        internal!(
            level = INFO,
            "[{}] Delivered to {delivered} of {} recipient(s)",
            self.peer,
            self.outcomes.len()
        );

        self.phase = Phase::Completed;
        Ok(())
    }

    async fn reset(&mut self) {
        if self.phase == Phase::LoggedOut {
            return;
        }

        self.clear();
        self.phase = Phase::Idle;
        internal!("[{}] Session reset", self.peer);
    }

    async fn logout(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::LoggedOut {
            self.clear();
            self.phase = Phase::LoggedOut;
            internal!("[{}] Session closed", self.peer);
        }

        Ok(())
    }
}
