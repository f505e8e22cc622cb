use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use courier_common::internal;
use courier_delivery::DeliveryEngine;
use courier_smtp::{Backend, SessionError};

use crate::session::RelaySession;

/// Hands every inbound connection its own [`RelaySession`], all sharing one
/// delivery engine.
#[derive(Debug, Clone)]
pub struct RelayBackend {
    engine: Arc<DeliveryEngine>,
}

impl RelayBackend {
    pub fn new(engine: DeliveryEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

#[async_trait]
impl Backend for RelayBackend {
    type Session = RelaySession;

    async fn new_session(&self, peer: SocketAddr) -> Result<Self::Session, SessionError> {
        internal!(level = DEBUG, "New session for {peer}");
        Ok(RelaySession::new(peer, Arc::clone(&self.engine)))
    }
}
