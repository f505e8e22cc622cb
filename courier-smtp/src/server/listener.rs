use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use courier_common::{Signal, error::ListenerError, internal, tracing};
use futures_util::future::join_all;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

use super::{SmtpConfig, handler::Handler};
use crate::backend::Backend;

/// An inbound SMTP server: one backend, any number of listening sockets.
pub struct SmtpServer<B: Backend> {
    backend: Arc<B>,
    config: Arc<SmtpConfig>,
}

impl<B: Backend> SmtpServer<B> {
    pub fn new(backend: B, config: SmtpConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
        }
    }

    /// Bind one socket.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::BindFailed`] if the socket can't be bound.
    pub async fn bind(&self, socket: SocketAddr) -> Result<Listener<B>, ListenerError> {
        let listener = TcpListener::bind(socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: socket.to_string(),
                source,
            })?;

        Ok(Listener {
            listener,
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
        })
    }

    /// Bind every configured socket and serve until shutdown.
    ///
    /// The listeners subscribe to `shutdown` when this is called, so a signal
    /// sent before the returned future first runs is still seen.
    ///
    /// # Errors
    ///
    /// Returns the first bind failure, before any connection is accepted.
    pub fn serve(
        &self,
        shutdown: &broadcast::Sender<Signal>,
        grace: Duration,
    ) -> impl Future<Output = Result<(), ListenerError>> + '_ {
        let receivers: Vec<_> = self
            .config
            .listeners
            .iter()
            .map(|_| shutdown.subscribe())
            .collect();

        async move {
            let mut listeners = Vec::with_capacity(receivers.len());
            for socket in &self.config.listeners {
                listeners.push(self.bind(*socket).await?);
            }

            let results = join_all(
                listeners
                    .into_iter()
                    .zip(receivers)
                    .map(|(listener, receiver)| listener.serve(receiver, grace)),
            )
            .await;

            results.into_iter().collect()
        }
    }
}

/// A bound socket accepting SMTP connections.
pub struct Listener<B: Backend> {
    listener: TcpListener,
    backend: Arc<B>,
    config: Arc<SmtpConfig>,
}

impl<B: Backend> Listener<B> {
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal arrives.
    ///
    /// In-flight sessions then get `grace` to finish before they're aborted.
    /// A failed `accept` is logged and the listener keeps going.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket's local address can't be read.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn serve(
        self,
        mut shutdown: broadcast::Receiver<Signal>,
        grace: Duration,
    ) -> Result<(), ListenerError> {
        let address = self.listener.local_addr()?;
        internal!(level = INFO, "SMTP Listener serving on {address}");

        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(
                            level = INFO,
                            "SMTP Listener {address} received shutdown signal, finishing sessions ..."
                        );
                        break;
                    }
                }

                connection = self.listener.accept() => {
                    match connection {
                        Ok((stream, peer)) => {
                            tracing::debug!("Connection received on {address} from {peer}");

                            sessions.retain(|session| !session.is_finished());
                            sessions.push(self.spawn(stream, peer));
                        }
                        Err(err) => {
                            internal!(level = WARN, "Failed to accept connection on {address}: {err}");
                            if let Some(pause) = accept_backoff(&err) {
                                tokio::time::sleep(pause).await;
                            }
                        }
                    }
                }
            }
        }

        drop(self.listener);
        finish(sessions, grace).await;

        Ok(())
    }

    fn spawn(&self, stream: tokio::net::TcpStream, peer: SocketAddr) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            let session = match backend.new_session(peer).await {
                Ok(session) => session,
                Err(err) => {
                    internal!(level = WARN, "Refusing connection from {peer}: {err}");
                    return;
                }
            };

            if let Err(err) = Handler::new(stream, session, &config, peer).run().await {
                internal!(level = ERROR, "Error: {err}");
            }
        })
    }
}

/// How long to pause after a failed `accept`.
///
/// Errors tied to a single peer are retried at once. Anything else, such as
/// running out of file descriptors, will keep failing until some are freed.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Wait up to `grace` for sessions to finish, then abort the stragglers.
async fn finish(mut sessions: Vec<JoinHandle<()>>, grace: Duration) {
    if sessions.is_empty() {
        return;
    }

    let pending = sessions.len();
    if tokio::time::timeout(grace, join_all(sessions.iter_mut()))
        .await
        .is_err()
    {
        let remaining = sessions.iter().filter(|s| !s.is_finished()).count();
        internal!(
            level = WARN,
            "Grace period of {grace:?} elapsed, aborting {remaining} of {pending} sessions"
        );

        for session in &sessions {
            session.abort();
        }
    }
}
