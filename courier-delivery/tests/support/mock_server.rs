//! A scripted destination mail server for delivery tests.
//!
//! Speaks just enough SMTP to accept (or refuse) one message per
//! transaction, optionally offering `STARTTLS` or requiring TLS from the
//! first byte, and records everything it saw.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

/// What the server observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    /// A TLS handshake completed.
    Secured,
    Command(String),
    Content(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plain,
    StartTls,
    /// Offers `STARTTLS`, then answers the handshake with garbage.
    BrokenStartTls,
    Implicit,
}

#[derive(Debug, Clone)]
struct Script {
    mode: Mode,
    rcpt: (u16, String),
    data_end: (u16, String),
}

pub struct MockDestination {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<Event>>>,
    task: JoinHandle<()>,
}

impl MockDestination {
    pub fn builder() -> MockDestinationBuilder {
        MockDestinationBuilder {
            script: Script {
                mode: Mode::Plain,
                rcpt: (250, String::from("OK")),
                data_end: (250, String::from("OK: queued")),
            },
        }
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Command(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Content(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == Event::Connected)
            .count()
    }

    pub fn secured(&self) -> bool {
        self.events().contains(&Event::Secured)
    }
}

impl Drop for MockDestination {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct MockDestinationBuilder {
    script: Script,
}

impl MockDestinationBuilder {
    /// Advertise and honour `STARTTLS`.
    #[must_use]
    pub const fn with_starttls(mut self) -> Self {
        self.script.mode = Mode::StartTls;
        self
    }

    /// Advertise `STARTTLS` but never complete the handshake.
    #[must_use]
    pub const fn with_broken_starttls(mut self) -> Self {
        self.script.mode = Mode::BrokenStartTls;
        self
    }

    /// Handshake before the greeting.
    #[must_use]
    pub const fn with_implicit_tls(mut self) -> Self {
        self.script.mode = Mode::Implicit;
        self
    }

    #[must_use]
    pub fn with_rcpt_response(mut self, code: u16, message: &str) -> Self {
        self.script.rcpt = (code, message.to_string());
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.script.data_end = (code, message.to_string());
        self
    }

    pub async fn build(self) -> std::io::Result<MockDestination> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let events = Arc::new(Mutex::new(Vec::new()));
        let acceptor = acceptor();
        let script = Arc::new(self.script);

        let task = {
            let events = Arc::clone(&events);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let events = Arc::clone(&events);
                    let acceptor = acceptor.clone();
                    let script = Arc::clone(&script);

                    tokio::spawn(async move {
                        record(&events, Event::Connected);

                        if script.mode == Mode::Implicit {
                            if let Ok(stream) = acceptor.accept(stream).await {
                                record(&events, Event::Secured);
                                let _ = converse(stream, &script, &events, true).await;
                            }
                            return;
                        }

                        if let Ok(Some(stream)) = converse(stream, &script, &events, false).await {
                            if let Ok(stream) = acceptor.accept(stream).await {
                                record(&events, Event::Secured);
                                let _ = converse(stream, &script, &events, true).await;
                            }
                        }
                    });
                }
            })
        };

        Ok(MockDestination { addr, events, task })
    }
}

fn record(events: &Mutex<Vec<Event>>, event: Event) {
    events.lock().unwrap().push(event);
}

fn acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec![String::from("localhost")])
        .expect("generate certificate");
    let chain: Vec<CertificateDer<'static>> = vec![certified.cert.der().clone()];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .expect("server config");

    TlsAcceptor::from(Arc::new(config))
}

async fn reply<S: AsyncWrite + Unpin>(stream: &mut S, code: u16, message: &str) -> std::io::Result<()> {
    stream
        .write_all(format!("{code} {message}\r\n").as_bytes())
        .await?;
    stream.flush().await
}

/// Runs one SMTP conversation. Returns the bare stream when the client
/// asked for `STARTTLS` and was told to go ahead.
async fn converse<S>(
    stream: S,
    script: &Script,
    events: &Mutex<Vec<Event>>,
    secured: bool,
) -> std::io::Result<Option<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = String::new();

    if !secured || script.mode == Mode::Implicit {
        reply(&mut stream, 220, "mock.dest.org ESMTP").await?;
    }

    loop {
        line.clear();
        let read = timeout(Duration::from_secs(10), stream.read_line(&mut line)).await;
        if !matches!(read, Ok(Ok(n)) if n > 0) {
            return Ok(None);
        }

        let command = line.trim_end().to_string();
        record(events, Event::Command(command.clone()));

        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match verb.as_str() {
            "EHLO" => {
                let offer =
                    matches!(script.mode, Mode::StartTls | Mode::BrokenStartTls) && !secured;
                let mut response = String::from("250-mock.dest.org\r\n");
                if offer {
                    response.push_str("250-STARTTLS\r\n");
                }
                response.push_str("250 8BITMIME\r\n");
                stream.write_all(response.as_bytes()).await?;
                stream.flush().await?;
            }
            "HELO" | "MAIL" | "RSET" | "NOOP" => reply(&mut stream, 250, "OK").await?,
            "RCPT" => reply(&mut stream, script.rcpt.0, &script.rcpt.1).await?,
            "STARTTLS" if script.mode == Mode::StartTls && !secured => {
                reply(&mut stream, 220, "Go ahead").await?;
                return Ok(Some(stream.into_inner()));
            }
            "STARTTLS" if script.mode == Mode::BrokenStartTls => {
                reply(&mut stream, 220, "Go ahead").await?;
                stream.write_all(b"this is not a TLS record\r\n").await?;
                stream.flush().await?;
                return Ok(None);
            }
            "DATA" => {
                reply(&mut stream, 354, "End data with <CR><LF>.<CR><LF>").await?;

                // Content may carry 8-bit bytes, so it's read raw.
                let mut content = Vec::new();
                let mut raw = Vec::new();
                loop {
                    raw.clear();
                    if stream.read_until(b'\n', &mut raw).await? == 0 {
                        return Ok(None);
                    }
                    if raw == b".\r\n" {
                        break;
                    }
                    let unstuffed = raw.strip_prefix(b".").unwrap_or(&raw);
                    content.extend_from_slice(unstuffed);
                }

                record(events, Event::Content(content));
                reply(&mut stream, script.data_end.0, &script.data_end.1).await?;
            }
            "QUIT" => {
                reply(&mut stream, 221, "Bye").await?;
                return Ok(None);
            }
            _ => reply(&mut stream, 502, "Command not implemented").await?,
        }
    }
}
