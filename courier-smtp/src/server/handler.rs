use std::{future::Future, net::SocketAddr, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::{incoming, internal, outgoing, tracing};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use super::{Command, SmtpConfig};
use crate::{
    backend::Session,
    error::{ServerError, SessionError},
};

/// Outcome of reading from the client.
enum Line {
    /// Up to and including a line feed, or a partial line at the read limit.
    Complete(Vec<u8>),
    TooLong,
    Closed,
}

/// Transaction bookkeeping the server needs for command ordering.
#[derive(Debug, Default)]
struct Transaction {
    has_sender: bool,
    recipients: usize,
}

/// Drives one client connection against its session.
pub(crate) struct Handler<'a, Stream, S> {
    stream: BufStream<Stream>,
    session: S,
    config: &'a SmtpConfig,
    peer: SocketAddr,
    greeted: bool,
    authenticated: bool,
    transaction: Transaction,
}

impl<'a, Stream, S> Handler<'a, Stream, S>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    pub(crate) fn new(stream: Stream, session: S, config: &'a SmtpConfig, peer: SocketAddr) -> Self {
        Self {
            stream: BufStream::new(stream),
            session,
            config,
            peer,
            greeted: false,
            authenticated: false,
            transaction: Transaction::default(),
        }
    }

    /// Runs the session until the client quits or the connection fails.
    ///
    /// The session is always logged out before returning.
    #[tracing::instrument(level = "debug", skip(self), fields(peer = %self.peer))]
    pub(crate) async fn run(mut self) -> Result<(), ServerError> {
        let result = self.converse().await;

        if let Err(err) = self.session.logout().await {
            internal!(level = WARN, "Logout failed: {err}");
        }

        match &result {
            Ok(()) => internal!(level = DEBUG, "Connection from {} finished", self.peer),
            Err(err) => internal!(level = DEBUG, "Connection from {} ended: {err}", self.peer),
        }

        result
    }

    async fn converse(&mut self) -> Result<(), ServerError> {
        let greeting = format!("{} ESMTP Service Ready", self.config.banner);
        self.reply(220, &greeting).await?;

        loop {
            let line = match self.read_command_line().await? {
                Line::Complete(line) => line,
                Line::TooLong => {
                    self.reply(500, "Line too long").await?;
                    continue;
                }
                Line::Closed => return Ok(()),
            };

            let line = String::from_utf8_lossy(&line);
            incoming!("{}", line.trim_end());

            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(err) => {
                    self.reply(err.code(), &err.to_string()).await?;
                    continue;
                }
            };

            match command {
                Command::Ehlo(domain) => self.ehlo(&domain).await?,
                Command::Helo(domain) => {
                    self.begin(true).await;
                    let text = format!("{} Hello {domain}", self.config.banner);
                    self.reply(250, &text).await?;
                }
                Command::MailFrom(from) => self.mail(&from).await?,
                Command::RcptTo(to) => self.rcpt(&to).await?,
                Command::Data => self.data().await?,
                Command::Rset => {
                    self.begin(self.greeted).await;
                    self.reply(250, "OK").await?;
                }
                Command::Noop => self.reply(250, "OK").await?,
                Command::Vrfy(_) => {
                    self.reply(
                        252,
                        "Cannot VRFY user, but will accept message and attempt delivery",
                    )
                    .await?;
                }
                Command::Auth { mechanism, initial } => self.auth(&mechanism, initial).await?,
                Command::Quit => {
                    self.reply(221, "Bye").await?;
                    return Ok(());
                }
            }
        }
    }

    /// Starts a fresh transaction, discarding any in progress.
    async fn begin(&mut self, greeted: bool) {
        self.greeted = greeted;
        self.transaction = Transaction::default();
        self.session.reset().await;
    }

    async fn ehlo(&mut self, domain: &str) -> Result<(), ServerError> {
        self.begin(true).await;

        let lines = [
            format!("{} Hello {domain}", self.config.banner),
            format!("SIZE {}", self.config.max_message_bytes),
            String::from("8BITMIME"),
            String::from("SMTPUTF8"),
            String::from("PIPELINING"),
            String::from("AUTH PLAIN"),
        ];

        self.reply_lines(250, &lines).await
    }

    async fn mail(&mut self, from: &str) -> Result<(), ServerError> {
        if !self.greeted {
            return self.reply(503, "Send EHLO or HELO first").await;
        }

        if self.transaction.has_sender {
            return self.reply(503, "Sender already specified").await;
        }

        match self.session.mail(from).await {
            Ok(()) => {
                self.transaction.has_sender = true;
                self.reply(250, "OK").await
            }
            Err(err) => self.reject(err).await,
        }
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), ServerError> {
        if !self.transaction.has_sender {
            return self.reply(503, "Need MAIL before RCPT").await;
        }

        if self.transaction.recipients >= self.config.max_recipients {
            let text = format!("Maximum limit of {} recipients reached", self.config.max_recipients);
            return self.reply(452, &text).await;
        }

        match self.session.rcpt(to).await {
            Ok(()) => {
                self.transaction.recipients += 1;
                self.reply(250, "OK").await
            }
            Err(err) => self.reject(err).await,
        }
    }

    async fn data(&mut self) -> Result<(), ServerError> {
        if !self.transaction.has_sender {
            return self.reply(503, "Need MAIL before DATA").await;
        }

        if self.transaction.recipients == 0 {
            return self.reply(503, "Need RCPT before DATA").await;
        }

        self.reply(354, "Start mail input; end with <CRLF>.<CRLF>").await?;

        let Some(body) = self.read_body().await? else {
            let text = format!(
                "Maximum message size exceeded ({} bytes)",
                self.config.max_message_bytes
            );
            self.begin(self.greeted).await;
            return self.reply(552, &text).await;
        };

        internal!(level = DEBUG, "Received {} byte message from {}", body.len(), self.peer);

        let mut reader: &[u8] = &body;
        let result = self.session.data(&mut reader).await;
        self.begin(self.greeted).await;

        match result {
            Ok(()) => self.reply(250, "OK: message accepted").await,
            Err(err) if err.is_fatal() => {
                self.reply(err.code(), &err.to_string()).await?;
                Err(ServerError::Session(err))
            }
            Err(err) => self.reject(err).await,
        }
    }

    async fn auth(&mut self, mechanism: &str, initial: Option<String>) -> Result<(), ServerError> {
        if self.authenticated {
            return self.reply(503, "Already authenticated").await;
        }

        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return self.reply(504, "Unrecognized authentication type").await;
        }

        let encoded = if let Some(initial) = initial {
            initial
        } else {
            self.reply(334, "").await?;
            match self.read_command_line().await? {
                Line::Complete(line) => String::from_utf8_lossy(&line).trim().to_string(),
                Line::TooLong => return self.reply(500, "Line too long").await,
                Line::Closed => return Err(ServerError::Closed),
            }
        };

        if encoded == "*" {
            return self.reply(501, "Authentication cancelled").await;
        }

        let Some((username, password)) = decode_plain(&encoded) else {
            return self.reply(501, "Malformed AUTH PLAIN response").await;
        };

        match self.session.auth_plain(&username, &password).await {
            Ok(()) => {
                self.authenticated = true;
                self.reply(235, "Authentication succeeded").await
            }
            Err(err) => {
                internal!(level = INFO, "Authentication failed for {username}: {err}");
                self.reply(535, "Authentication credentials invalid").await
            }
        }
    }

    async fn reject(&mut self, err: SessionError) -> Result<(), ServerError> {
        let code = err.code();
        self.reply(code, &err.to_string()).await?;

        if err.is_fatal() {
            Err(ServerError::Session(err))
        } else {
            Ok(())
        }
    }

    /// Reads a message body up to the lone `.` line.
    ///
    /// Returns `None` when the body exceeds the size limit; the rest of the
    /// body is still consumed so the connection stays in sync.
    async fn read_body(&mut self) -> Result<Option<Vec<u8>>, ServerError> {
        let mut body = Vec::new();
        let mut oversized = false;
        let mut at_line_start = true;

        loop {
            let (chunk, complete) = match self.read_line(self.config.max_line_length).await? {
                Line::Complete(chunk) => {
                    let complete = chunk.ends_with(b"\n");
                    (chunk, complete)
                }
                Line::TooLong | Line::Closed => return Err(ServerError::Closed),
            };

            let mut content = chunk.as_slice();
            if at_line_start {
                if matches!(content, b".\r\n" | b".\n") {
                    break;
                }
                if content.first() == Some(&b'.') {
                    content = &content[1..];
                }
            }
            at_line_start = complete;

            if body.len() + content.len() > self.config.max_message_bytes {
                oversized = true;
                body.clear();
            }

            if !oversized {
                body.extend_from_slice(content);
            }
        }

        Ok((!oversized).then_some(body))
    }

    /// Reads one command line. The rest of an over-long line is discarded.
    async fn read_command_line(&mut self) -> Result<Line, ServerError> {
        let limit = self.config.max_line_length;

        match self.read_line(limit).await? {
            Line::Complete(line) if !line.ends_with(b"\n") && line.len() >= limit => {
                loop {
                    match self.read_line(limit).await? {
                        Line::Complete(rest) if rest.ends_with(b"\n") => return Ok(Line::TooLong),
                        Line::Complete(_) | Line::TooLong => {}
                        Line::Closed => return Ok(Line::Closed),
                    }
                }
            }
            other => Ok(other),
        }
    }

    /// Reads up to `limit` bytes, stopping after a line feed.
    async fn read_line(&mut self, limit: usize) -> Result<Line, ServerError> {
        let timeout = self.config.timeouts.read();
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        let mut buffer = Vec::new();

        let read = within(timeout, ServerError::ReadTimeout(timeout), async {
            (&mut self.stream)
                .take(limit)
                .read_until(b'\n', &mut buffer)
                .await
        })
        .await?;

        if read == 0 {
            return Ok(Line::Closed);
        }

        Ok(Line::Complete(buffer))
    }

    async fn reply(&mut self, code: u16, text: &str) -> Result<(), ServerError> {
        self.reply_lines(code, &[text]).await
    }

    async fn reply_lines<T: AsRef<str>>(&mut self, code: u16, lines: &[T]) -> Result<(), ServerError> {
        let mut payload = String::new();

        for (index, line) in lines.iter().enumerate() {
            let separator = if index + 1 == lines.len() { ' ' } else { '-' };
            let line = line.as_ref();
            outgoing!("{code}{separator}{line}");
            payload.push_str(&format!("{code}{separator}{line}\r\n"));
        }

        let timeout = self.config.timeouts.write();
        within(timeout, ServerError::WriteTimeout(timeout), async {
            self.stream.write_all(payload.as_bytes()).await?;
            self.stream.flush().await
        })
        .await
    }
}

async fn within<T>(
    limit: Duration,
    elapsed: ServerError,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T, ServerError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(ServerError::from),
        Err(_) => Err(elapsed),
    }
}

/// Decodes an `AUTH PLAIN` response: `authzid NUL authcid NUL passwd`.
fn decode_plain(encoded: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let mut parts = decoded.split(|&b| b == 0);

    let _authzid = parts.next()?;
    let username = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let password = String::from_utf8(parts.next()?.to_vec()).ok()?;

    if parts.next().is_some() || username.is_empty() {
        return None;
    }

    Some((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_credentials() {
        let encoded = STANDARD.encode(b"\0alice\0secret");
        assert_eq!(
            decode_plain(&encoded),
            Some(("alice".to_string(), "secret".to_string()))
        );

        let with_authzid = STANDARD.encode(b"admin\0alice\0secret");
        assert_eq!(
            decode_plain(&with_authzid),
            Some(("alice".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_credentials() {
        assert_eq!(decode_plain("not base64!"), None);
        assert_eq!(decode_plain(&STANDARD.encode(b"alice")), None);
        assert_eq!(decode_plain(&STANDARD.encode(b"\0\0secret")), None);
    }
}
