use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

use courier_common::{incoming, outgoing};

use super::{
    error::{ClientError, Result},
    response::Response,
    tls::ClientTls,
};

/// Initial size of the reply buffer.
const BUFFER_SIZE: usize = 8192;

/// Replies larger than this are rejected rather than buffered (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await?,
            Self::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };

        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }

        Ok(n)
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await?,
            Self::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}

/// A single SMTP session with a remote server.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_name: String,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_name", &self.server_name)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    fn with_connection(connection: ClientConnection, server_name: String) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_name,
        }
    }

    /// Opens a cleartext connection.
    ///
    /// `server_name` is the name the peer is verified against if the session
    /// is later upgraded.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(address: &str, server_name: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;

        Ok(Self::with_connection(
            ClientConnection::Plain(stream),
            server_name.into(),
        ))
    }

    /// Opens a connection that is encrypted from the first byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the handshake fails.
    pub async fn connect_tls(
        address: &str,
        server_name: impl Into<String>,
        tls: &ClientTls,
    ) -> Result<Self> {
        let server_name = server_name.into();
        let stream = TcpStream::connect(address).await?;
        let stream = tls.handshake(stream, &server_name).await?;

        Ok(Self::with_connection(
            ClientConnection::Tls(Box::new(stream)),
            server_name,
        ))
    }

    /// Whether the session is currently running over TLS.
    pub const fn is_encrypted(&self) -> bool {
        matches!(self.connection, Some(ClientConnection::Tls(_)))
    }

    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends a raw command line and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(format!("{command}\r\n").as_bytes()).await?;
        connection.flush().await?;

        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends message content, dot-stuffed, followed by the terminating
    /// `.` line, and reads the server's verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<Response> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;

        connection.send(&dot_stuff(data)).await?;

        if !data.is_empty() && !data.ends_with(b"\r\n") {
            connection.send(b"\r\n").await?;
        }

        connection.send(b".\r\n").await?;
        connection.flush().await?;

        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// Sends `STARTTLS` and, if the server agrees, upgrades the connection.
    ///
    /// The server's reply is returned either way; a refusal leaves the
    /// session in cleartext.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange or the handshake fails. A failed
    /// handshake leaves the client without a connection.
    pub async fn starttls(&mut self, tls: &ClientTls) -> Result<Response> {
        if self.is_encrypted() {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        }

        let response = self.command("STARTTLS").await?;
        if !response.is_success() {
            return Ok(response);
        }

        match self.connection.take() {
            Some(ClientConnection::Plain(stream)) => {
                // Anything buffered before the handshake came from the
                // cleartext session and must not be trusted.
                self.buffer_pos = 0;
                let stream = tls.handshake(stream, &self.server_name).await?;
                self.connection = Some(ClientConnection::Tls(Box::new(stream)));
                Ok(response)
            }
            Some(tls_connection) => {
                self.connection = Some(tls_connection);
                Err(ClientError::TlsError(
                    "Connection is already TLS".to_string(),
                ))
            }
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Shuts the connection down. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport reports one while shutting down.
    pub async fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(mut connection) => connection.shutdown().await,
            None => Ok(()),
        }
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Doubles every `.` that starts a line.
fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut stuffed = Vec::with_capacity(data.len() + 16);
    let mut at_line_start = true;

    for &byte in data {
        if at_line_start && byte == b'.' {
            stuffed.push(b'.');
        }
        stuffed.push(byte);
        at_line_start = byte == b'\n';
    }

    stuffed
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpListener,
    };

    use super::*;

    #[test]
    fn stuffs_leading_dots() {
        assert_eq!(
            dot_stuff(b".hidden\r\nok\r\n..two\r\nmid.dle\r\n"),
            b"..hidden\r\nok\r\n...two\r\nmid.dle\r\n".to_vec()
        );
    }

    /// Serves one scripted session, returning every line the client sent.
    async fn scripted(
        replies: &'static [&'static str],
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut seen = Vec::new();

            writer.write_all(b"220 mock ESMTP\r\n").await.unwrap();
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                seen.push(line.trim_end().to_string());
                writer.write_all(reply.as_bytes()).await.unwrap();
            }

            seen
        });

        (address, handle)
    }

    #[tokio::test]
    async fn envelope_exchange() {
        let (address, server) = scripted(&[
            "250-mock\r\n250-SIZE 1000\r\n250 8BITMIME\r\n",
            "250 OK\r\n",
            "550 no such user\r\n",
            "221 bye\r\n",
        ])
        .await;

        let mut client = SmtpClient::connect(&address, "mock").await.unwrap();
        assert_eq!(client.read_greeting().await.unwrap().code, 220);

        let ehlo = client.ehlo("relay.test").await.unwrap();
        assert!(ehlo.advertises("8BITMIME"));
        assert!(!ehlo.advertises("STARTTLS"));

        assert!(client.mail_from("a@example.com").await.unwrap().is_success());
        assert!(
            client
                .rcpt_to("b@dest.org")
                .await
                .unwrap()
                .is_permanent_error()
        );
        assert_eq!(client.quit().await.unwrap().code, 221);
        client.close().await.unwrap();
        client.close().await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            vec![
                "EHLO relay.test",
                "MAIL FROM:<a@example.com>",
                "RCPT TO:<b@dest.org>",
                "QUIT"
            ]
        );
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (address, _server) = scripted(&[]).await;

        let mut client = SmtpClient::connect(&address, "mock").await.unwrap();
        client.read_greeting().await.unwrap();

        assert!(matches!(
            client.ehlo("relay.test").await,
            Err(ClientError::ConnectionClosed | ClientError::Io(_))
        ));
    }
}
