//! A plaintext destination mail server that accepts everything and keeps
//! what it was sent.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub from: String,
    pub to: Vec<String>,
    pub content: Vec<u8>,
}

pub struct Destination {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl Destination {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let received = Arc::clone(&received);
                    tokio::spawn(async move {
                        let _ = serve(stream, &received).await;
                    });
                }
            })
        };

        Ok(Self {
            addr,
            received,
            task,
        })
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, received: &Mutex<Vec<Received>>) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    let mut from = String::new();
    let mut to = Vec::new();

    stream.get_mut().write_all(b"220 dest ESMTP\r\n").await?;

    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let command = line.trim_end();
        let upper = command.to_ascii_uppercase();

        let reply: &[u8] = if upper.starts_with("EHLO") {
            b"250-dest\r\n250 8BITMIME\r\n"
        } else if let Some(path) = upper.strip_prefix("MAIL FROM:") {
            from = command[command.len() - path.len()..]
                .trim_matches(['<', '>'])
                .to_string();
            b"250 OK\r\n"
        } else if let Some(path) = upper.strip_prefix("RCPT TO:") {
            to.push(
                command[command.len() - path.len()..]
                    .trim_matches(['<', '>'])
                    .to_string(),
            );
            b"250 OK\r\n"
        } else if upper == "DATA" {
            stream.get_mut().write_all(b"354 Go ahead\r\n").await?;

            let mut content = Vec::new();
            loop {
                line.clear();
                if stream.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                if line == ".\r\n" {
                    break;
                }
                content.extend_from_slice(line.strip_prefix('.').unwrap_or(&line).as_bytes());
            }

            received.lock().unwrap().push(Received {
                from: std::mem::take(&mut from),
                to: std::mem::take(&mut to),
                content,
            });
            b"250 OK: queued\r\n"
        } else if upper == "QUIT" {
            stream.get_mut().write_all(b"221 Bye\r\n").await?;
            return Ok(());
        } else {
            b"502 Not implemented\r\n"
        };

        stream.get_mut().write_all(reply).await?;
    }
}
