use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use courier_common::{Signal, error::ListenerError};
use courier_smtp::{
    Backend, Session, SessionError, SmtpConfig, SmtpServer,
    client::{Response, SmtpClient},
};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::broadcast,
    task::JoinHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Auth(String),
    Mail(String),
    Rcpt(String),
    Data(Vec<u8>),
    Reset,
    Logout,
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    async fn wait_for(&self, event: &Event) {
        for _ in 0..100 {
            if self.events().contains(event) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{event:?} was never recorded: {:?}", self.events());
    }
}

struct RecordingBackend(Recorder);

struct RecordingSession(Recorder);

#[async_trait]
impl Backend for RecordingBackend {
    type Session = RecordingSession;

    async fn new_session(&self, _peer: SocketAddr) -> Result<Self::Session, SessionError> {
        Ok(RecordingSession(self.0.clone()))
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn auth_plain(&mut self, username: &str, _password: &str) -> Result<(), SessionError> {
        self.0.push(Event::Auth(username.to_string()));
        Ok(())
    }

    async fn mail(&mut self, from: &str) -> Result<(), SessionError> {
        if from.is_empty() {
            return Err(SessionError::InvalidArgument("Sender required".to_string()));
        }
        self.0.push(Event::Mail(from.to_string()));
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), SessionError> {
        self.0.push(Event::Rcpt(to.to_string()));
        Ok(())
    }

    async fn data(&mut self, body: &mut (dyn AsyncRead + Unpin + Send)) -> Result<(), SessionError> {
        let mut buffer = Vec::new();
        body.read_to_end(&mut buffer).await?;
        self.0.push(Event::Data(buffer));
        Ok(())
    }

    async fn reset(&mut self) {
        self.0.push(Event::Reset);
    }

    async fn logout(&mut self) -> Result<(), SessionError> {
        self.0.push(Event::Logout);
        Ok(())
    }
}

struct Running {
    address: String,
    recorder: Recorder,
    shutdown: broadcast::Sender<Signal>,
    server: JoinHandle<Result<(), ListenerError>>,
}

async fn start(config: SmtpConfig, grace: Duration) -> Running {
    let recorder = Recorder::default();
    let server = SmtpServer::new(RecordingBackend(recorder.clone()), config);
    let listener = server
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind listener");
    let address = listener.local_addr().unwrap().to_string();

    let (shutdown, receiver) = broadcast::channel(1);
    let server = tokio::spawn(listener.serve(receiver, grace));

    Running {
        address,
        recorder,
        shutdown,
        server,
    }
}

async fn greeted(address: &str) -> SmtpClient {
    let mut client = SmtpClient::connect(address, "localhost").await.unwrap();
    assert_eq!(client.read_greeting().await.unwrap().code, 220);
    assert!(client.ehlo("client.test").await.unwrap().is_success());
    client
}

fn codes(responses: &[Response]) -> Vec<u16> {
    responses.iter().map(|r| r.code).collect()
}

#[tokio::test]
async fn full_transaction_reaches_the_session() {
    let running = start(SmtpConfig::default(), Duration::from_secs(1)).await;
    let mut client = SmtpClient::connect(&running.address, "localhost").await.unwrap();

    let greeting = client.read_greeting().await.unwrap();
    assert_eq!(greeting.code, 220);
    assert!(greeting.message().starts_with("smtp.custom-server.com"));

    let ehlo = client.ehlo("client.test").await.unwrap();
    assert!(ehlo.advertises("AUTH"));
    assert!(ehlo.advertises("SIZE"));
    assert!(!ehlo.advertises("STARTTLS"));

    let responses = vec![
        client.command("AUTH PLAIN AGFsaWNlAHNlY3JldA==").await.unwrap(),
        client.mail_from("a@example.com").await.unwrap(),
        client.rcpt_to("b@dest.org").await.unwrap(),
        client.rcpt_to("b@dest.org").await.unwrap(),
        client.data().await.unwrap(),
        client
            .send_data(b"Subject: hi\r\n\r\n.hidden\r\nbody\r\n")
            .await
            .unwrap(),
        client.quit().await.unwrap(),
    ];
    assert_eq!(codes(&responses), vec![235, 250, 250, 250, 354, 250, 221]);

    running.recorder.wait_for(&Event::Logout).await;
    assert_eq!(
        running.recorder.events(),
        vec![
            Event::Reset,
            Event::Auth("alice".to_string()),
            Event::Mail("a@example.com".to_string()),
            Event::Rcpt("b@dest.org".to_string()),
            Event::Rcpt("b@dest.org".to_string()),
            Event::Data(b"Subject: hi\r\n\r\n.hidden\r\nbody\r\n".to_vec()),
            Event::Reset,
            Event::Logout,
        ]
    );
}

#[tokio::test]
async fn out_of_order_commands_are_refused() {
    let running = start(SmtpConfig::default(), Duration::from_secs(1)).await;
    let mut client = SmtpClient::connect(&running.address, "localhost").await.unwrap();
    client.read_greeting().await.unwrap();

    assert_eq!(client.mail_from("a@example.com").await.unwrap().code, 503);
    assert!(client.ehlo("client.test").await.unwrap().is_success());
    assert_eq!(client.rcpt_to("b@dest.org").await.unwrap().code, 503);
    assert_eq!(client.data().await.unwrap().code, 503);

    assert_eq!(client.mail_from("a@example.com").await.unwrap().code, 250);
    assert_eq!(client.mail_from("a@example.com").await.unwrap().code, 503);
    assert_eq!(client.data().await.unwrap().code, 503);

    assert_eq!(client.mail_from("").await.unwrap().code, 503);
    assert_eq!(client.rset().await.unwrap().code, 250);
    assert_eq!(client.mail_from("").await.unwrap().code, 501);
}

#[tokio::test]
async fn informational_commands() {
    let running = start(SmtpConfig::default(), Duration::from_secs(1)).await;
    let mut client = greeted(&running.address).await;

    assert_eq!(client.command("NOOP").await.unwrap().code, 250);
    assert_eq!(client.command("VRFY b@dest.org").await.unwrap().code, 252);
    assert_eq!(client.command("BDAT 10 LAST").await.unwrap().code, 500);
    assert_eq!(client.command("MAIL SENDER").await.unwrap().code, 501);
    assert_eq!(client.command("AUTH LOGIN").await.unwrap().code, 504);
}

#[tokio::test]
async fn auth_plain_without_initial_response() {
    let running = start(SmtpConfig::default(), Duration::from_secs(1)).await;
    let mut client = greeted(&running.address).await;

    assert_eq!(client.command("AUTH PLAIN").await.unwrap().code, 334);
    assert_eq!(
        client.command("AGJvYgBodW50ZXIy").await.unwrap().code,
        235
    );
    assert_eq!(
        client.command("AUTH PLAIN AGJvYgBodW50ZXIy").await.unwrap().code,
        503
    );

    running.recorder.wait_for(&Event::Auth("bob".to_string())).await;
}

#[tokio::test]
async fn recipient_limit() {
    let config = SmtpConfig {
        max_recipients: 1,
        ..SmtpConfig::default()
    };
    let running = start(config, Duration::from_secs(1)).await;
    let mut client = greeted(&running.address).await;

    client.mail_from("a@example.com").await.unwrap();
    assert_eq!(client.rcpt_to("b@dest.org").await.unwrap().code, 250);
    assert_eq!(client.rcpt_to("c@dest.org").await.unwrap().code, 452);
}

#[tokio::test]
async fn oversized_message_is_rejected() {
    let config = SmtpConfig {
        max_message_bytes: 16,
        ..SmtpConfig::default()
    };
    let running = start(config, Duration::from_secs(1)).await;
    let mut client = greeted(&running.address).await;

    client.mail_from("a@example.com").await.unwrap();
    client.rcpt_to("b@dest.org").await.unwrap();
    assert_eq!(client.data().await.unwrap().code, 354);

    let response = client
        .send_data(b"Subject: far too long for the limit\r\n\r\nbody\r\n")
        .await
        .unwrap();
    assert_eq!(response.code, 552);

    // The connection is still usable afterwards.
    assert_eq!(client.command("NOOP").await.unwrap().code, 250);
    assert!(
        !running
            .recorder
            .events()
            .iter()
            .any(|event| matches!(event, Event::Data(_)))
    );
}

#[tokio::test]
async fn abrupt_disconnect_logs_out() {
    let running = start(SmtpConfig::default(), Duration::from_secs(1)).await;
    let mut client = greeted(&running.address).await;

    client.mail_from("a@example.com").await.unwrap();
    drop(client);

    running.recorder.wait_for(&Event::Logout).await;
}

#[tokio::test]
async fn shutdown_stops_the_listener() {
    let running = start(SmtpConfig::default(), Duration::from_secs(1)).await;

    running.shutdown.send(Signal::Shutdown).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running.server)
        .await
        .expect("listener stopped")
        .expect("listener task");

    assert!(result.is_ok());
    assert!(SmtpClient::connect(&running.address, "localhost").await.is_err());
}

#[tokio::test]
async fn shutdown_aborts_sessions_after_grace() {
    let running = start(SmtpConfig::default(), Duration::from_millis(100)).await;
    let _idle = greeted(&running.address).await;

    running.shutdown.send(Signal::Shutdown).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running.server)
        .await
        .expect("listener stopped within the grace period")
        .expect("listener task");

    assert!(result.is_ok());
}
