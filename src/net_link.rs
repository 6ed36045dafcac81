use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Credential;
use crate::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};

/// What the link reports back to the controller.
#[derive(Debug)]
pub enum NetEvent {
    /// Socket open and the service acknowledged the setup payload.
    Opened,
    Message(ServerMessage),
    /// Remote side ended the session, with its reason if it gave one.
    Closed(Option<String>),
    Error(String),
    /// Microphone or speaker failed mid-session; raised by the audio threads.
    AudioFailed(String),
}

/// A `NetEvent` tagged with the session generation that produced it.
#[derive(Debug)]
pub struct SessionEvent {
    pub session: u64,
    pub event: NetEvent,
}

/// One frame read from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(String),
    Closed(Option<String>),
}

/// Opens channels to the live service.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, credential: &Credential) -> anyhow::Result<Box<dyn LiveChannel>>;
}

/// An open, bidirectional JSON message channel.
#[async_trait]
pub trait LiveChannel: Send {
    async fn send(&mut self, text: String) -> anyhow::Result<()>;

    /// Next JSON frame. Must be cancel safe.
    async fn next_message(&mut self) -> anyhow::Result<Inbound>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

// ==================== WebSocket ====================

pub struct WsTransport {
    endpoint: String,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl LiveTransport for WsTransport {
    async fn connect(&self, credential: &Credential) -> anyhow::Result<Box<dyn LiveChannel>> {
        let mut url = Url::parse(&self.endpoint).context("Invalid live service URL")?;
        // 日志里只打印不带密钥的地址
        log::info!("Connecting to {}...", url);
        url.query_pairs_mut().append_pair("key", credential.expose());

        let (stream, _) = connect_async(url.as_str())
            .await
            .context("WebSocket handshake failed")?;
        log::info!("WebSocket connected");

        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LiveChannel for WsChannel {
    async fn send(&mut self, text: String) -> anyhow::Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> anyhow::Result<Inbound> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Inbound::Frame(text.to_string())),
                // 服务端也会用二进制帧下发 JSON
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Inbound::Frame(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    return Ok(Inbound::Closed(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(Inbound::Closed(None)),
            }
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

// ==================== link task ====================

/// Task owning one session's channel: opens it, forwards outbound audio
/// frames and reports inbound messages. Never reconnects.
pub struct NetLink {
    session: u64,
    transport: Arc<dyn LiveTransport>,
    credential: Credential,
    setup: SetupMessage,
    connect_timeout: Duration,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

/// Controller-side handle of a running link.
pub struct LinkHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Ask the link to close the channel and exit. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the link task has exited.
    pub async fn finished(&mut self) {
        if let Err(e) = (&mut self.task).await {
            log::warn!("Link task ended abnormally: {}", e);
        }
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl NetLink {
    pub fn new(
        session: u64,
        transport: Arc<dyn LiveTransport>,
        credential: Credential,
        setup: SetupMessage,
        connect_timeout: Duration,
        tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            session,
            transport,
            credential,
            setup,
            connect_timeout,
            tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn spawn(self, outbound: mpsc::Receiver<String>) -> LinkHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(outbound));
        LinkHandle { cancel, task }
    }

    pub async fn run(self, outbound: mpsc::Receiver<String>) {
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => {
                log::debug!("Session {}: cancelled while connecting", self.session);
                return;
            }
            r = tokio::time::timeout(self.connect_timeout, self.open()) => r,
        };

        let channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                log::error!("Session {}: connect failed: {:#}", self.session, e);
                self.emit(NetEvent::Error(format!("{:#}", e))).await;
                return;
            }
            Err(_) => {
                log::error!(
                    "Session {}: no answer within {:?}",
                    self.session,
                    self.connect_timeout
                );
                self.emit(NetEvent::Error("Timed out connecting to the live service".into()))
                    .await;
                return;
            }
        };

        self.emit(NetEvent::Opened).await;

        match self.stream(channel, outbound).await {
            Ok(Some(reason)) => self.emit(NetEvent::Closed(reason)).await,
            // 本地主动关闭，控制器已经清理过了
            Ok(None) => log::debug!("Session {}: channel closed locally", self.session),
            Err(e) => {
                log::error!("Session {}: channel error: {:#}", self.session, e);
                self.emit(NetEvent::Error(format!("{:#}", e))).await;
            }
        }
    }

    /// Connect and complete the setup handshake.
    async fn open(&self) -> anyhow::Result<Box<dyn LiveChannel>> {
        let mut channel = self.transport.connect(&self.credential).await?;

        let setup = serde_json::to_string(&self.setup)?;
        log::debug!("Sending setup: {}", setup);
        channel.send(setup).await?;

        loop {
            match channel.next_message().await? {
                Inbound::Frame(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) if msg.is_setup_complete() => {
                        log::info!("Session {}: setup complete", self.session);
                        return Ok(channel);
                    }
                    Ok(_) => log::debug!("Ignoring message before setup completed: {}", text),
                    Err(e) => log::warn!("Dropping undecodable server message: {}", e),
                },
                Inbound::Closed(reason) => {
                    return Err(anyhow!(
                        "Connection closed during setup{}",
                        reason.map(|r| format!(": {}", r)).unwrap_or_default()
                    ));
                }
            }
        }
    }

    /// Pump until the channel ends. `Ok(Some(_))` is a remote close, `Ok(None)`
    /// means the link was cancelled. The outbound queue ending only stops the
    /// upload; inbound messages keep flowing until one of those two happens.
    async fn stream(
        &self,
        mut channel: Box<dyn LiveChannel>,
        mut outbound: mpsc::Receiver<String>,
    ) -> anyhow::Result<Option<Option<String>>> {
        let mut sent: u64 = 0;
        let mut uploading = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(e) = channel.close().await {
                        log::debug!("Close after cancel failed: {}", e);
                    }
                    log::info!("Session {}: {} audio frame(s) sent", self.session, sent);
                    return Ok(None);
                }
                inbound = channel.next_message() => match inbound? {
                    Inbound::Frame(text) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if msg.is_turn_complete() {
                                log::debug!("Session {}: turn complete", self.session);
                            }
                            self.emit(NetEvent::Message(msg)).await;
                        }
                        Err(e) => log::warn!("Dropping undecodable server message: {}", e),
                    },
                    Inbound::Closed(reason) => {
                        log::info!("Session {}: server closed connection: {:?}", self.session, reason);
                        return Ok(Some(reason));
                    }
                },
                blob = outbound.recv(), if uploading => match blob {
                    Some(blob) => {
                        let text = serde_json::to_string(&RealtimeInputMessage::audio(blob))?;
                        channel.send(text).await?;
                        sent += 1;
                    }
                    None => {
                        log::info!(
                            "Session {}: outbound audio ended after {} frame(s), still receiving",
                            self.session,
                            sent
                        );
                        uploading = false;
                    }
                },
            }
        }
    }

    async fn emit(&self, event: NetEvent) {
        if self
            .tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .await
            .is_err()
        {
            log::debug!("Session {}: event receiver gone", self.session);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::{Language, ProficiencyLevel, SessionConfig};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn setup() -> SetupMessage {
        let config = SessionConfig {
            language: Language::find("es").unwrap(),
            level: ProficiencyLevel::Beginner,
        };
        SetupMessage::for_session("test-model", &config)
    }

    fn link(
        transport: Arc<dyn LiveTransport>,
        timeout: Duration,
    ) -> (NetLink, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let credential = Credential::new("k").unwrap();
        (NetLink::new(7, transport, credential, setup(), timeout, tx), rx)
    }

    async fn next(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event")
            .expect("link hung up")
    }

    #[tokio::test]
    async fn opens_after_setup_and_relays_both_ways() {
        let (transport, server) = FakeTransport::accepting();
        let (link, mut rx) = link(transport, Duration::from_secs(2));
        let (out_tx, out_rx) = mpsc::channel(4);
        let mut handle = link.spawn(out_rx);

        server.complete_setup();
        let ev = next(&mut rx).await;
        assert_eq!(ev.session, 7);
        assert!(matches!(ev.event, NetEvent::Opened));

        let first: serde_json::Value = serde_json::from_str(&server.sent()[0]).unwrap();
        assert_eq!(first["setup"]["model"], "models/test-model");

        out_tx.send("AAAA".to_string()).await.unwrap();
        server.reply(json!({"serverContent": {"interrupted": true}}));
        match next(&mut rx).await.event {
            NetEvent::Message(msg) => assert!(msg.is_interrupted()),
            other => panic!("unexpected event {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.sent().iter().any(|s| s.contains("realtimeInput")));

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle.finished())
            .await
            .expect("link did not exit");
        assert!(server.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn outbound_end_keeps_the_channel_receiving() {
        let (transport, server) = FakeTransport::accepting();
        let (link, mut rx) = link(transport, Duration::from_secs(2));
        let (out_tx, out_rx) = mpsc::channel(4);
        let _handle = link.spawn(out_rx);

        server.complete_setup();
        assert!(matches!(next(&mut rx).await.event, NetEvent::Opened));

        out_tx.send("AAAA".to_string()).await.unwrap();
        drop(out_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!server.closed.load(Ordering::SeqCst));

        server.reply(json!({"serverContent": {"turnComplete": true}}));
        match next(&mut rx).await.event {
            NetEvent::Message(msg) => assert!(msg.is_turn_complete()),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            server.sent().iter().filter(|s| s.contains("realtimeInput")).count(),
            1
        );

        server.hang_up(None);
        assert!(matches!(next(&mut rx).await.event, NetEvent::Closed(None)));
    }

    #[tokio::test]
    async fn invalid_json_is_dropped_and_remote_close_reported() {
        let (transport, server) = FakeTransport::accepting();
        let (link, mut rx) = link(transport, Duration::from_secs(2));
        let (_out_tx, out_rx) = mpsc::channel(4);
        let _handle = link.spawn(out_rx);

        server.complete_setup();
        assert!(matches!(next(&mut rx).await.event, NetEvent::Opened));

        server.inbound.send(Inbound::Frame("not json".into())).unwrap();
        server.hang_up(Some("bye"));
        match next(&mut rx).await.event {
            NetEvent::Closed(reason) => assert_eq!(reason.as_deref(), Some("bye")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let transport = FakeTransport::with(Behaviour::Refuse("403 Forbidden".into()));
        let (link, mut rx) = link(transport, Duration::from_secs(2));
        let (_out_tx, out_rx) = mpsc::channel(4);
        let _handle = link.spawn(out_rx);

        match next(&mut rx).await.event {
            NetEvent::Error(msg) => assert!(msg.contains("403")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn hung_connect_times_out() {
        let transport = FakeTransport::with(Behaviour::Hang);
        let (link, mut rx) = link(transport, Duration::from_millis(50));
        let (_out_tx, out_rx) = mpsc::channel(4);
        let _handle = link.spawn(out_rx);

        match next(&mut rx).await.event {
            NetEvent::Error(msg) => assert!(msg.contains("Timed out")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_while_connecting_reports_nothing() {
        let transport = FakeTransport::with(Behaviour::Hang);
        let (link, mut rx) = link(transport, Duration::from_secs(5));
        let (_out_tx, out_rx) = mpsc::channel(4);
        let handle = link.spawn(out_rx);

        handle.cancel();
        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(got, Ok(None)));
    }
}
