//! Line-delimited JSON session protocol.
//!
//! Each accepted TCP connection becomes a [`LineSession`]: the client
//! sends one JSON command per line (`subscribe`, `unsubscribe`,
//! `message`) and receives one JSON frame per line (welcome,
//! subscription confirmations, deliveries, pings). Broadcast fan-out and
//! channel resolution go through the coordinator's shared subsystems;
//! this module owns only the wire protocol.

use async_trait::async_trait;
use dashmap::DashMap;
use hub_server::{
    ConnectRequest, Connection, ConnectionClass, Server, ServerError, SubscriberId,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound frames queued per session before hitting the socket.
const OUTBOUND_BUFFER: usize = 64;

/// A client command, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    Subscribe {
        channel: String,
        #[serde(default)]
        stream: String,
    },
    Unsubscribe {
        channel: String,
        #[serde(default)]
        stream: String,
    },
    Message {
        channel: String,
        #[serde(default)]
        stream: String,
        data: serde_json::Value,
    },
}

/// Connection class producing [`LineSession`] objects.
pub struct LineSessionClass;

impl ConnectionClass for LineSessionClass {
    fn identifiers(&self) -> &[&'static str] {
        &["session_id"]
    }

    fn build(
        &self,
        server: Arc<Server>,
        request: ConnectRequest,
    ) -> Result<Arc<dyn Connection>, ServerError> {
        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (shutdown_tx, _) = watch::channel(false);
        let (finished_tx, _) = watch::channel(false);

        debug!("🔗 Session {} created for {}", id, request.remote_addr);
        Ok(Arc::new(LineSession {
            id,
            session_id: id.to_string(),
            server,
            stream: Mutex::new(request.stream),
            outbound: outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown: shutdown_tx,
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            finished: finished_tx,
        }))
    }
}

/// One client's session over a newline-delimited JSON transport.
pub struct LineSession {
    id: Uuid,
    session_id: String,
    server: Arc<Server>,
    /// Stream handed over by the acceptance layer; taken once by `run`.
    stream: Mutex<Option<TcpStream>>,
    outbound: mpsc::Sender<serde_json::Value>,
    outbound_rx: Mutex<Option<mpsc::Receiver<serde_json::Value>>>,
    shutdown: watch::Sender<bool>,
    /// Broadcasting name to adapter subscription handle.
    subscriptions: DashMap<String, SubscriberId>,
    closed: AtomicBool,
    /// Whether the protocol future ever started; `close` waits on
    /// `finished` only when it did.
    started: AtomicBool,
    /// Flipped by `run` on exit so `close` can await full teardown.
    finished: watch::Sender<bool>,
}

impl LineSession {
    /// Queues a frame for delivery; drops it if the session's outbound
    /// buffer is full.
    fn queue(&self, frame: serde_json::Value) {
        if self.outbound.try_send(frame).is_err() {
            debug!("Session {} outbound buffer full, frame dropped", self.id);
        }
    }

    /// Handles one inbound line. Malformed commands are answered with an
    /// error frame rather than tearing the session down.
    async fn handle_line(&self, line: &str) {
        let command = match serde_json::from_str::<ClientCommand>(line) {
            Ok(command) => command,
            Err(e) => {
                self.queue(json!({"type": "error", "reason": e.to_string()}));
                return;
            }
        };

        let result = match command {
            ClientCommand::Subscribe { channel, stream } => {
                self.subscribe(&channel, &stream).await
            }
            ClientCommand::Unsubscribe { channel, stream } => {
                self.unsubscribe(&channel, &stream).await
            }
            ClientCommand::Message {
                channel,
                stream,
                data,
            } => self.publish(&channel, &stream, data).await,
        };

        if let Err(e) = result {
            warn!("Session {} command failed: {}", self.id, e);
            self.queue(json!({"type": "error", "reason": e.to_string()}));
        }
    }

    /// Subscribes this session to a channel stream through the shared
    /// pub/sub adapter.
    async fn subscribe(&self, channel: &str, stream: &str) -> Result<(), ServerError> {
        let registry = self.server.channels().await?;
        let Some(class) = registry.get(channel) else {
            self.queue(json!({
                "type": "reject_subscription",
                "channel": channel,
                "stream": stream,
            }));
            return Ok(());
        };

        let broadcasting = class.broadcasting_for(stream);
        if self.subscriptions.contains_key(&broadcasting) {
            return Ok(());
        }

        let outbound = self.outbound.clone();
        let delivery_key = broadcasting.clone();
        let subscriber = self
            .server
            .pubsub()
            .await?
            .subscribe(
                &broadcasting,
                Arc::new(move |payload| {
                    let frame = json!({
                        "type": "message",
                        "broadcasting": delivery_key,
                        "data": payload,
                    });
                    if outbound.try_send(frame).is_err() {
                        debug!("Dropped delivery on '{}': slow consumer", delivery_key);
                    }
                }),
            )
            .await?;

        self.subscriptions.insert(broadcasting.clone(), subscriber);
        debug!("📥 Session {} subscribed to '{}'", self.id, broadcasting);
        self.queue(json!({
            "type": "confirm_subscription",
            "channel": channel,
            "stream": stream,
        }));
        Ok(())
    }

    /// Removes this session's subscription to a channel stream.
    async fn unsubscribe(&self, channel: &str, stream: &str) -> Result<(), ServerError> {
        let registry = self.server.channels().await?;
        let Some(class) = registry.get(channel) else {
            return Ok(());
        };

        let broadcasting = class.broadcasting_for(stream);
        if let Some((_, subscriber)) = self.subscriptions.remove(&broadcasting) {
            self.server
                .pubsub()
                .await?
                .unsubscribe(&broadcasting, subscriber)
                .await?;
        }
        Ok(())
    }

    /// Publishes a client message to a channel stream.
    ///
    /// The broadcast runs on the worker pool so a slow adapter never
    /// stalls this session's read loop.
    async fn publish(
        &self,
        channel: &str,
        stream: &str,
        data: serde_json::Value,
    ) -> Result<(), ServerError> {
        let registry = self.server.channels().await?;
        let class = registry
            .get(channel)
            .ok_or_else(|| ServerError::UnknownChannel(channel.to_string()))?;
        let broadcasting = class.broadcasting_for(stream);

        let server = Arc::clone(&self.server);
        self.server
            .worker_pool()
            .await?
            .execute(async move {
                if let Err(e) = server.broadcast(&broadcasting, data).await {
                    warn!("Broadcast to '{}' failed: {}", broadcasting, e);
                }
            })
            .await
    }

    /// Drops every adapter subscription held by this session.
    async fn teardown_subscriptions(&self) {
        let held: Vec<(String, SubscriberId)> = self
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        if held.is_empty() {
            return;
        }

        let adapter = match self.server.pubsub().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("Session {} teardown skipped: {}", self.id, e);
                return;
            }
        };
        for (broadcasting, subscriber) in held {
            self.subscriptions.remove(&broadcasting);
            if let Err(e) = adapter.unsubscribe(&broadcasting, subscriber).await {
                warn!("Unsubscribe from '{}' failed: {}", broadcasting, e);
            }
        }
    }

    async fn write_frame(
        &self,
        writer: &mut OwnedWriteHalf,
        frame: &serde_json::Value,
    ) -> Result<(), ServerError> {
        let mut line =
            serde_json::to_vec(frame).map_err(|e| ServerError::Internal(e.to_string()))?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| ServerError::Network(e.to_string()))
    }
}

#[async_trait]
impl Connection for LineSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn identifier(&self, name: &str) -> Option<String> {
        match name {
            "session_id" => Some(self.session_id.clone()),
            _ => None,
        }
    }

    async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        self.started.store(true, Ordering::SeqCst);
        let result = self.drive().await;
        // Signal on every exit path; close() blocks on this
        self.finished.send_replace(true);
        result
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🔌 Closing session {}", self.id);
        self.shutdown.send_replace(true);
        // The protocol future may be mid-command; returning before it
        // exits would let callbacks outlive this close
        if self.started.load(Ordering::SeqCst) {
            let mut finished = self.finished.subscribe();
            let _ = finished.wait_for(|done| *done).await;
        }
        self.teardown_subscriptions().await;
    }

    async fn beat(&self) {
        self.queue(json!({"type": "ping"}));
    }
}

impl LineSession {
    /// The protocol loop proper; `run` wraps it so the finished signal
    /// fires no matter how it exits.
    async fn drive(&self) -> Result<(), ServerError> {
        // Closed before the protocol ever started
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let stream = self.stream.lock().await.take();
        let Some(stream) = stream else {
            // No transport attached; stay alive until closed
            let mut shutdown = self.shutdown.subscribe();
            let _ = shutdown.wait_for(|closed| *closed).await;
            return Ok(());
        };

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut outbound = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ServerError::Internal("session already run".to_string()))?;
        let mut shutdown = self.shutdown.subscribe();

        self.write_frame(
            &mut writer,
            &json!({"type": "welcome", "session_id": self.session_id}),
        )
        .await?;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            self.handle_line(line).await;
                        }
                    }
                    Ok(None) => {
                        debug!("Session {} closed by peer", self.id);
                        break;
                    }
                    Err(e) => {
                        warn!("Session {} read error: {}", self.id, e);
                        break;
                    }
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => self.write_frame(&mut writer, &frame).await?,
                    None => break,
                },
                _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,
            }
        }

        self.teardown_subscriptions().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_server::{ServerConfig, StaticChannel, StaticChannelSource};
    use std::net::SocketAddr;
    use tokio::time::{sleep, timeout, Duration};

    fn test_server() -> Arc<Server> {
        let mut config = ServerConfig::new(Arc::new(LineSessionClass));
        config.channel_names = vec!["chat".to_string()];
        config.channel_source = Arc::new(
            StaticChannelSource::new().register(Arc::new(StaticChannel::new("chat"))),
        );
        Server::new(config)
    }

    fn test_request() -> ConnectRequest {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        ConnectRequest::new(addr)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_declares_session_id() {
        let server = test_server();
        let connection = server.accept(test_request()).await.expect("accept");

        assert_eq!(server.connection_identifiers(), &["session_id"]);
        assert!(connection.identifier("session_id").is_some());
        assert!(connection.identifier("user_id").is_none());

        connection.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streamless_session_exits_on_close() {
        let server = test_server();
        let connection = server.accept(test_request()).await.expect("accept");
        assert_eq!(server.connections().len(), 1);

        connection.close().await;

        timeout(Duration::from_secs(1), async {
            while !server.connections().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("closed session should leave the tracker");
    }

    /// A session with no transport, exposing its outbound frame queue.
    fn test_session(server: Arc<Server>) -> (Arc<LineSession>, mpsc::Receiver<serde_json::Value>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (shutdown_tx, _) = watch::channel(false);
        let (finished_tx, _) = watch::channel(false);
        let id = Uuid::new_v4();
        let session = Arc::new(LineSession {
            id,
            session_id: id.to_string(),
            server,
            stream: Mutex::new(None),
            outbound: outbound_tx,
            outbound_rx: Mutex::new(None),
            shutdown: shutdown_tx,
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            finished: finished_tx,
        });
        (session, outbound_rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscribe_confirms_and_receives_broadcasts() {
        let server = test_server();
        let (session, mut frames) = test_session(Arc::clone(&server));

        session.subscribe("chat", "room_1").await.expect("subscribe");
        assert_eq!(session.subscriptions.len(), 1);

        let confirm = frames.recv().await.expect("confirmation frame");
        assert_eq!(confirm["type"], "confirm_subscription");
        assert_eq!(confirm["channel"], "chat");

        server
            .broadcast("chat:room_1", json!({"body": "hello"}))
            .await
            .expect("broadcast");

        let delivery = timeout(Duration::from_secs(1), frames.recv())
            .await
            .expect("delivery should arrive")
            .expect("delivery frame");
        assert_eq!(delivery["type"], "message");
        assert_eq!(delivery["broadcasting"], "chat:room_1");
        assert_eq!(delivery["data"]["body"], "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscribe_unknown_channel_is_rejected() {
        let server = test_server();
        let (session, mut frames) = test_session(server);

        session
            .subscribe("unknown", "room_1")
            .await
            .expect("unknown channel is a soft rejection");
        assert!(session.subscriptions.is_empty());

        let frame = frames.recv().await.expect("rejection frame");
        assert_eq!(frame["type"], "reject_subscription");
        assert_eq!(frame["channel"], "unknown");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsubscribe_stops_delivery() {
        let server = test_server();
        let (session, mut frames) = test_session(Arc::clone(&server));

        session.subscribe("chat", "room_1").await.expect("subscribe");
        let _ = frames.recv().await;

        session
            .unsubscribe("chat", "room_1")
            .await
            .expect("unsubscribe");
        assert!(session.subscriptions.is_empty());

        server
            .broadcast("chat:room_1", json!({"body": "late"}))
            .await
            .expect("broadcast");
        sleep(Duration::from_millis(50)).await;
        assert!(
            frames.try_recv().is_err(),
            "no delivery after unsubscription"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_publish_to_unknown_channel_fails() {
        let server = test_server();
        let (session, _frames) = test_session(server);

        let result = session.publish("unknown", "room_1", json!({})).await;
        assert!(matches!(result, Err(ServerError::UnknownChannel(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_publish_routes_through_worker_pool() {
        let server = test_server();
        let (publisher, _frames) = test_session(Arc::clone(&server));
        let (listener, mut frames) = test_session(Arc::clone(&server));

        listener.subscribe("chat", "room_1").await.expect("subscribe");
        let _ = frames.recv().await;

        publisher
            .publish("chat", "room_1", json!({"body": "routed"}))
            .await
            .expect("publish");

        let delivery = timeout(Duration::from_secs(1), frames.recv())
            .await
            .expect("delivery should arrive")
            .expect("delivery frame");
        assert_eq!(delivery["data"]["body"], "routed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_beat_queues_ping() {
        let server = test_server();
        let (session, mut frames) = test_session(server);

        session.beat().await;
        let frame = frames.recv().await.expect("ping frame");
        assert_eq!(frame["type"], "ping");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_returns_only_after_run_exits() {
        let server = test_server();
        let (session, _frames) = test_session(server);

        let running = tokio::spawn(Arc::clone(&session).run());
        sleep(Duration::from_millis(20)).await;

        session.close().await;

        // close has returned, so the protocol future must already be done
        let result = timeout(Duration::from_millis(200), running)
            .await
            .expect("run should have exited before close returned")
            .expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_before_run_does_not_block() {
        let server = test_server();
        let (session, _frames) = test_session(server);

        timeout(Duration::from_secs(1), session.close())
            .await
            .expect("close without a running session should return at once");

        // A subsequent run sees the closed flag and exits immediately
        let result = Arc::clone(&session).run().await;
        assert!(result.is_ok());
    }
}
