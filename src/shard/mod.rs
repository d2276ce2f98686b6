//! A single gateway connection and the protocol state machine driving it.

pub mod bucket;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod session;
pub mod socket_forwarder;
pub mod stage;

pub use self::config::Config;
pub use self::error::{Error, Result};
pub use self::stage::Stage;

use self::bucket::{FrameQueue, RateBucket};
use self::heartbeat::{Heartbeat, ZOMBIE_CLOSE_CODE};
use self::session::{Session, HELLO_TIMEOUT};
use self::socket_forwarder::{ShardStream, SocketForwarder};
use crate::codec::{Codec, Frame};
use crate::event::{OpCode, Payload, ShardEvent};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

const READY_STABILIZATION: Duration = Duration::from_secs(15);

/// Options controlling [`Shard::destroy`].
#[derive(Debug, Clone, Copy)]
pub struct DestroyOptions {
    /// The WebSocket close code to send, if the socket is open.
    pub code: u16,
    /// Whether the session should be reset (forcing a fresh identify on
    /// the next connect).
    pub reset: bool,
    /// Whether a [`ShardEvent::Destroyed`] should be emitted.
    pub emit: bool,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            code: 1000,
            reset: false,
            emit: true,
        }
    }
}

/// The outcome of one connection attempt, reported back to whatever drives
/// the reconnect policy (the [`Cluster`](crate::cluster::Cluster)).
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    /// The close code observed, if any.
    pub code: Option<u16>,
    /// Whether the session held by this shard can still be resumed.
    pub resumable: bool,
}

/// One gateway connection and everything needed to drive its protocol
/// state machine: codec, decompressor, heartbeat, session, and send
/// queue. Owns its WebSocket exclusively.
pub struct Shard {
    config: Config,
    stage: Stage,
    session: Session,
    heartbeat: Heartbeat,
    queue: FrameQueue,
    bucket: RateBucket,
    #[cfg(feature = "compression")]
    inflater: Option<crate::compression::Inflater>,
    outbound_tx: Option<UnboundedSender<Message>>,
    inbound_rx: Option<UnboundedReceiver<Message>>,
    last_close_code: Option<u16>,
    expecting_guilds: Option<HashSet<String>>,
}

impl Shard {
    /// Build a new, never-connected shard from validated configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let shard_id = config.shard()[0];

        Self {
            config,
            stage: Stage::Idle,
            session: Session::new(),
            heartbeat: Heartbeat::new(),
            queue: FrameQueue::new(),
            bucket: RateBucket::new(),
            #[cfg(feature = "compression")]
            inflater: None,
            outbound_tx: None,
            inbound_rx: None,
            last_close_code: None,
            expecting_guilds: None,
            // field below keeps clippy quiet about shard_id only being used
            // for the `inflater` constructor under the `compression`
            // feature; referenced here unconditionally instead.
        }
        .with_shard_id(shard_id)
    }

    #[cfg(feature = "compression")]
    fn with_shard_id(mut self, shard_id: u64) -> Self {
        self.inflater = if self.config.compression {
            Some(crate::compression::Inflater::new([shard_id, self.config.shard()[1]]))
        } else {
            None
        };
        self
    }

    #[cfg(not(feature = "compression"))]
    fn with_shard_id(self, _shard_id: u64) -> Self {
        self
    }

    /// This shard's id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.config.shard_id
    }

    /// The shard's current protocol stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// The current sequence number, `-1` if none has been observed yet.
    #[must_use]
    pub const fn seq(&self) -> i64 {
        self.session.seq()
    }

    /// Measured round-trip latency of the last acked heartbeat.
    #[must_use]
    pub const fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// Open the WebSocket connection and arm the hello timeout. Does not
    /// wait for Hello; call [`Self::run`] to drive the rest of the
    /// handshake.
    pub async fn connect(&mut self, gateway_url: &str) -> Result<()> {
        self.stage = if self.session.id().is_some() {
            Stage::Reconnecting
        } else {
            Stage::Connecting
        };

        let url = build_url(
            gateway_url,
            self.config.codec,
            self.config.compression,
            self.config.version,
        );
        let stream = connect(&url).await?;

        #[cfg(feature = "compression")]
        if let Some(inflater) = &mut self.inflater {
            inflater.reset();
        }

        let (forwarder, inbound_rx, outbound_tx) = SocketForwarder::new(stream);
        tokio::spawn(forwarder.run());

        self.outbound_tx = Some(outbound_tx);
        self.inbound_rx = Some(inbound_rx);
        self.stage = Stage::Nearly;

        for frame in self.queue.drain() {
            self.transmit(frame.bytes)?;
        }

        Ok(())
    }

    /// Drive the connection until the socket closes, an unrecoverable
    /// protocol error occurs, or [`Self::destroy`] is called internally
    /// (zombie detection, Reconnect opcode).
    pub async fn run(&mut self, events: &UnboundedSender<ShardEvent>) -> CloseOutcome {
        let mut hello_deadline = Box::pin(tokio::time::sleep(HELLO_TIMEOUT));
        let mut ready_deadline: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            let heartbeat_tick = match self.heartbeat.interval() {
                Some(interval) => Some(Box::pin(tokio::time::sleep(interval))),
                None => None,
            };

            let bucket_wait = if self.queue.is_empty() {
                None
            } else {
                match self.bucket.try_acquire() {
                    Ok(()) => {
                        if let Some(frame) = self.queue.pop() {
                            if let Err(err) = self.transmit(frame.bytes) {
                                let _ = events.send(ShardEvent::Error(err.to_string()));
                            }
                        }
                        continue;
                    }
                    Err(wait) => Some(Box::pin(tokio::time::sleep(wait))),
                }
            };

            tokio::select! {
                maybe_msg = recv_inbound(&mut self.inbound_rx) => {
                    match maybe_msg {
                        Some(msg) => {
                            if let Some(outcome) = self.handle_message(msg, events).await {
                                return outcome;
                            }
                        }
                        None => {
                            return self.on_socket_gone();
                        }
                    }
                }
                _ = sleep_or_pending(heartbeat_tick) => {
                    self.send_heartbeat(events).await;
                }
                _ = sleep_or_pending(bucket_wait) => {}
                _ = &mut hello_deadline, if self.stage == Stage::Nearly => {
                    let _ = events.send(ShardEvent::Error("hello timeout elapsed".to_owned()));
                    return self.destroy_internal(
                        DestroyOptions { code: 4000, reset: true, emit: true },
                        Some(events),
                    );
                }
                _ = sleep_or_pending_mut(&mut ready_deadline) => {
                    let missing = self.expecting_guilds.take();
                    self.stage = Stage::Ready;
                    let _ = events.send(ShardEvent::FullReady { missing_guilds: missing });
                }
            }

            if self.stage == Stage::WaitingForGuilds && ready_deadline.is_none() {
                ready_deadline = Some(Box::pin(tokio::time::sleep(READY_STABILIZATION)));
            }
        }
    }

    async fn handle_message(
        &mut self,
        msg: Message,
        events: &UnboundedSender<ShardEvent>,
    ) -> Option<CloseOutcome> {
        match msg {
            Message::Binary(bytes) => {
                self.handle_binary(&bytes, events).await;
                None
            }
            Message::Text(text) => {
                self.handle_frame(Frame::Text(&text), events).await;
                None
            }
            Message::Close(frame) => Some(self.handle_close(frame, events)),
            Message::Ping(_) | Message::Pong(_) => None,
        }
    }

    #[cfg(feature = "compression")]
    async fn handle_binary(&mut self, bytes: &[u8], events: &UnboundedSender<ShardEvent>) {
        if let Some(inflater) = &mut self.inflater {
            if let Err(err) = inflater.add(bytes) {
                let _ = events.send(ShardEvent::Error(Error::from(err).to_string()));
                return;
            }

            while let Some(message) = self.inflater_next_message() {
                self.handle_decoded(&message, events).await;
            }
        } else {
            self.handle_frame(Frame::Binary(bytes), events).await;
        }
    }

    #[cfg(feature = "compression")]
    fn inflater_next_message(&mut self) -> Option<Vec<u8>> {
        self.inflater.as_mut().and_then(|i| i.next_message())
    }

    #[cfg(not(feature = "compression"))]
    async fn handle_binary(&mut self, bytes: &[u8], events: &UnboundedSender<ShardEvent>) {
        self.handle_frame(Frame::Binary(bytes), events).await;
    }

    async fn handle_decoded(&mut self, bytes: &[u8], events: &UnboundedSender<ShardEvent>) {
        self.handle_frame(Frame::Binary(bytes), events).await;
    }

    async fn handle_frame(&mut self, frame: Frame<'_>, events: &UnboundedSender<ShardEvent>) {
        let payload: Payload<serde_json::Value> = match self.config.codec.decode(frame) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = events.send(ShardEvent::Error(Error::from(err).to_string()));
                return;
            }
        };

        self.dispatch(payload, events).await;
    }

    async fn dispatch(&mut self, pk: Payload<serde_json::Value>, events: &UnboundedSender<ShardEvent>) {
        if let Some(s) = pk.s {
            if self.session.seq() != -1 && s as i64 > self.session.seq() + 1 {
                #[cfg(feature = "tracing")]
                tracing::warn!(shard_id = self.id(), seq = s, "non-consecutive sequence");
            }

            self.session.set_seq(s);
        }

        match pk.op {
            op if op == OpCode::Hello as u8 => {
                match pk.d.get("heartbeat_interval").and_then(serde_json::Value::as_u64) {
                    Some(interval) => self.heartbeat.set_interval(interval),
                    None => {
                        let _ = events.send(ShardEvent::Error(Error::PayloadInvalid.to_string()));
                    }
                }

                self.hello(events).await;
            }
            op if op == OpCode::Reconnect as u8 => {
                let outcome = self.destroy_internal(
                    DestroyOptions {
                        code: 4000,
                        reset: false,
                        emit: true,
                    },
                    Some(events),
                );
                let _ = events.send(ShardEvent::Close {
                    code: outcome.code,
                    reason: "reconnect requested".to_owned(),
                });
            }
            op if op == OpCode::InvalidSession as u8 => {
                let resumable = pk.d.as_bool().unwrap_or(false);

                if resumable {
                    self.resume(events).await;
                } else {
                    self.session.reset();
                    let _ = events.send(ShardEvent::InvalidSession);
                }
            }
            op if op == OpCode::Heartbeat as u8 => {
                self.send_heartbeat_now(events).await;
            }
            op if op == OpCode::HeartbeatAck as u8 => {
                self.heartbeat.ack(std::time::Instant::now());
            }
            op if op == OpCode::Dispatch as u8 => {
                self.dispatch_event(pk.t.as_deref(), &pk.d, events).await;

                let _ = events.send(ShardEvent::Dispatch {
                    event_type: pk.t.clone(),
                    payload: pk.d.clone(),
                });
            }
            _ => {}
        }
    }

    async fn dispatch_event(
        &mut self,
        event_type: Option<&str>,
        body: &serde_json::Value,
        events: &UnboundedSender<ShardEvent>,
    ) {
        match event_type {
            Some("READY") => {
                let session_id = body
                    .get("session_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned();

                let guilds: HashSet<String> = body
                    .get("guilds")
                    .and_then(serde_json::Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|g| g.get("id").and_then(serde_json::Value::as_str))
                    .map(str::to_owned)
                    .collect();

                self.session.set_id(session_id.clone());
                self.expecting_guilds = Some(guilds.clone());
                self.stage = Stage::WaitingForGuilds;

                let _ = events.send(ShardEvent::Ready { session_id, guilds });
            }
            Some("RESUMED") => {
                self.stage = Stage::Connected;
                let _ = events.send(ShardEvent::Resumed);
            }
            Some("GUILD_CREATE") => {
                if self.stage == Stage::WaitingForGuilds {
                    if let Some(id) = body.get("id").and_then(serde_json::Value::as_str) {
                        if let Some(expecting) = &mut self.expecting_guilds {
                            expecting.remove(id);

                            if expecting.is_empty() {
                                self.stage = Stage::Ready;
                                let missing = self.expecting_guilds.take();
                                let _ = events.send(ShardEvent::FullReady { missing_guilds: missing });
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    async fn hello(&mut self, events: &UnboundedSender<ShardEvent>) {
        if self.session.is_resumable(self.last_close_code) {
            self.resume(events).await;
        } else {
            self.new_session(events).await;
        }
    }

    async fn new_session(&mut self, events: &UnboundedSender<ShardEvent>) {
        self.stage = Stage::Identifying;

        let payload = Payload::outbound(
            OpCode::Identify,
            serde_json::json!({
                "token": self.config.token(),
                "properties": self.config.properties,
                "shard": self.config.shard(),
                "intents": self.config.intents().bits(),
                "large_threshold": self.config.large_threshold,
            }),
        );

        if let Err(err) = self.send_payload(&payload, true) {
            let _ = events.send(ShardEvent::Error(err.to_string()));
        }
    }

    async fn resume(&mut self, events: &UnboundedSender<ShardEvent>) {
        self.stage = Stage::Resuming;

        let Some(session_id) = self.session.id().map(str::to_owned) else {
            self.new_session(events).await;
            return;
        };

        let payload = Payload::outbound(
            OpCode::Resume,
            serde_json::json!({
                "token": self.config.token(),
                "session_id": session_id,
                "seq": self.session.closing_seq(),
            }),
        );

        if let Err(err) = self.send_payload(&payload, true) {
            let _ = events.send(ShardEvent::Error(err.to_string()));
        }
    }

    async fn send_heartbeat(&mut self, events: &UnboundedSender<ShardEvent>) {
        if self.heartbeat.is_zombied(self.stage.tolerates_missed_ack()) {
            let outcome = self.destroy_internal(
                DestroyOptions {
                    code: ZOMBIE_CLOSE_CODE,
                    reset: true,
                    emit: true,
                },
                Some(events),
            );
            let _ = events.send(ShardEvent::Close {
                code: outcome.code,
                reason: "zombied connection".to_owned(),
            });
            return;
        }

        if !self.heartbeat.acked() {
            #[cfg(feature = "tracing")]
            tracing::debug!(shard_id = self.id(), "heartbeating without a prior ack");
        }

        self.send_heartbeat_now(events).await;
    }

    async fn send_heartbeat_now(&mut self, events: &UnboundedSender<ShardEvent>) {
        let seq = self.session.seq();
        let d = if seq == -1 { serde_json::Value::Null } else { serde_json::json!(seq) };
        let payload = Payload::outbound(OpCode::Heartbeat, d);

        if let Err(err) = self.send_payload(&payload, true) {
            let _ = events.send(ShardEvent::Error(err.to_string()));
            return;
        }

        self.heartbeat.record_send(std::time::Instant::now());
    }

    /// Send a payload, enqueued either onto the live rate bucket (if
    /// connected) or the unsent queue (drained on the next connect).
    pub fn send_payload<T: serde::Serialize>(&mut self, payload: &T, prioritized: bool) -> Result<()> {
        let bytes = self.config.codec.encode(payload)?;
        self.queue.push(bytes, prioritized);
        Ok(())
    }

    fn transmit(&mut self, bytes: Vec<u8>) -> Result<()> {
        let tx = self.outbound_tx.as_ref().ok_or(Error::NotConnected)?;
        tx.send(Message::Binary(bytes))
            .map_err(|_| Error::NotConnected)
    }

    fn handle_close(&mut self, frame: Option<CloseFrame<'_>>, events: &UnboundedSender<ShardEvent>) -> CloseOutcome {
        let code = frame.as_ref().map(|f| u16::from(f.code));
        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();

        self.last_close_code = code;
        self.session.on_close();
        self.heartbeat.reset();
        self.stage = Stage::Disconnected;
        self.outbound_tx = None;
        self.inbound_rx = None;

        let resumable = code.map(|c| !session::is_non_resumable(c)).unwrap_or(true) && self.session.id().is_some();

        if let Some(c) = code {
            if !resumable {
                self.session.reset();
            }

            if session::is_unrecoverable(c) {
                let _ = events.send(ShardEvent::Error(format!("gateway closed with unrecoverable code {c}")));
            }
        }

        let _ = events.send(ShardEvent::Close { code, reason: reason.clone() });

        CloseOutcome { code, resumable: self.session.id().is_some() }
    }

    fn on_socket_gone(&mut self) -> CloseOutcome {
        self.last_close_code = None;
        self.session.on_close();
        self.heartbeat.reset();
        self.stage = Stage::Disconnected;
        self.outbound_tx = None;
        self.inbound_rx = None;

        CloseOutcome { code: None, resumable: self.session.id().is_some() }
    }

    /// Destroy the shard: reset timers, close the socket, and transition
    /// to `Disconnected`. See [`DestroyOptions`] for the parameters'
    /// meaning. `events`, if supplied, receives a [`ShardEvent::Destroyed`]
    /// when `options.emit` is set.
    pub fn destroy(
        &mut self,
        options: DestroyOptions,
        events: Option<&UnboundedSender<ShardEvent>>,
    ) -> CloseOutcome {
        self.destroy_internal(options, events)
    }

    fn destroy_internal(
        &mut self,
        options: DestroyOptions,
        events: Option<&UnboundedSender<ShardEvent>>,
    ) -> CloseOutcome {
        self.heartbeat.reset();

        if let Some(tx) = &self.outbound_tx {
            let frame = CloseFrame {
                code: CloseCode::from(options.code),
                reason: std::borrow::Cow::Borrowed(""),
            };
            let _ = tx.send(Message::Close(Some(frame)));
        }

        self.outbound_tx = None;
        self.inbound_rx = None;
        self.stage = Stage::Disconnected;
        self.session.on_close();

        if options.reset {
            self.session.reset();
        }

        self.bucket = RateBucket::new();

        if options.emit {
            if let Some(events) = events {
                let _ = events.send(ShardEvent::Destroyed);
            }
        }

        CloseOutcome {
            code: Some(options.code),
            resumable: !options.reset && self.session.id().is_some(),
        }
    }
}

fn build_url(base: &str, codec: Codec, compression: bool, version: u64) -> String {
    let mut url = format!("{base}?v={version}&encoding={}", codec.query_value());

    if compression {
        url.push_str("&compress=zlib-stream");
    }

    url
}

async fn connect(url: &str) -> Result<ShardStream> {
    let (stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|source| Error::Connecting { source })?;

    Ok(stream)
}

async fn recv_inbound(rx: &mut Option<UnboundedReceiver<Message>>) -> Option<Message> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(sleep: Option<std::pin::Pin<Box<tokio::time::Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending_mut(sleep: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::build_url;
    use crate::codec::Codec;

    #[test]
    fn build_url_appends_encoding_and_compression() {
        let url = build_url("wss://gateway.discord.gg", Codec::Json, true, 6);
        assert_eq!(
            url,
            "wss://gateway.discord.gg?v=6&encoding=json&compress=zlib-stream"
        );
    }

    #[test]
    fn build_url_without_compression() {
        let url = build_url("wss://gateway.discord.gg", Codec::Json, false, 10);
        assert_eq!(url, "wss://gateway.discord.gg?v=10&encoding=json");
    }
}
