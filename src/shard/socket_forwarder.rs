//! Forwards a WebSocket stream to and from plain channels, so the rest of
//! the shard never touches the socket directly.

use futures_util::{future::FutureExt, sink::SinkExt, stream::StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// The concrete stream type produced by connecting to the gateway.
pub type ShardStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drives a WebSocket stream on its own task, exposing it as a pair of
/// unbounded channels.
///
/// An idle socket (no inbound or outbound traffic at all, including
/// heartbeats) for longer than [`Self::TIMEOUT`] is treated as dead and
/// closed; in practice the heartbeat cadence keeps well under this.
pub struct SocketForwarder {
    outbound_rx: UnboundedReceiver<Message>,
    stream: ShardStream,
    inbound_tx: UnboundedSender<Message>,
}

impl SocketForwarder {
    const TIMEOUT: Duration = Duration::from_secs(90);

    /// Split `stream` into a forwarder plus the channel halves the owning
    /// shard uses to talk to it.
    #[must_use]
    pub fn new(
        stream: ShardStream,
    ) -> (Self, UnboundedReceiver<Message>, UnboundedSender<Message>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        (
            Self {
                outbound_rx,
                stream,
                inbound_tx,
            },
            inbound_rx,
            outbound_tx,
        )
    }

    /// Run the forwarding loop until the socket closes, errors, an
    /// outbound send fails, or the idle timeout elapses.
    pub async fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("starting socket forwarder loop");

        loop {
            let outbound = self.outbound_rx.recv();
            let inbound = self.stream.next().fuse();
            let timeout = tokio::time::sleep(Self::TIMEOUT).fuse();

            tokio::pin!(outbound, inbound, timeout);

            futures_util::select! {
                msg = outbound => {
                    match msg {
                        Some(msg) => {
                            if let Err(_err) = self.stream.send(msg).await {
                                #[cfg(feature = "tracing")]
                                tracing::warn!("sending failed: {_err}");
                                break;
                            }
                        }
                        None => {
                            let _ = self.stream.close(None).await;
                            break;
                        }
                    }
                }
                msg = inbound => {
                    match msg {
                        Some(Ok(msg)) => {
                            if self.inbound_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Some(Err(_err)) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("socket errored: {_err}");
                            break;
                        }
                        None => break,
                    }
                }
                _ = timeout => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("socket idle for {:?}, closing", Self::TIMEOUT);
                    break;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("socket forwarder loop exiting");
    }
}
