//! Push-channel connection manager.
//!
//! Owns exactly one websocket connection to the server at a time and
//! bridges parsed push events onto the bus. The connect loop drops the
//! previous stream before dialing again, so a reconnect can never leave
//! the old channel's reader alive. Reconnects run forever at a constant
//! interval; closure drives reconnection, errors are logged only.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::broadcast::Sender;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::{ChannelMessage, Message, PushEvent};

/// Fixed delay between reconnect attempts. No backoff, no retry cap.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Drives the websocket push channel.
pub struct ChannelManager {
    bus_producer: Sender<Message>,
    channel_url: String,
    reconnect_delay: Duration,
}

impl ChannelManager {
    /// Creates a channel manager for the given websocket URL.
    pub fn new(bus_producer: Sender<Message>, channel_url: String) -> Self {
        Self {
            bus_producer,
            channel_url,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Runs the connect loop on a current-thread runtime. Blocks the
    /// calling thread for the lifetime of the session.
    pub fn run(&mut self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(error) => {
                warn!("push channel runtime failed to start: {error}");
                return;
            }
        };
        runtime.block_on(self.connect_loop());
    }

    async fn connect_loop(&self) {
        loop {
            match tokio_tungstenite::connect_async(self.channel_url.as_str()).await {
                Ok((stream, _)) => {
                    info!("push channel connected: {}", self.channel_url);
                    let _ = self.bus_producer.send(Message::Channel(ChannelMessage::Connected));
                    self.read_until_closed(stream).await;
                    let _ = self
                        .bus_producer
                        .send(Message::Channel(ChannelMessage::Disconnected));
                    info!(
                        "push channel closed, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(error) => {
                    warn!(
                        "push channel connect failed ({error}), retrying in {:?}",
                        self.reconnect_delay
                    );
                }
            }
            // Exactly one pending reconnect at a time.
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn read_until_closed<S>(&self, stream: tokio_tungstenite::WebSocketStream<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut ws_tx, mut ws_rx) = stream.split();
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if let Some(event) = parse_push_event(text.as_str()) {
                        let _ = self.bus_producer.send(Message::Push(event));
                    }
                }
                Ok(WsMessage::Ping(payload)) => {
                    if let Err(error) = ws_tx.send(WsMessage::Pong(payload)).await {
                        warn!("failed to answer websocket ping: {error}");
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => {
                    debug!("push channel close frame received");
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!("push channel read error: {error}");
                    break;
                }
            }
        }
    }
}

/// Parses one inbound text frame. Malformed frames are discarded and
/// logged; they never reach the state store.
fn parse_push_event(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(event) => Some(event),
        Err(error) => {
            warn!("discarding unparseable push message: {error}");
            None
        }
    }
}
