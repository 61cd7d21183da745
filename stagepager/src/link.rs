//! Presentation link: websocket lifecycle and the inbound event pump.
//!
//! [`run_link`] owns the connection for the life of the process:
//! connect with a timeout, authenticate, pump inbound events, and on
//! any disconnect retry with doubling backoff. The only terminal exit
//! is a rejected password. Sends go through [`Link`], which drops
//! payloads with a warning while the connection is down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use stagepager_proto::discover;
use stagepager_proto::payload::{self, FeedbackMode, MessageSlot, ProtocolVersion};
use stagepager_proto::remote::{self, RemoteEvent};

use crate::bridge::{BridgeEvent, Shared};
use crate::config::DiscoveryStore;

/// Write half of the control websocket.
type WsSender = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of the control websocket.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Timeout for opening the control websocket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// First reconnect delay after a failure.
const BACKOFF_FLOOR: Duration = Duration::from_secs(1);

/// Reconnect delay never grows past this.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Errors surfaced by link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No active connection; the payload was dropped.
    #[error("link is down")]
    Down,

    /// The newer dialect has not discovered a message slot yet.
    #[error("no message slot known")]
    SlotUnknown,

    /// The connect attempt timed out.
    #[error("connect timed out")]
    ConnectTimeout,

    /// An underlying websocket error.
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Configuration for the presentation link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Presentation control host.
    pub host: String,
    /// Presentation control port.
    pub port: u16,
    /// Control password.
    pub password: String,
    /// Protocol dialect to speak.
    pub version: ProtocolVersion,
    /// Marker looked for in template titles during discovery.
    pub template_marker: String,
    /// Slot to drive before (or instead of) discovery.
    pub initial_slot: Option<MessageSlot>,
}

/// Handle to the presentation connection, shared by the bridge tasks.
pub struct Link {
    sender: tokio::sync::Mutex<Option<WsSender>>,
    connected: AtomicBool,
    authenticated: AtomicBool,
    slot: parking_lot::Mutex<Option<MessageSlot>>,
    config: LinkConfig,
}

impl Link {
    /// Create an unconnected link.
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        Self {
            sender: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            slot: parking_lot::Mutex::new(config.initial_slot.clone()),
            config,
        }
    }

    /// Whether the control websocket is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Whether the endpoint accepted the password on this connection.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// The protocol dialect this link speaks.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.config.version
    }

    /// The message slot currently driven, when known.
    #[must_use]
    pub fn slot(&self) -> Option<MessageSlot> {
        self.slot.lock().clone()
    }

    /// Send the show payload for `text`, driving the active slot.
    ///
    /// # Errors
    ///
    /// [`LinkError::SlotUnknown`] when discovery has not produced a
    /// slot, [`LinkError::Down`] when the connection is closed, or the
    /// underlying websocket error.
    pub async fn send_show(&self, text: &str) -> Result<(), LinkError> {
        let Some(slot) = self.slot() else {
            return Err(LinkError::SlotUnknown);
        };
        self.send(&payload::show_message(&slot, text)).await
    }

    /// Send the hide payload.
    ///
    /// # Errors
    ///
    /// [`LinkError::Down`] when the connection is closed, or the
    /// underlying websocket error.
    pub async fn send_hide(&self) -> Result<(), LinkError> {
        self.send(&payload::hide_message()).await
    }

    async fn send_list_request(&self) -> Result<(), LinkError> {
        self.send(&payload::request_message_list()).await
    }

    async fn send(&self, payload: &serde_json::Value) -> Result<(), LinkError> {
        let mut guard = self.sender.lock().await;
        let Some(ws_sender) = guard.as_mut() else {
            return Err(LinkError::Down);
        };
        match ws_sender.send(Message::Text(payload.to_string().into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(LinkError::Ws(e))
            }
        }
    }
}

/// Why the pump stopped.
enum PumpExit {
    /// The endpoint rejected the password. Do not retry.
    AuthRejected,
    /// The connection dropped. Retry with backoff.
    Disconnected,
}

/// Run the connection lifecycle until authentication is rejected.
pub async fn run_link(
    link: Arc<Link>,
    shared: Arc<Shared>,
    store: Arc<dyn DiscoveryStore>,
    events: mpsc::Sender<BridgeEvent>,
) {
    let endpoint = endpoint_url(&link.config);
    let mut backoff = BACKOFF_FLOOR;

    loop {
        let reader = match open(&link, &endpoint).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    err = %e,
                    retry_secs = backoff.as_secs(),
                    "control connect failed"
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };

        backoff = BACKOFF_FLOOR;
        tracing::info!(endpoint = %endpoint, "control connected, authenticating");

        let exit = pump(&link, &shared, &store, &events, reader).await;

        link.connected.store(false, Ordering::Relaxed);
        link.authenticated.store(false, Ordering::Relaxed);
        *link.sender.lock().await = None;

        match exit {
            PumpExit::AuthRejected => {
                tracing::error!("password rejected by the presentation endpoint, giving up");
                return;
            }
            PumpExit::Disconnected => {
                tracing::warn!(retry_secs = backoff.as_secs(), "control connection lost");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
            }
        }
    }
}

fn endpoint_url(config: &LinkConfig) -> String {
    format!("ws://{}:{}/remote", config.host, config.port)
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(BACKOFF_CAP)
}

/// Open the websocket and fire the handshake.
async fn open(link: &Link, endpoint: &str) -> Result<WsReader, LinkError> {
    let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(endpoint))
        .await
        .map_err(|_| LinkError::ConnectTimeout)??;

    let (mut ws_sender, ws_reader) = ws_stream.split();

    let hello = payload::authenticate(link.config.version, &link.config.password);
    ws_sender.send(Message::Text(hello.to_string().into())).await?;

    *link.sender.lock().await = Some(ws_sender);
    link.connected.store(true, Ordering::Relaxed);

    Ok(ws_reader)
}

/// Pump inbound events until the connection drops or auth is rejected.
///
/// Unknown and irrelevant actions are logged and skipped; the pump must
/// survive anything the endpoint emits short of a transport error.
async fn pump(
    link: &Link,
    shared: &Shared,
    store: &Arc<dyn DiscoveryStore>,
    events: &mpsc::Sender<BridgeEvent>,
    mut reader: WsReader,
) -> PumpExit {
    // Discovery failures are reported once per connection.
    let mut discovery_reported = false;

    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                tracing::info!("control websocket closed by the endpoint");
                return PumpExit::Disconnected;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "control websocket read error");
                return PumpExit::Disconnected;
            }
        };

        let event = match remote::decode(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(err = %e, "unreadable control frame, skipping");
                continue;
            }
        };

        match event {
            RemoteEvent::Authenticate {
                authenticated: true,
                ..
            } => {
                link.authenticated.store(true, Ordering::Relaxed);
                tracing::info!(version = %link.config.version, "authenticated");
                if link.config.version == ProtocolVersion::V7 {
                    if let Err(e) = link.send_list_request().await {
                        tracing::warn!(err = %e, "could not request the template list");
                    }
                }
            }
            RemoteEvent::Authenticate {
                authenticated: false,
                error,
            } => {
                let reason = error.unwrap_or_else(|| "authentication rejected".to_string());
                tracing::warn!(reason = %reason, "endpoint refused authentication");
                let _ = events.send(BridgeEvent::AuthRejected(reason)).await;
                return PumpExit::AuthRejected;
            }
            RemoteEvent::MessageSend => {
                if link.config.version.feedback_mode() == FeedbackMode::Events {
                    tracing::debug!("endpoint confirmed the display");
                    shared.display_confirmed();
                } else {
                    tracing::debug!("display event ignored under timed feedback");
                }
            }
            RemoteEvent::MessageHide => {
                if link.config.version.feedback_mode() == FeedbackMode::Events {
                    tracing::debug!("endpoint confirmed the hide");
                    shared.display_cleared();
                } else {
                    tracing::debug!("hide event ignored under timed feedback");
                }
            }
            RemoteEvent::MessageList(templates) => {
                match discover::find_slot(&templates, &link.config.template_marker) {
                    Some(slot) => {
                        tracing::info!(
                            index = slot.index,
                            token = %slot.token,
                            "adopted a message slot from the template list"
                        );
                        *link.slot.lock() = Some(slot.clone());
                        discovery_reported = false;
                        if let Err(e) = store.save(&slot) {
                            tracing::warn!(err = %e, "could not persist the discovered slot");
                        }
                    }
                    None => {
                        *link.slot.lock() = None;
                        if !discovery_reported {
                            discovery_reported = true;
                            tracing::warn!(
                                marker = %link.config.template_marker,
                                "no usable message template, sending disabled"
                            );
                            let _ = events.send(BridgeEvent::DiscoveryFailed).await;
                        }
                    }
                }
            }
            RemoteEvent::PresentationTrigger => {
                tracing::trace!("ignoring a presentation trigger");
            }
            RemoteEvent::Clear(action) => {
                tracing::trace!(action = %action, "ignoring a clear action");
            }
            RemoteEvent::Unknown(action) => {
                tracing::debug!(action = %action, "unknown control action");
            }
        }
    }

    tracing::info!("control websocket stream ended");
    PumpExit::Disconnected
}
