//! The bridge core: chat submissions through batching, the availability
//! gate, and the presentation link.
//!
//! [`Bridge::spawn`] wires three long-running tasks: the link driver
//! (connection lifecycle and event pump), the batch scheduler (window
//! timing), and the dispatch loop (one batch at a time onto the
//! screen). Inbound chat messages enter through
//! [`Bridge::handle_message`]; each accepted code runs its own
//! short-lived submission task that emits reactions as the code
//! progresses.

pub mod ack;
pub mod command;
pub mod gate;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use stagepager_proto::payload::{FeedbackMode, MessageSlot, ProtocolVersion};

use crate::chat::{ChatMessage, FeedbackSink, Nonce, Reaction};
use crate::config::DiscoveryStore;
use crate::link::{Link, LinkConfig, run_link};

use self::ack::AckTracker;
use self::command::Command;
use self::gate::AvailabilityGate;
use self::queue::{BatchQueue, DispatchQueue, Submission, format_batch};

/// Capacity of the operator-event channel.
const EVENT_CAPACITY: usize = 16;

/// Everything the bridge needs to run, resolved from configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Chat channel the bridge listens on.
    pub listen_channel: String,
    /// Codes acknowledged with an `x` instead of being displayed.
    pub ignore_codes: Vec<String>,
    /// Protocol dialect of the presentation endpoint.
    pub version: ProtocolVersion,
    /// Presentation control host.
    pub host: String,
    /// Presentation control port.
    pub port: u16,
    /// Control password.
    pub password: String,
    /// Batching window opened by the first code of a batch.
    pub batch_window: Duration,
    /// Most codes displayed in one batch.
    pub batch_max: usize,
    /// How long a batch is presumed visible under timed feedback.
    pub ack_guess: Duration,
    /// Marker looked for in template titles during discovery.
    pub template_marker: String,
    /// Slot remembered from a previous discovery run.
    pub saved_slot: Option<MessageSlot>,
}

/// Conditions the embedding application surfaces to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The endpoint rejected the password. The link will not retry.
    AuthRejected(String),
    /// No usable message template was found during discovery.
    DiscoveryFailed,
}

/// Read-only snapshot of bridge state for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Whether the control websocket is currently open.
    pub connected: bool,
    /// Whether the endpoint accepted the password.
    pub authenticated: bool,
    /// Operator-facing protocol version (6 or 7).
    pub protocol: u8,
    /// The message slot currently driven, when known.
    pub slot: Option<MessageSlot>,
    /// Last accepted code (the `repeat` target).
    pub last_code: Option<String>,
    /// Text currently considered on screen.
    pub on_screen: Option<String>,
    /// Codes collected in the open batch.
    pub open_batch: Vec<String>,
    /// Flushed batches waiting for the display.
    pub queued_batches: usize,
}

/// State shared by the bridge tasks.
pub(crate) struct Shared {
    pub(crate) gate: AvailabilityGate,
    pub(crate) acks: AckTracker,
    pub(crate) batch: BatchQueue,
    pub(crate) dispatch: DispatchQueue,
    /// The batch currently considered on screen.
    pub(crate) on_screen: Mutex<Option<OnScreen>>,
    /// Last accepted code, for `repeat`.
    pub(crate) last_code: Mutex<Option<String>>,
}

/// Formatted text and nonces of the batch on screen.
pub(crate) struct OnScreen {
    pub(crate) text: String,
    pub(crate) nonces: Vec<Nonce>,
}

impl Shared {
    /// The endpoint confirmed a message reached the screen.
    ///
    /// Also fires when some other console puts a message up, in which
    /// case there are no nonces to complete and the gate simply closes
    /// until the display clears again.
    pub(crate) fn display_confirmed(&self) {
        self.gate.mark_busy();
        let nonces: Vec<Nonce> = self
            .on_screen
            .lock()
            .as_ref()
            .map(|on_screen| on_screen.nonces.clone())
            .unwrap_or_default();
        if !nonces.is_empty() {
            self.acks.signal_shown(&nonces);
        }
    }

    /// The display cleared; complete the batch and free the gate.
    pub(crate) fn display_cleared(&self) {
        let taken = self.on_screen.lock().take();
        if let Some(on_screen) = taken {
            self.acks.signal_cleared(&on_screen.nonces);
        }
        self.gate.mark_free();
    }
}

/// The chat-to-display bridge.
///
/// Generic over the [`FeedbackSink`] so integrations and tests can
/// substitute their own reaction delivery.
pub struct Bridge<F: FeedbackSink> {
    shared: Arc<Shared>,
    link: Arc<Link>,
    feedback: Arc<F>,
    config: BridgeConfig,
}

impl<F: FeedbackSink> Bridge<F> {
    /// Build the bridge and spawn its long-running tasks.
    ///
    /// The returned receiver delivers operator-facing conditions; the
    /// embedding application decides how to show them.
    #[must_use]
    pub fn spawn(
        config: BridgeConfig,
        feedback: F,
        store: Arc<dyn DiscoveryStore>,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let shared = Arc::new(Shared {
            gate: AvailabilityGate::new(),
            acks: AckTracker::default(),
            batch: BatchQueue::new(config.batch_window),
            dispatch: DispatchQueue::default(),
            on_screen: Mutex::new(None),
            last_code: Mutex::new(None),
        });

        // The older dialect drives a fixed slot out of the box; the
        // newer one discovers its slot after authentication.
        let initial_slot = match config.version {
            ProtocolVersion::V6 => Some(config.saved_slot.clone().unwrap_or_default()),
            ProtocolVersion::V7 => config.saved_slot.clone(),
        };

        let link = Arc::new(Link::new(LinkConfig {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
            version: config.version,
            template_marker: config.template_marker.clone(),
            initial_slot,
        }));

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        tokio::spawn(run_link(
            Arc::clone(&link),
            Arc::clone(&shared),
            store,
            events_tx,
        ));

        tokio::spawn({
            let shared = Arc::clone(&shared);
            let batch_max = config.batch_max;
            async move {
                loop {
                    let ready = shared.batch.next_ready(batch_max).await;
                    shared.dispatch.push(ready);
                }
            }
        });

        tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            Arc::clone(&link),
            config.version.feedback_mode(),
            config.ack_guess,
        ));

        let bridge = Self {
            shared,
            link,
            feedback: Arc::new(feedback),
            config,
        };
        (bridge, events_rx)
    }

    /// Route one inbound chat message.
    ///
    /// Messages from other channels and messages starting with `!` are
    /// dropped before parsing.
    pub async fn handle_message(&self, message: &ChatMessage) {
        if message.channel != self.config.listen_channel {
            return;
        }
        if message.text.starts_with('!') {
            return;
        }

        let nonce = Nonce::new(message.ts.clone());
        match command::parse(&message.text) {
            Some(Command::Show(code)) => {
                if self.config.ignore_codes.contains(&code) {
                    tracing::debug!(code = %code, "code is on the ignore list");
                    self.react(&message.channel, &nonce, Reaction::Ignored).await;
                    return;
                }
                *self.shared.last_code.lock() = Some(code.clone());
                self.submit(&message.channel, nonce, code);
            }
            Some(Command::Repeat) => {
                let last = self.shared.last_code.lock().clone();
                if let Some(code) = last {
                    tracing::info!(code = %code, "repeating the last code");
                    self.submit(&message.channel, nonce, code);
                } else {
                    tracing::debug!("repeat requested with no code to repeat");
                    self.react(&message.channel, &nonce, Reaction::Rejected).await;
                }
            }
            Some(Command::Cancel) => {
                tracing::info!("cancel requested, hiding the display");
                if let Err(e) = self.link.send_hide().await {
                    tracing::warn!(err = %e, "could not deliver the hide");
                }
                self.react(&message.channel, &nonce, Reaction::Done).await;
            }
            None => {}
        }
    }

    /// Snapshot the bridge state for status displays.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.link.is_connected(),
            authenticated: self.link.is_authenticated(),
            protocol: self.link.version().major(),
            slot: self.link.slot(),
            last_code: self.shared.last_code.lock().clone(),
            on_screen: self
                .shared
                .on_screen
                .lock()
                .as_ref()
                .map(|on_screen| on_screen.text.clone()),
            open_batch: self.shared.batch.pending_codes(),
            queued_batches: self.shared.dispatch.depth(),
        }
    }

    /// Run one submission lifecycle on its own task.
    fn submit(&self, channel: &str, nonce: Nonce, code: String) {
        let shared = Arc::clone(&self.shared);
        let feedback = Arc::clone(&self.feedback);
        let channel = channel.to_string();
        let batch_max = self.config.batch_max;

        tokio::spawn(async move {
            let signal = shared.acks.register(nonce.clone());

            let busy = shared.dispatch.depth() > 0
                || shared.on_screen.lock().is_some()
                || shared.batch.len() >= batch_max;
            if busy {
                tracing::debug!(code = %code, "display busy, code will queue");
                // Fired on its own task so a slow chat API cannot hold
                // up the enqueue.
                tokio::spawn({
                    let feedback = Arc::clone(&feedback);
                    let channel = channel.clone();
                    let nonce = nonce.clone();
                    async move {
                        if let Err(e) = feedback
                            .add_reaction(&channel, &nonce, Reaction::Queued)
                            .await
                        {
                            tracing::warn!(err = %e, "could not deliver the queued reaction");
                        }
                    }
                });
            }

            tracing::info!(code = %code, nonce = %nonce, "code accepted");
            shared.batch.add(Submission {
                nonce: nonce.clone(),
                code,
            });

            signal.wait_shown().await;
            if let Err(e) = feedback
                .add_reaction(&channel, &nonce, Reaction::Shown)
                .await
            {
                tracing::warn!(err = %e, "could not deliver the shown reaction");
            }

            signal.wait_cleared().await;
            if let Err(e) = feedback
                .add_reaction(&channel, &nonce, Reaction::Done)
                .await
            {
                tracing::warn!(err = %e, "could not deliver the done reaction");
            }

            shared.acks.remove(&nonce);
        });
    }

    async fn react(&self, channel: &str, nonce: &Nonce, reaction: Reaction) {
        if let Err(e) = self.feedback.add_reaction(channel, nonce, reaction).await {
            tracing::warn!(err = %e, reaction = %reaction, "could not deliver reaction");
        }
    }
}

/// Move flushed batches onto the display, one at a time.
async fn dispatch_loop(
    shared: Arc<Shared>,
    link: Arc<Link>,
    mode: FeedbackMode,
    ack_guess: Duration,
) {
    loop {
        shared.gate.wait_free().await;
        let batch = shared.dispatch.pop().await;
        let (text, nonces) = format_batch(&batch);

        tracing::info!(text = %text, "sending batch to the display");
        *shared.on_screen.lock() = Some(OnScreen {
            text: text.clone(),
            nonces: nonces.clone(),
        });
        shared.gate.mark_busy();

        let delivered = match link.send_show(&text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(err = %e, "could not deliver the display update");
                false
            }
        };

        match mode {
            FeedbackMode::Events if delivered => {
                // The pump completes the cycle when the endpoint echoes
                // the display and hide events back.
            }
            FeedbackMode::Events => {
                // Nothing reached the endpoint, so no echo will come.
                // Complete the cycle here to keep submitters moving.
                shared.acks.signal_shown(&nonces);
                shared.display_cleared();
            }
            FeedbackMode::Timed => {
                shared.acks.signal_shown(&nonces);
                tokio::time::sleep(ack_guess).await;
                shared.display_cleared();
            }
        }
    }
}
