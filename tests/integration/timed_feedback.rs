// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Tests for the timed-feedback (v7) dialect: template discovery after
//! authentication, persistence of the discovered slot, the guess timer
//! standing in for display echoes, and the disabled-sending state when no
//! usable template exists.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use stagepager::bridge::{Bridge, BridgeConfig, BridgeEvent};
use stagepager::chat::{ChatMessage, FeedbackError, FeedbackSink, Nonce, Reaction};
use stagepager::config::{ConfigError, DiscoveryStore, NullDiscoveryStore};
use stagepager_proto::payload::{MessageSlot, ProtocolVersion};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

// ===== Stub presentation endpoint =====

struct StubEndpoint {
    port: u16,
    inbound: mpsc::UnboundedReceiver<Value>,
    inject_tx: mpsc::UnboundedSender<Value>,
}

impl StubEndpoint {
    fn inject(&self, payload: Value) {
        self.inject_tx.send(payload).expect("endpoint task ended");
    }
}

async fn start_endpoint() -> StubEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            let (mut to_client, mut from_client) = ws.split();

            loop {
                tokio::select! {
                    frame = from_client.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                continue;
                            };
                            if value["action"] == "authenticate" {
                                let accept = json!({
                                    "action": "authenticate",
                                    "authenticated": true
                                });
                                let reply = Message::Text(accept.to_string().into());
                                if to_client.send(reply).await.is_err() {
                                    break;
                                }
                            } else {
                                let _ = inbound_tx.send(value);
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    },
                    injected = inject_rx.recv() => {
                        let Some(payload) = injected else { break };
                        let frame = Message::Text(payload.to_string().into());
                        if to_client.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    StubEndpoint {
        port,
        inbound,
        inject_tx,
    }
}

async fn expect_action(inbound: &mut mpsc::UnboundedReceiver<Value>, action: &str) -> Value {
    loop {
        let payload = timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {action}"))
            .expect("endpoint task ended");
        if payload["action"] == action {
            return payload;
        }
    }
}

/// Two templates, one carrying the marker in its title.
fn template_list() -> Value {
    json!({
        "action": "messageRequest",
        "messages": [
            {"messageTitle": "Countdown", "messageComponents": ["${Timer} remaining"]},
            {"messageTitle": "Pager Call", "messageComponents": ["Now paging ${Pager}"]}
        ]
    })
}

// ===== Bridge plumbing =====

#[derive(Clone, Default)]
struct RecordingFeedback {
    reactions: Arc<Mutex<Vec<(String, Reaction)>>>,
}

impl FeedbackSink for RecordingFeedback {
    async fn add_reaction(
        &self,
        _channel: &str,
        nonce: &Nonce,
        reaction: Reaction,
    ) -> Result<(), FeedbackError> {
        self.reactions
            .lock()
            .push((nonce.as_str().to_string(), reaction));
        Ok(())
    }
}

impl RecordingFeedback {
    fn for_nonce(&self, nonce: &str) -> Vec<Reaction> {
        self.reactions
            .lock()
            .iter()
            .filter(|(recorded, _)| recorded == nonce)
            .map(|(_, reaction)| *reaction)
            .collect()
    }

    async fn wait_for(&self, nonce: &str, reaction: Reaction) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if self.for_nonce(nonce).contains(&reaction) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "no {reaction} reaction for message {nonce}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Records every slot handed to it for persistence.
#[derive(Clone, Default)]
struct RecordingStore {
    saved: Arc<Mutex<Vec<MessageSlot>>>,
}

impl DiscoveryStore for RecordingStore {
    fn save(&self, slot: &MessageSlot) -> Result<(), ConfigError> {
        self.saved.lock().push(slot.clone());
        Ok(())
    }
}

fn timed_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        listen_channel: "C-stage".to_string(),
        ignore_codes: Vec::new(),
        version: ProtocolVersion::V7,
        host: "127.0.0.1".to_string(),
        port,
        password: "hunter2".to_string(),
        batch_window: Duration::from_millis(80),
        batch_max: 3,
        ack_guess: Duration::from_millis(400),
        template_marker: "pager".to_string(),
        saved_slot: None,
    }
}

fn spawn_bridge(
    config: BridgeConfig,
    store: Arc<dyn DiscoveryStore>,
) -> (
    Bridge<RecordingFeedback>,
    RecordingFeedback,
    mpsc::Receiver<BridgeEvent>,
) {
    let feedback = RecordingFeedback::default();
    let (bridge, events) = Bridge::spawn(config, feedback.clone(), store);
    (bridge, feedback, events)
}

fn operator_says(text: &str, ts: &str) -> ChatMessage {
    ChatMessage {
        channel: "C-stage".to_string(),
        text: text.to_string(),
        ts: ts.to_string(),
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ===== Tests =====

#[tokio::test]
async fn discovery_adopts_the_marked_template_and_persists_it() {
    let mut endpoint = start_endpoint().await;
    let store = RecordingStore::default();
    let (bridge, feedback, _events) =
        spawn_bridge(timed_config(endpoint.port), Arc::new(store.clone()));

    expect_action(&mut endpoint.inbound, "messageRequest").await;
    endpoint.inject(template_list());

    wait_until(|| bridge.status().slot.is_some()).await;
    let slot = bridge.status().slot.unwrap();
    assert_eq!(slot.index, 1);
    assert_eq!(slot.token, "Pager");
    assert_eq!(store.saved.lock().clone(), vec![slot]);

    // Sends now target the discovered slot.
    bridge.handle_message(&operator_says("4170", "1.0")).await;
    let shown = expect_action(&mut endpoint.inbound, "messageSend").await;
    assert_eq!(shown["messageIndex"], 1);
    assert_eq!(shown["messageKeys"], json!(["Pager"]));
    assert_eq!(shown["messageValues"], json!(["4170"]));
    feedback.wait_for("1.0", Reaction::Done).await;
}

#[tokio::test]
async fn the_guess_timer_completes_the_lifecycle_without_echoes() {
    let mut endpoint = start_endpoint().await;
    let (bridge, feedback, _events) =
        spawn_bridge(timed_config(endpoint.port), Arc::new(NullDiscoveryStore));

    expect_action(&mut endpoint.inbound, "messageRequest").await;
    endpoint.inject(template_list());
    wait_until(|| bridge.status().slot.is_some()).await;

    bridge.handle_message(&operator_says("2090", "2.0")).await;
    expect_action(&mut endpoint.inbound, "messageSend").await;
    feedback.wait_for("2.0", Reaction::Shown).await;
    let shown_at = Instant::now();
    feedback.wait_for("2.0", Reaction::Done).await;
    assert!(
        shown_at.elapsed() >= Duration::from_millis(300),
        "the guess window was cut short"
    );

    // The next code flows without any endpoint confirmation.
    bridge.handle_message(&operator_says("3090", "2.1")).await;
    let second = expect_action(&mut endpoint.inbound, "messageSend").await;
    assert_eq!(second["messageValues"], json!(["3090"]));
}

#[tokio::test]
async fn event_echoes_are_ignored_under_timed_feedback() {
    let mut endpoint = start_endpoint().await;
    let (bridge, feedback, _events) =
        spawn_bridge(timed_config(endpoint.port), Arc::new(NullDiscoveryStore));

    expect_action(&mut endpoint.inbound, "messageRequest").await;
    endpoint.inject(template_list());
    wait_until(|| bridge.status().slot.is_some()).await;

    bridge.handle_message(&operator_says("7777", "3.0")).await;
    expect_action(&mut endpoint.inbound, "messageSend").await;
    feedback.wait_for("3.0", Reaction::Shown).await;

    // A stray hide echo must not cut the guess window short.
    endpoint.inject(json!({"action": "messageHide"}));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        !feedback.for_nonce("3.0").contains(&Reaction::Done),
        "a stray echo released the display early"
    );

    feedback.wait_for("3.0", Reaction::Done).await;
}

#[tokio::test]
async fn an_unmarked_template_list_disables_sending() {
    let mut endpoint = start_endpoint().await;
    let (bridge, feedback, mut events) =
        spawn_bridge(timed_config(endpoint.port), Arc::new(NullDiscoveryStore));

    expect_action(&mut endpoint.inbound, "messageRequest").await;
    let unmarked = json!({
        "action": "messageRequest",
        "messages": [
            {"messageTitle": "Countdown", "messageComponents": ["${Timer}"]}
        ]
    });
    endpoint.inject(unmarked.clone());

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no discovery event")
        .expect("event channel closed");
    assert!(matches!(event, BridgeEvent::DiscoveryFailed));

    // Reported once per connection, not once per list.
    endpoint.inject(unmarked);
    assert!(
        timeout(Duration::from_millis(700), events.recv())
            .await
            .is_err(),
        "a repeated template miss was reported twice"
    );

    // Codes cannot reach the screen, but submitters are not left hanging.
    bridge.handle_message(&operator_says("4040", "4.0")).await;
    feedback.wait_for("4.0", Reaction::Done).await;
    assert!(
        timeout(Duration::from_millis(300), endpoint.inbound.recv())
            .await
            .is_err(),
        "a code was sent with no usable slot"
    );
}

#[tokio::test]
async fn a_remembered_slot_serves_until_discovery_lands() {
    let mut endpoint = start_endpoint().await;
    let mut config = timed_config(endpoint.port);
    config.saved_slot = Some(MessageSlot {
        index: 4,
        token: "Zone".to_string(),
    });
    let (bridge, _feedback, _events) = spawn_bridge(config, Arc::new(NullDiscoveryStore));

    // The endpoint never answers the template request; the slot remembered
    // from an earlier run still drives sends.
    expect_action(&mut endpoint.inbound, "messageRequest").await;
    bridge.handle_message(&operator_says("8211", "5.0")).await;

    let shown = expect_action(&mut endpoint.inbound, "messageSend").await;
    assert_eq!(shown["messageIndex"], 4);
    assert_eq!(shown["messageKeys"], json!(["Zone"]));
}
