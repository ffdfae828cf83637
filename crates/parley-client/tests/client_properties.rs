//! Property-based tests for the Client state machine.
//!
//! Random sequences of UI intents, transport events and server events are
//! fed into one client; protocol invariants are checked after every step.

use std::{collections::HashMap, time::Duration};

use parley_client::{Client, ClientAction, ClientEvent, ConnectStep, Draft, SessionConfig};
use parley_core::env::{Environment, test_utils::MockEnv};
use parley_proto::{
    ConversationId, MessageId, Payload, UserId,
    payloads::chat::{ChatMessage, MessageKind},
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Drop,
    Disconnect,
    Enter(u8),
    Exit(u8),
    Text(u8, bool),
    Advance(u64),
    Send(u8),
    PeerMessage(u8, u8, u64),
    EchoLastSent,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Connect),
        1 => Just(Op::Drop),
        1 => Just(Op::Disconnect),
        2 => (0u8..3).prop_map(Op::Enter),
        1 => (0u8..3).prop_map(Op::Exit),
        4 => ((0u8..3), any::<bool>()).prop_map(|(c, has)| Op::Text(c, has)),
        3 => (0u64..2500).prop_map(Op::Advance),
        2 => (0u8..3).prop_map(Op::Send),
        2 => ((0u8..3), (0u8..6), (0u64..1000)).prop_map(|(c, id, ts)| Op::PeerMessage(c, id, ts)),
        1 => Just(Op::EchoLastSent),
    ]
}

fn conversation(index: u8) -> ConversationId {
    ConversationId::new(format!("c{index}"))
}

fn sent_payloads(actions: &[ClientAction]) -> Vec<Payload> {
    actions
        .iter()
        .filter_map(|action| match action {
            ClientAction::Send(frame) => Some(Payload::from_frame(frame).unwrap()),
            _ => None,
        })
        .collect()
}

struct Harness {
    env: MockEnv,
    client: Client<MockEnv>,
    last_sent: Option<ChatMessage>,
}

impl Harness {
    fn new() -> Self {
        let env = MockEnv::new();
        let client = Client::new(env.clone(), UserId::from("u1"), &SessionConfig::default());
        Self { env, client, last_sent: None }
    }

    fn apply(&mut self, op: &Op) -> Vec<ClientAction> {
        let event = match op {
            Op::Connect => match self.client.begin_connect() {
                ConnectStep::Open { attempt } => ClientEvent::TransportOpened { attempt },
                _ => return vec![],
            },
            Op::Drop => ClientEvent::TransportClosed { attempt: self.client.attempt(), reason: "reset".into() },
            Op::Disconnect => ClientEvent::Disconnect,
            Op::Enter(c) => ClientEvent::Enter { conversation_id: conversation(*c) },
            Op::Exit(c) => ClientEvent::Exit { conversation_id: conversation(*c) },
            Op::Text(c, has_content) => ClientEvent::TextChanged {
                conversation_id: conversation(*c),
                has_content: *has_content,
                now: self.env.now(),
            },
            Op::Advance(ms) => {
                self.env.advance(Duration::from_millis(*ms));
                ClientEvent::Tick { now: self.env.now() }
            },
            Op::Send(c) => {
                // NotConnected is an expected outcome here
                return match self.client.send(Draft::text(conversation(*c), "u2", "hola")) {
                    Ok((_, actions)) => {
                        self.last_sent = sent_payloads(&actions).into_iter().find_map(|payload| match payload {
                            Payload::SendMessage(message) => Some(message),
                            _ => None,
                        });
                        actions
                    },
                    Err(_) => vec![],
                };
            },
            Op::PeerMessage(c, id, timestamp) => {
                let message = ChatMessage {
                    id: MessageId::new(format!("peer-{id}")),
                    conversation_id: conversation(*c),
                    sender_id: UserId::from("u2"),
                    receiver_id: UserId::from("u1"),
                    content: "buenas".to_string(),
                    kind: MessageKind::Text,
                    timestamp: *timestamp,
                };
                ClientEvent::FrameReceived(Payload::NewMessage(message).into_frame().unwrap())
            },
            Op::EchoLastSent => match &self.last_sent {
                Some(message) => {
                    ClientEvent::FrameReceived(Payload::NewMessage(message.clone()).into_frame().unwrap())
                },
                None => return vec![],
            },
        };

        self.client.handle(event).unwrap()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn nothing_is_emitted_while_disconnected(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut harness = Harness::new();

        for op in &ops {
            let was_connected = harness.client.is_connected();
            let payloads = sent_payloads(&harness.apply(op));

            if !was_connected && !matches!(op, Op::Connect) {
                prop_assert!(payloads.is_empty(), "{op:?} emitted {payloads:?} while disconnected");
            }
        }
    }

    #[test]
    fn typing_signals_alternate(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut harness = Harness::new();
        let mut typing: HashMap<ConversationId, bool> = HashMap::new();

        for op in &ops {
            let payloads = sent_payloads(&harness.apply(op));

            // Bursts die silently with the connection
            if !harness.client.is_connected() {
                typing.clear();
            }

            for payload in payloads {
                if let Payload::Typing(signal) = payload {
                    let active = typing.get(&signal.conversation_id).copied().unwrap_or(false);
                    prop_assert_ne!(active, signal.is_typing, "repeated typing={} in {}", signal.is_typing, signal.conversation_id);
                    typing.insert(signal.conversation_id, signal.is_typing);
                }
            }
        }
    }

    #[test]
    fn typing_stop_always_precedes_send(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut harness = Harness::new();

        for op in &ops {
            let payloads = sent_payloads(&harness.apply(op));
            let Some(send_at) = payloads.iter().position(|p| matches!(p, Payload::SendMessage(_))) else {
                continue;
            };

            prop_assert_eq!(send_at, payloads.len() - 1, "send_message must be the last frame");
            for payload in &payloads[..send_at] {
                prop_assert!(matches!(payload, Payload::Typing(t) if !t.is_typing));
            }
        }
    }

    #[test]
    fn store_stays_ordered_and_unique(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut harness = Harness::new();

        for op in &ops {
            harness.apply(op);
        }

        for index in 0..3 {
            let messages = harness.client.store().messages(&conversation(index));
            for pair in messages.windows(2) {
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            }

            let mut ids: Vec<_> = messages.iter().map(|m| m.id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), messages.len());
        }
    }
}
