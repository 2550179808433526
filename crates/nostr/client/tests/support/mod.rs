//! In-process WebSocket relay for client integration tests.

use futures::{SinkExt, StreamExt};
use nostr::{Event, generate_challenge, unix_now, validate_auth_event};
use nostr_client::{ClientMessage, RelayMessage};
use std::sync::{Arc, Mutex, Once};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No authentication asked for
    Open,
    /// Writes and reads need a valid AUTH first
    Required,
    /// Every AUTH is refused with a fresh challenge
    RejectAll,
}

pub struct TestRelay {
    pub url: String,
    events: Arc<Mutex<Vec<Event>>>,
    handle: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start(mode: AuthMode) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let events = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let url = url.clone();
            let events = events.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, url.clone(), mode, events.clone()));
                }
            }
        });

        Self { url, events, handle }
    }

    /// Events the relay accepted, in arrival order.
    pub fn stored(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn seed(&self, events: &[Event]) {
        self.events.lock().unwrap().extend_from_slice(events);
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, url: String, mode: AuthMode, events: Arc<Mutex<Vec<Event>>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();
    let mut challenge = generate_challenge();
    let mut authed = false;

    if mode != AuthMode::Open {
        let greeting = RelayMessage::Auth {
            challenge: challenge.clone(),
        };
        if tx.send(Message::Text(greeting.to_json().into())).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(message) = ClientMessage::from_json(text.as_str()) else {
            continue;
        };
        let gated = mode != AuthMode::Open && !authed;

        let replies = match message {
            ClientMessage::Event(event) if gated => vec![ok(&event, false, "auth-required: sign in first")],
            ClientMessage::Event(event) => {
                events.lock().unwrap().push(event.clone());
                vec![ok(&event, true, "")]
            }
            ClientMessage::Auth(event) => match mode {
                AuthMode::Open => vec![ok(&event, true, "")],
                AuthMode::RejectAll => {
                    challenge = generate_challenge();
                    vec![
                        RelayMessage::Auth {
                            challenge: challenge.clone(),
                        },
                        ok(&event, false, "restricted: not on the list"),
                    ]
                }
                AuthMode::Required => match validate_auth_event(&event, &url, &challenge, unix_now()) {
                    Ok(()) => {
                        authed = true;
                        vec![ok(&event, true, "")]
                    }
                    Err(e) => vec![ok(&event, false, &format!("invalid: {}", e))],
                },
            },
            ClientMessage::Req {
                subscription_id, ..
            } if gated => vec![RelayMessage::Closed {
                subscription_id,
                message: "auth-required: sign in first".to_string(),
            }],
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut replies: Vec<RelayMessage> = events
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|e| filters.iter().any(|f| f.matches(e)))
                    .map(|e| RelayMessage::Event {
                        subscription_id: subscription_id.clone(),
                        event: e.clone(),
                    })
                    .collect();
                replies.push(RelayMessage::Eose { subscription_id });
                replies
            }
            ClientMessage::Close { .. } => vec![],
        };

        for reply in replies {
            if tx.send(Message::Text(reply.to_json().into())).await.is_err() {
                return;
            }
        }
    }
}

fn ok(event: &Event, success: bool, message: &str) -> RelayMessage {
    RelayMessage::Ok {
        event_id: event.id.clone(),
        success,
        message: message.to_string(),
    }
}
