//! Scripted in-memory relays for unit tests.

use crate::error::RelayConnectionError;
use crate::message::{ClientMessage, RelayMessage};
use crate::transport::{Connector, HttpTransport, RelayLink};
use async_trait::async_trait;
use nostr::{Event, normalize_relay_url};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

type Script = Arc<dyn Fn(&ClientMessage) -> Vec<RelayMessage> + Send + Sync>;

/// A relay whose replies are computed from each client message.
#[derive(Clone)]
pub struct MockRelay {
    script: Script,
    greeting: Vec<RelayMessage>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl MockRelay {
    pub fn new(script: impl Fn(&ClientMessage) -> Vec<RelayMessage> + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            greeting: Vec::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Messages delivered as soon as a connection opens.
    pub fn greeting(mut self, messages: Vec<RelayMessage>) -> Self {
        self.greeting = messages;
        self
    }

    /// Never answers anything.
    pub fn silent() -> Self {
        Self::new(|_| vec![])
    }

    pub fn accepting() -> Self {
        Self::new(|msg| match msg {
            ClientMessage::Event(event) => vec![ok(event, true, "")],
            _ => vec![],
        })
    }

    pub fn rejecting(reason: &str) -> Self {
        let reason = reason.to_string();
        Self::new(move |msg| match msg {
            ClientMessage::Event(event) => vec![ok(event, false, &reason)],
            _ => vec![],
        })
    }

    /// Answers every `REQ` with the stored events matching its filters,
    /// then `EOSE`.
    pub fn serving(events: Vec<Event>) -> Self {
        Self::new(move |msg| match msg {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut replies: Vec<RelayMessage> = events
                    .iter()
                    .filter(|e| filters.iter().any(|f| f.matches(e)))
                    .map(|e| RelayMessage::Event {
                        subscription_id: subscription_id.clone(),
                        event: e.clone(),
                    })
                    .collect();
                replies.push(RelayMessage::Eose {
                    subscription_id: subscription_id.clone(),
                });
                replies
            }
            _ => vec![],
        })
    }

    /// Every client message this relay has received, across connections.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }
}

pub fn ok(event: &Event, success: bool, message: &str) -> RelayMessage {
    RelayMessage::Ok {
        event_id: event.id.clone(),
        success,
        message: message.to_string(),
    }
}

struct MockLink {
    relay: MockRelay,
    inbox: VecDeque<RelayMessage>,
}

#[async_trait]
impl RelayLink for MockLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), RelayConnectionError> {
        self.relay.sent.lock().unwrap().push(message.clone());
        self.inbox.extend((self.relay.script)(message));
        Ok(())
    }

    async fn recv(&mut self) -> Result<RelayMessage, RelayConnectionError> {
        match self.inbox.pop_front() {
            Some(message) => Ok(message),
            None => futures::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Connector handing out links to registered mock relays.
#[derive(Default)]
pub struct MockConnector {
    relays: HashMap<String, MockRelay>,
    connects: AtomicUsize,
    connect_delay: Option<Duration>,
    connecting: AtomicUsize,
    /// Most connection attempts seen in progress at once
    peak_connecting: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relay(mut self, url: &str, relay: MockRelay) -> Self {
        self.relays.insert(normalize_relay_url(url), relay);
        self
    }

    /// Hold every connection attempt open for `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn peak_connecting(&self) -> usize {
        self.peak_connecting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn RelayLink>, RelayConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let current = self.connecting.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connecting.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.connecting.fetch_sub(1, Ordering::SeqCst);

        let relay = self
            .relays
            .get(&normalize_relay_url(url.as_str()))
            .cloned()
            .ok_or_else(|| RelayConnectionError::Connect(format!("{} refused", url)))?;
        Ok(Box::new(MockLink {
            inbox: relay.greeting.iter().cloned().collect(),
            relay,
        }))
    }
}

type HttpHandler =
    Arc<dyn Fn(&Url, &[u8], Option<&str>) -> Result<Vec<u8>, RelayConnectionError> + Send + Sync>;

/// Recorded HTTP request: url, body, authorization header.
pub type HttpRequest = (String, Vec<u8>, Option<String>);

/// HTTP transport answering from closures.
#[derive(Clone)]
pub struct MockHttp {
    post: HttpHandler,
    documents: HashMap<String, Vec<u8>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockHttp {
    pub fn new(
        post: impl Fn(&Url, &[u8], Option<&str>) -> Result<Vec<u8>, RelayConnectionError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            post: Arc::new(post),
            documents: HashMap::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unused() -> Self {
        Self::new(|url, _, _| Err(RelayConnectionError::Connect(format!("{} refused", url))))
    }

    /// Serve `body` for GET requests to `url`.
    pub fn with_document(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.as_bytes().to_vec());
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn post_json(
        &self,
        url: &Url,
        body: Vec<u8>,
        authorization: Option<String>,
    ) -> Result<Vec<u8>, RelayConnectionError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone(), authorization.clone()));
        (self.post)(url, &body, authorization.as_deref())
    }

    async fn get(&self, url: &Url, _accept: &str) -> Result<Vec<u8>, RelayConnectionError> {
        self.documents
            .get(url.as_str())
            .cloned()
            .ok_or(RelayConnectionError::Http(404))
    }
}
