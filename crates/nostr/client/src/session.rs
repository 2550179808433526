//! One live relay connection plus its challenge-auth state.
//!
//! A session is used by one task at a time: it is taken out of its endpoint's
//! slot for the duration of a publish or query and put back afterwards. A
//! session dropped mid-operation (timeout, cancellation) is simply discarded.

use crate::auth::{AuthStep, ChallengeAuthConfig, ChallengeAuthenticator};
use crate::endpoint::RelayEndpoint;
use crate::error::RelayConnectionError;
use crate::message::{ClientMessage, RelayMessage};
use crate::transport::{Connector, RelayLink};
use nostr::{AuthenticationError, Event, Filter, Keys, is_auth_required_error, unix_now};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Why a session operation could not produce a relay answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] RelayConnectionError),

    #[error(transparent)]
    Auth(#[from] AuthenticationError),
}

/// The relay's `OK` for a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: bool,
    pub message: String,
}

enum Collected {
    Events(Vec<Event>),
    Closed(String),
}

pub struct Session {
    relay_url: String,
    link: Box<dyn RelayLink>,
    auth: ChallengeAuthenticator,
}

impl Session {
    pub async fn open(
        connector: &dyn Connector,
        url: &Url,
        config: ChallengeAuthConfig,
    ) -> Result<Self, RelayConnectionError> {
        let link = connector.connect(url).await?;
        let relay_url = url.to_string();
        Ok(Self {
            auth: ChallengeAuthenticator::new(relay_url.clone(), config),
            relay_url,
            link,
        })
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Next message from the relay. Challenges are recorded on the way past.
    async fn recv(&mut self) -> Result<RelayMessage, RelayConnectionError> {
        let message = self.link.recv().await?;
        match &message {
            RelayMessage::Auth { challenge } => self.auth.on_challenge(challenge.clone()),
            RelayMessage::Notice { message } => info!("Notice from {}: {}", self.relay_url, message),
            _ => {}
        }
        Ok(message)
    }

    /// Run a full NIP-42 round: wait for a challenge, answer it, and retry
    /// with backoff on rejection or silence.
    pub async fn authenticate(&mut self, keys: &Keys) -> Result<(), SessionError> {
        self.auth.restart();
        loop {
            if !self.auth.has_challenge() {
                let wait = self.auth.config().challenge_timeout();
                match timeout(wait, self.wait_for_challenge()).await {
                    Ok(received) => received?,
                    Err(_) => {
                        debug!("No auth challenge from {} within {:?}", self.relay_url, wait);
                        return Err(self.auth.on_challenge_timeout().into());
                    }
                }
            }

            let event = self.auth.begin(keys, unix_now())?;
            self.link.send(&ClientMessage::Auth(event.clone())).await?;

            let wait = self.auth.config().response_timeout();
            let step = match timeout(wait, self.wait_for_auth_reply()).await {
                Ok(step) => step?,
                Err(_) => self.auth.on_timeout(),
            };

            match step {
                AuthStep::Authenticated => return Ok(()),
                AuthStep::Retry { delay } => tokio::time::sleep(delay).await,
                AuthStep::Failed(error) => return Err(error.into()),
            }
        }
    }

    async fn wait_for_challenge(&mut self) -> Result<(), RelayConnectionError> {
        while !self.auth.has_challenge() {
            let message = self.recv().await?;
            debug!("Ignoring {:?} from {} while awaiting challenge", message, self.relay_url);
        }
        Ok(())
    }

    async fn wait_for_auth_reply(&mut self) -> Result<AuthStep, RelayConnectionError> {
        loop {
            if let RelayMessage::Ok {
                event_id: id,
                success,
                message,
            } = self.recv().await?
                && let Some(step) = self.auth.on_ok(&id, success, &message)
            {
                return Ok(step);
            }
        }
    }

    async fn ensure_authenticated(
        &mut self,
        keys: Option<&Keys>,
        require_auth: bool,
    ) -> Result<(), SessionError> {
        if require_auth && !self.auth.is_authenticated() {
            let keys = keys.ok_or(AuthenticationError::NoSigningKey)?;
            self.authenticate(keys).await?;
        }
        Ok(())
    }

    /// Send `event` and wait for its `OK`. An `auth-required:` rejection
    /// triggers one authentication and one resend.
    pub async fn publish(
        &mut self,
        event: &Event,
        keys: Option<&Keys>,
        require_auth: bool,
    ) -> Result<PublishAck, SessionError> {
        self.ensure_authenticated(keys, require_auth).await?;

        let ack = self.send_event(event).await?;
        if ack.accepted || !is_auth_required_error(&ack.message) {
            return Ok(ack);
        }

        info!("{} requires auth to publish: {}", self.relay_url, ack.message);
        let keys = keys.ok_or(AuthenticationError::NoSigningKey)?;
        self.authenticate(keys).await?;
        self.send_event(event).await
    }

    async fn send_event(&mut self, event: &Event) -> Result<PublishAck, SessionError> {
        self.link.send(&ClientMessage::Event(event.clone())).await?;
        loop {
            if let RelayMessage::Ok {
                event_id,
                success,
                message,
            } = self.recv().await?
                && event_id == event.id
            {
                return Ok(PublishAck {
                    accepted: success,
                    message,
                });
            }
        }
    }

    /// Fetch stored events matching `filter` (everything up to `EOSE`). A
    /// `CLOSED auth-required:` triggers one authentication and one re-`REQ`.
    pub async fn query(
        &mut self,
        filter: &Filter,
        keys: Option<&Keys>,
        require_auth: bool,
    ) -> Result<Vec<Event>, SessionError> {
        self.ensure_authenticated(keys, require_auth).await?;

        let reason = match self.collect(filter).await? {
            Collected::Events(events) => return Ok(events),
            Collected::Closed(reason) if is_auth_required_error(&reason) => reason,
            Collected::Closed(reason) => return Err(closed_error(reason)),
        };

        info!("{} requires auth to query: {}", self.relay_url, reason);
        let keys = keys.ok_or(AuthenticationError::NoSigningKey)?;
        self.authenticate(keys).await?;
        match self.collect(filter).await? {
            Collected::Events(events) => Ok(events),
            Collected::Closed(reason) => Err(closed_error(reason)),
        }
    }

    async fn collect(&mut self, filter: &Filter) -> Result<Collected, RelayConnectionError> {
        let subscription_id = generate_subscription_id();
        self.link
            .send(&ClientMessage::Req {
                subscription_id: subscription_id.clone(),
                filters: vec![filter.clone()],
            })
            .await?;

        let mut events = Vec::new();
        loop {
            match self.recv().await? {
                RelayMessage::Event {
                    subscription_id: sub,
                    event,
                } if sub == subscription_id => events.push(event),
                RelayMessage::Eose { subscription_id: sub } if sub == subscription_id => {
                    self.link
                        .send(&ClientMessage::Close { subscription_id })
                        .await?;
                    debug!("{} returned {} stored events", self.relay_url, events.len());
                    return Ok(Collected::Events(events));
                }
                RelayMessage::Closed {
                    subscription_id: sub,
                    message,
                } if sub == subscription_id => return Ok(Collected::Closed(message)),
                _ => {}
            }
        }
    }

    pub async fn close(mut self) {
        self.link.close().await;
    }
}

fn closed_error(reason: String) -> SessionError {
    RelayConnectionError::Protocol(format!("subscription closed: {}", reason)).into()
}

/// Short random subscription id.
pub fn generate_subscription_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("q-{}", &id[..12])
}

/// Take the endpoint's idle session or open a new one. The flag is `true`
/// for a reused session.
pub(crate) async fn checkout(
    endpoint: &RelayEndpoint,
    connector: &dyn Connector,
    config: &ChallengeAuthConfig,
) -> Result<(Session, bool), RelayConnectionError> {
    if let Some(session) = endpoint.session.lock().await.take() {
        return Ok((session, true));
    }
    let session = Session::open(connector, endpoint.url(), config.clone()).await?;
    Ok((session, false))
}

/// Return a healthy session to its endpoint. If another task already parked
/// one there, the extra connection is closed.
pub(crate) async fn checkin(endpoint: &RelayEndpoint, session: Session) {
    let mut slot = endpoint.session.lock().await;
    if slot.is_none() {
        *slot = Some(session);
    } else {
        drop(slot);
        session.close().await;
    }
}
