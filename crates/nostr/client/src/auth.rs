//! Client side of NIP-42 challenge authentication.
//!
//! [`ChallengeAuthenticator`] is the per-connection state machine. It does no
//! I/O: the session feeds it challenges and `OK` replies and acts on the
//! [`AuthStep`] it returns.

use crate::recovery::BackoffPolicy;
use nostr::{AuthenticationError, Event, Keys, create_auth_event};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Challenge authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeAuthConfig {
    /// Attempts per authentication before giving up
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: BackoffPolicy,
    /// How long to wait for the relay to send a challenge
    pub challenge_timeout_ms: u64,
    /// How long to wait for the relay's `OK` to an auth event
    pub response_timeout_ms: u64,
}

impl Default for ChallengeAuthConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            challenge_timeout_ms: 5_000,
            response_timeout_ms: 5_000,
        }
    }
}

impl ChallengeAuthConfig {
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_millis(self.challenge_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    ChallengeReceived { challenge: String },
    Authenticating { event_id: String, attempt: u32 },
    Authenticated,
    Failed(AuthenticationError),
}

/// What the session should do after an auth reply or timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    Authenticated,
    /// Wait `delay`, then answer the next challenge
    Retry { delay: Duration },
    Failed(AuthenticationError),
}

#[derive(Debug)]
pub struct ChallengeAuthenticator {
    relay_url: String,
    config: ChallengeAuthConfig,
    state: AuthState,
    /// Latest challenge not yet answered. Each attempt consumes it, so a
    /// retry always signs a fresh nonce.
    pending_challenge: Option<String>,
    attempts: u32,
    /// Outcome of the last unsuccessful attempt in this round.
    last_error: Option<AuthenticationError>,
}

impl ChallengeAuthenticator {
    pub fn new(relay_url: impl Into<String>, config: ChallengeAuthConfig) -> Self {
        Self {
            relay_url: relay_url.into(),
            config,
            state: AuthState::Idle,
            pending_challenge: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn has_challenge(&self) -> bool {
        self.pending_challenge.is_some()
    }

    pub fn config(&self) -> &ChallengeAuthConfig {
        &self.config
    }

    /// Record a challenge from the relay. Relays may re-challenge at any
    /// time; the newest nonce replaces any unanswered one.
    pub fn on_challenge(&mut self, challenge: impl Into<String>) {
        let challenge = challenge.into();
        debug!("Auth challenge from {}", self.relay_url);
        self.pending_challenge = Some(challenge.clone());
        if matches!(self.state, AuthState::Idle | AuthState::ChallengeReceived { .. }) {
            self.state = AuthState::ChallengeReceived { challenge };
        }
    }

    /// Start a new authentication round. Clears the outcome of any previous
    /// round but keeps an unanswered challenge.
    pub fn restart(&mut self) {
        self.attempts = 0;
        self.last_error = None;
        self.state = match &self.pending_challenge {
            Some(challenge) => AuthState::ChallengeReceived {
                challenge: challenge.clone(),
            },
            None => AuthState::Idle,
        };
    }

    /// Sign a response to the pending challenge and move to `Authenticating`.
    pub fn begin(&mut self, keys: &Keys, now: u64) -> Result<Event, AuthenticationError> {
        let challenge = self
            .pending_challenge
            .take()
            .ok_or(AuthenticationError::MissingChallenge)?;
        let event = create_auth_event(keys, &self.relay_url, &challenge, now)?;
        self.attempts += 1;
        self.state = AuthState::Authenticating {
            event_id: event.id.clone(),
            attempt: self.attempts,
        };
        Ok(event)
    }

    /// Apply the relay's `OK` for an auth event. Returns `None` when the reply
    /// is not for the event currently awaiting an answer.
    pub fn on_ok(&mut self, event_id: &str, accepted: bool, message: &str) -> Option<AuthStep> {
        let AuthState::Authenticating {
            event_id: expected, ..
        } = &self.state
        else {
            return None;
        };
        if expected != event_id {
            return None;
        }

        if accepted {
            debug!("Authenticated to {}", self.relay_url);
            self.state = AuthState::Authenticated;
            return Some(AuthStep::Authenticated);
        }

        warn!(
            "Auth rejected by {} (attempt {}): {}",
            self.relay_url, self.attempts, message
        );
        Some(self.retry_or_fail(AuthenticationError::InvalidChallengeResponse(
            message.to_string(),
        )))
    }

    /// The relay did not answer the auth event in time.
    pub fn on_timeout(&mut self) -> AuthStep {
        warn!(
            "Auth response from {} timed out (attempt {})",
            self.relay_url, self.attempts
        );
        self.retry_or_fail(AuthenticationError::ResponseTimeout)
    }

    /// No challenge arrived while waiting to answer one. After a rejected or
    /// unanswered attempt the round fails with that attempt's error, since
    /// most relays never re-challenge on the same connection.
    pub fn on_challenge_timeout(&mut self) -> AuthenticationError {
        let error = self
            .last_error
            .take()
            .unwrap_or(AuthenticationError::MissingChallenge);
        self.fail(error)
    }

    /// Fail the round outright.
    pub fn fail(&mut self, error: AuthenticationError) -> AuthenticationError {
        self.state = AuthState::Failed(error.clone());
        error
    }

    fn retry_or_fail(&mut self, error: AuthenticationError) -> AuthStep {
        if self.attempts >= self.config.max_attempts {
            return AuthStep::Failed(self.fail(error));
        }
        self.last_error = Some(error);
        self.state = match &self.pending_challenge {
            Some(challenge) => AuthState::ChallengeReceived {
                challenge: challenge.clone(),
            },
            None => AuthState::Idle,
        };
        AuthStep::Retry {
            delay: self.config.backoff.delay(self.attempts),
        }
    }
}
