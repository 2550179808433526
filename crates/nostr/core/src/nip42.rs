//! NIP-42: Authentication of clients to relays.
//!
//! A relay sends `["AUTH", <challenge>]`; the client answers with
//! `["AUTH", <event>]` where the event is kind 22242 and carries
//! `["relay", <url>]` and `["challenge", <challenge>]` tags. The relay replies
//! with an `OK` for that event id.

use crate::auth::AuthenticationError;
use crate::keys::Keys;
use crate::nip01::{Event, EventTemplate, finalize_event, verify_event};
use crate::tags::Tag;
use rand::RngCore;

pub const AUTH_KIND: u16 = 22242;
pub const RELAY_TAG: &str = "relay";
pub const CHALLENGE_TAG: &str = "challenge";

/// Prefix of OK/CLOSED messages that ask the client to authenticate.
pub const AUTH_REQUIRED_PREFIX: &str = "auth-required:";
/// Prefix of OK/CLOSED messages refusing an authenticated client.
pub const RESTRICTED_PREFIX: &str = "restricted:";

/// Maximum distance between an auth event's `created_at` and the relay clock.
pub const MAX_TIME_DIFF: u64 = 600;

pub fn create_auth_event_tags(relay_url: &str, challenge: &str) -> Vec<Vec<String>> {
    vec![
        Tag::Relay(relay_url.to_string()).to_vec(),
        Tag::Challenge(challenge.to_string()).to_vec(),
    ]
}

/// Build and sign a fresh auth event for `challenge`.
pub fn create_auth_event(
    keys: &Keys,
    relay_url: &str,
    challenge: &str,
    created_at: u64,
) -> Result<Event, AuthenticationError> {
    let template = EventTemplate {
        created_at,
        kind: AUTH_KIND,
        tags: create_auth_event_tags(relay_url, challenge),
        content: String::new(),
    };
    finalize_event(&template, keys).map_err(|e| AuthenticationError::Signing(e.to_string()))
}

pub fn is_auth_event(event: &Event) -> bool {
    event.kind == AUTH_KIND
}

pub fn get_challenge(event: &Event) -> Option<&str> {
    event.first_tag_value(CHALLENGE_TAG)
}

pub fn get_relay_url(event: &Event) -> Option<&str> {
    event.first_tag_value(RELAY_TAG)
}

/// Whether a relay OK/CLOSED message asks for authentication.
pub fn is_auth_required_error(message: &str) -> bool {
    message.starts_with(AUTH_REQUIRED_PREFIX)
}

pub fn is_restricted_error(message: &str) -> bool {
    message.starts_with(RESTRICTED_PREFIX)
}

/// Normalize a relay URL for comparison: trimmed, lowercase, no trailing '/'.
pub fn normalize_relay_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Random 16-byte hex challenge, as a relay would issue.
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Relay-side check of an auth event against the challenge it issued.
pub fn validate_auth_event(
    event: &Event,
    relay_url: &str,
    challenge: &str,
    now: u64,
) -> Result<(), AuthenticationError> {
    if event.kind != AUTH_KIND {
        return Err(AuthenticationError::InvalidKind {
            expected: AUTH_KIND,
            actual: event.kind,
        });
    }

    if event.created_at > now + MAX_TIME_DIFF {
        return Err(AuthenticationError::TokenFromFuture {
            skew: event.created_at - now,
        });
    }
    if now > event.created_at + MAX_TIME_DIFF {
        return Err(AuthenticationError::TokenExpired {
            age: now - event.created_at,
            window: MAX_TIME_DIFF,
        });
    }

    let tagged_relay = get_relay_url(event).ok_or(AuthenticationError::MissingTag(RELAY_TAG))?;
    if normalize_relay_url(tagged_relay) != normalize_relay_url(relay_url) {
        return Err(AuthenticationError::TokenUrlMismatch {
            expected: relay_url.to_string(),
            actual: tagged_relay.to_string(),
        });
    }

    let tagged_challenge =
        get_challenge(event).ok_or(AuthenticationError::MissingTag(CHALLENGE_TAG))?;
    if tagged_challenge != challenge {
        return Err(AuthenticationError::InvalidChallengeResponse(
            "challenge does not match".to_string(),
        ));
    }

    match verify_event(event) {
        Ok(true) => Ok(()),
        _ => Err(AuthenticationError::SignatureInvalid),
    }
}
