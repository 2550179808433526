//! Nostr event primitives.
//!
//! This crate provides:
//! - NIP-01: events, canonical serialization, ids, signing and verification
//! - Structural event validation
//! - Typed tag views
//! - NIP-01 filters
//! - NIP-11: Relay Information Document
//! - NIP-13: Proof of Work
//! - NIP-42: Authentication of clients to relays
//! - NIP-98: HTTP Auth
//!
//! Nothing here performs network I/O; see `nostr-client` for relay transports.

mod auth;
mod filter;
mod keys;
mod nip01;
mod nip11;
mod nip13;
mod nip42;
mod nip98;
mod tags;
mod validation;

// Keys and the sign/verify/hash capability
pub use keys::{KeyError, Keys, sha256, verify_digest};

// NIP-01: events and canonical serialization
pub use nip01::{
    Event, EventTemplate, KIND_CONTACTS, KIND_METADATA, KIND_SHORT_TEXT_NOTE, KindClassification,
    Nip01Error, UnsignedEvent, canonical_bytes, classify_kind, compute_id, finalize_event,
    get_event_hash, is_addressable_kind, is_replaceable_kind, serialize_event, sort_events,
    verify_event,
};

// Validation
pub use validation::{DEFAULT_MAX_FUTURE_DRIFT, EventValidator, ValidationError, unix_now};

// Tags and filters
pub use filter::{Filter, FilterError};
pub use tags::Tag;

// NIP-11: Relay Information Document
pub use nip11::{LimitViolation, RELAY_INFO_ACCEPT_HEADER, RelayInformationDocument, RelayLimitation};

// NIP-13: Proof of Work
pub use nip13::{check_pow, get_difficulty};

// Authentication
pub use auth::AuthenticationError;

// NIP-42: Authentication of clients to relays
pub use nip42::{
    AUTH_KIND, AUTH_REQUIRED_PREFIX, CHALLENGE_TAG, MAX_TIME_DIFF, RELAY_TAG, RESTRICTED_PREFIX,
    create_auth_event, create_auth_event_tags, generate_challenge, get_challenge, get_relay_url,
    is_auth_event, is_auth_required_error, is_restricted_error, normalize_relay_url,
    validate_auth_event,
};

// NIP-98: HTTP Auth
pub use nip98::{
    AUTH_SCHEME, DEFAULT_TIMESTAMP_WINDOW, KIND_HTTP_AUTH, RequestAuthenticator,
    build_auth_token, decode_authorization_header, encode_authorization_header, hash_payload,
    http_auth_tags, verify_auth_token,
};
