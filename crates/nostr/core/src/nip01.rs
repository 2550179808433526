//! NIP-01: events, canonical serialization, ids and signatures.
//!
//! The canonical form of an event is the compact JSON array
//! `[0,<pubkey>,<created_at>,<kind>,<tags>,<content>]`. Its UTF-8 bytes are
//! hashed into the event id, and the id digest is what gets signed. The same
//! [`serialize_event`] is used for signing, id computation and verification.

use crate::keys::{self, KeyError, Keys};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// A signed Nostr event.
///
/// Field order here is the wire order (`id, pubkey, created_at, kind, tags,
/// content, sig`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the canonical serialization
    pub id: String,
    /// 32-bytes lowercase hex-encoded x-only public key of the creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// 64-bytes lowercase hex Schnorr signature over `id`
    pub sig: String,
}

/// The signable subset of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Event fields supplied by a caller before signing. The pubkey comes from the
/// signing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    pub fn new(kind: u16, content: impl Into<String>, created_at: u64) -> Self {
        Self {
            created_at,
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    Regular,
    /// Only the latest event per pubkey+kind is kept
    Replaceable,
    Ephemeral,
    /// Only the latest event per pubkey+kind+d-tag is kept
    Addressable,
    Unknown,
}

pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;

impl Event {
    /// The signable subset of this event.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Values of every tag named `name` (second component).
    pub fn tag_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |tag| tag.first().is_some_and(|n| n == name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    /// Recompute the id and check the signature. See [`verify_event`].
    pub fn verify(&self) -> Result<bool, Nip01Error> {
        verify_event(self)
    }
}

/// Serialize an unsigned event into its canonical string.
///
/// Format: `[0,pubkey,created_at,kind,tags,content]` with no whitespace.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    Ok(serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))?)
}

/// Canonical preimage bytes of a signed event.
pub fn canonical_bytes(event: &Event) -> Result<Vec<u8>, Nip01Error> {
    Ok(serialize_event(&event.unsigned())?.into_bytes())
}

/// Raw sha256 digest of the canonical serialization.
pub fn compute_id(event: &UnsignedEvent) -> Result<[u8; 32], Nip01Error> {
    let serialized = serialize_event(event)?;
    Ok(keys::sha256(serialized.as_bytes()))
}

/// Event id as lowercase hex.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    Ok(hex::encode(compute_id(event)?))
}

/// Sign a template, producing an immutable signed event.
pub fn finalize_event(template: &EventTemplate, keys: &Keys) -> Result<Event, Nip01Error> {
    let unsigned = UnsignedEvent {
        pubkey: keys.public_key_hex(),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };

    let digest = compute_id(&unsigned)?;
    let sig = keys.sign_digest(&digest);

    Ok(Event {
        id: hex::encode(digest),
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig,
    })
}

/// Verify an event's id and signature.
///
/// Returns `Ok(false)` when the id does not match the canonical serialization
/// or the signature does not verify. Structurally malformed fields are errors.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    let digest = compute_id(&event.unsigned())?;
    if hex::encode(digest) != event.id {
        return Ok(false);
    }
    Ok(keys::verify_digest(&digest, &event.sig, &event.pubkey)?)
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    match kind {
        1 | 2 | 4..=44 | 1000..=9999 => KindClassification::Regular,
        0 | 3 | 10000..=19999 => KindClassification::Replaceable,
        20000..=29999 => KindClassification::Ephemeral,
        30000..=39999 => KindClassification::Addressable,
        _ => KindClassification::Unknown,
    }
}

pub fn is_replaceable_kind(kind: u16) -> bool {
    classify_kind(kind) == KindClassification::Replaceable
}

pub fn is_addressable_kind(kind: u16) -> bool {
    classify_kind(kind) == KindClassification::Addressable
}

/// Sort events newest first, ties broken by id ascending.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
