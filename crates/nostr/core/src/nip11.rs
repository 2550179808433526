//! NIP-11: Relay Information Document.
//!
//! Relays publish a JSON capability document at their HTTP(S) address when
//! asked with `Accept: application/nostr+json`. Unset limits mean unbounded;
//! unset `auth_required` means `false`.

use crate::nip01::Event;
use crate::nip13;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accept header value that selects the information document.
pub const RELAY_INFO_ACCEPT_HEADER: &str = "application/nostr+json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInformationDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Administrative contact pubkey (hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    #[serde(default)]
    pub supported_nips: Vec<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitation: Option<RelayLimitation>,
}

impl RelayInformationDocument {
    pub fn supports_nip(&self, nip: u32) -> bool {
        self.supported_nips.contains(&nip)
    }

    pub fn auth_required(&self) -> bool {
        self.limitation
            .as_ref()
            .is_some_and(RelayLimitation::auth_required)
    }
}

/// Server limitations. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayLimitation {
    /// Maximum websocket message length in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<usize>,

    /// Maximum number of filters per REQ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_filters: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<usize>,

    /// Maximum content length in unicode characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_writes: Option<bool>,

    /// Oldest accepted `created_at`, as seconds before now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_lower_limit: Option<u64>,

    /// Newest accepted `created_at`, as seconds after now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_upper_limit: Option<u64>,
}

/// A published relay limit that an event would exceed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("message length {len} exceeds relay maximum {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("{count} tags exceeds relay maximum {max}")]
    TooManyTags { count: usize, max: usize },

    #[error("content length {len} exceeds relay maximum {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("pow difficulty {difficulty} is below relay minimum {required}")]
    InsufficientPow { difficulty: u32, required: u32 },

    #[error("created_at {created_at} is older than the relay accepts")]
    CreatedAtTooOld { created_at: u64 },

    #[error("created_at {created_at} is further in the future than the relay accepts")]
    CreatedAtTooNew { created_at: u64 },
}

impl RelayLimitation {
    pub fn auth_required(&self) -> bool {
        self.auth_required.unwrap_or(false)
    }

    /// Check `event` against every published limit, returning the first one
    /// it exceeds.
    pub fn check_event(&self, event: &Event, now: u64) -> Result<(), LimitViolation> {
        if let Some(max) = self.max_message_length {
            // Length of `["EVENT",<event>]` on the wire.
            let len = serde_json::to_string(event).map_or(0, |json| json.len() + 10);
            if len > max {
                return Err(LimitViolation::MessageTooLong { len, max });
            }
        }

        if let Some(max) = self.max_event_tags
            && event.tags.len() > max
        {
            return Err(LimitViolation::TooManyTags {
                count: event.tags.len(),
                max,
            });
        }

        if let Some(max) = self.max_content_length {
            let len = event.content.chars().count();
            if len > max {
                return Err(LimitViolation::ContentTooLong { len, max });
            }
        }

        if let Some(required) = self.min_pow_difficulty {
            let difficulty = nip13::get_difficulty(&event.id);
            if difficulty < required {
                return Err(LimitViolation::InsufficientPow {
                    difficulty,
                    required,
                });
            }
        }

        if let Some(lower) = self.created_at_lower_limit
            && event.created_at < now.saturating_sub(lower)
        {
            return Err(LimitViolation::CreatedAtTooOld {
                created_at: event.created_at,
            });
        }

        if let Some(upper) = self.created_at_upper_limit
            && event.created_at > now.saturating_add(upper)
        {
            return Err(LimitViolation::CreatedAtTooNew {
                created_at: event.created_at,
            });
        }

        Ok(())
    }
}
