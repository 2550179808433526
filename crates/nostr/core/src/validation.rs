//! Structural validation of signed events.
//!
//! The validator only looks at shape: field lengths and encodings, the
//! timestamp against a drift policy, and tag structure. It never touches the
//! network and never verifies signatures, so callers can reject malformed
//! input before paying for cryptography.

use crate::nip01::{Event, is_lower_hex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// How far into the future `created_at` may be before an event is rejected.
pub const DEFAULT_MAX_FUTURE_DRIFT: u64 = 15 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid encoding for {field}: expected lowercase hex")]
    InvalidEncoding { field: &'static str },

    #[error("created_at {created_at} is more than {max_drift}s ahead of {now}")]
    TimestampOutOfRange {
        created_at: u64,
        now: u64,
        max_drift: u64,
    },

    #[error("invalid tag at index {index}: {reason}")]
    InvalidTag { index: usize, reason: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct EventValidator {
    max_future_drift: u64,
}

impl Default for EventValidator {
    fn default() -> Self {
        Self {
            max_future_drift: DEFAULT_MAX_FUTURE_DRIFT,
        }
    }
}

impl EventValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_future_drift(mut self, seconds: u64) -> Self {
        self.max_future_drift = seconds;
        self
    }

    pub fn max_future_drift(&self) -> u64 {
        self.max_future_drift
    }

    /// Validate against the system clock.
    pub fn validate_now(&self, event: &Event) -> Result<(), ValidationError> {
        self.validate(event, unix_now())
    }

    /// Validate `event` as of `now` (unix seconds).
    pub fn validate(&self, event: &Event, now: u64) -> Result<(), ValidationError> {
        check_hex_field("id", &event.id, 64)?;
        check_hex_field("pubkey", &event.pubkey, 64)?;
        check_hex_field("sig", &event.sig, 128)?;

        if event.created_at > now.saturating_add(self.max_future_drift) {
            return Err(ValidationError::TimestampOutOfRange {
                created_at: event.created_at,
                now,
                max_drift: self.max_future_drift,
            });
        }

        for (index, tag) in event.tags.iter().enumerate() {
            match tag.first() {
                None => {
                    return Err(ValidationError::InvalidTag {
                        index,
                        reason: "tag is empty",
                    });
                }
                Some(name) if name.is_empty() => {
                    return Err(ValidationError::InvalidTag {
                        index,
                        reason: "tag name is empty",
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn check_hex_field(field: &'static str, value: &str, len: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.len() != len {
        return Err(ValidationError::InvalidLength {
            field,
            expected: len,
            actual: value.len(),
        });
    }
    if !is_lower_hex(value, len) {
        return Err(ValidationError::InvalidEncoding { field });
    }
    Ok(())
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
