//! Authentication error taxonomy shared by challenge (NIP-42) and request
//! (NIP-98) authentication.

use thiserror::Error;

/// Why an authentication attempt or token was refused.
///
/// The variants stay distinct so callers can tell a wrong key from a skewed
/// clock from a token minted for a different endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("no authentication challenge available")]
    MissingChallenge,

    #[error("challenge response rejected: {0}")]
    InvalidChallengeResponse(String),

    #[error("no response to authentication within timeout")]
    ResponseTimeout,

    #[error("token expired: {age}s old, window is {window}s")]
    TokenExpired { age: u64, window: u64 },

    #[error("token created {skew}s in the future")]
    TokenFromFuture { skew: u64 },

    #[error("url mismatch: expected {expected}, got {actual}")]
    TokenUrlMismatch { expected: String, actual: String },

    #[error("method mismatch: expected {expected}, got {actual}")]
    TokenMethodMismatch { expected: String, actual: String },

    #[error("payload hash mismatch: expected {expected}, got {}", .actual.as_deref().unwrap_or("none"))]
    TokenPayloadMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("signature or id does not verify")]
    SignatureInvalid,

    #[error("invalid event kind: expected {expected}, got {actual}")]
    InvalidKind { expected: u16, actual: u16 },

    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("request token refused with http status {status}")]
    TokenRefused { status: u16 },

    #[error("no signing keys configured")]
    NoSigningKey,

    #[error("failed to sign authentication event: {0}")]
    Signing(String),
}
