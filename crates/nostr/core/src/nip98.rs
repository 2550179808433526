//! NIP-98: HTTP Auth
//!
//! Per-request authentication with a short-lived kind 27235 event. The event
//! is tagged with the exact request URL, the uppercase method and, when the
//! request has a body, the hex sha256 of that body. It travels base64-encoded
//! in `Authorization: Nostr <token>`.
//!
//! Tokens are self-contained. Replay protection relies only on the timestamp
//! window, so the window should stay small.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/98.md>

use crate::auth::AuthenticationError;
use crate::keys::{self, Keys};
use crate::nip01::{Event, EventTemplate, finalize_event, verify_event};
use base64::Engine;
use tracing::debug;

/// Event kind for HTTP auth (reference to RFC 7235)
pub const KIND_HTTP_AUTH: u16 = 27235;

/// Authorization scheme for HTTP header
pub const AUTH_SCHEME: &str = "Nostr";

/// Default timestamp window for validation (60 seconds)
pub const DEFAULT_TIMESTAMP_WINDOW: u64 = 60;

pub const URL_TAG: &str = "u";
pub const METHOD_TAG: &str = "method";
pub const PAYLOAD_TAG: &str = "payload";

/// Lowercase hex sha256 of a request body.
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(keys::sha256(payload))
}

/// Tags for a request: `u`, `method` and optionally `payload`.
pub fn http_auth_tags(url: &str, method: &str, payload: Option<&[u8]>) -> Vec<Vec<String>> {
    let mut tags = vec![
        vec![URL_TAG.to_string(), url.to_string()],
        vec![METHOD_TAG.to_string(), method.to_uppercase()],
    ];
    if let Some(body) = payload {
        tags.push(vec![PAYLOAD_TAG.to_string(), hash_payload(body)]);
    }
    tags
}

/// Build and sign a token for a single request.
pub fn build_auth_token(
    keys: &Keys,
    url: &str,
    method: &str,
    payload: Option<&[u8]>,
    now: u64,
) -> Result<Event, AuthenticationError> {
    let template = EventTemplate {
        created_at: now,
        kind: KIND_HTTP_AUTH,
        tags: http_auth_tags(url, method, payload),
        content: String::new(),
    };
    finalize_event(&template, keys).map_err(|e| AuthenticationError::Signing(e.to_string()))
}

/// `Nostr <base64 of the JSON event>`.
pub fn encode_authorization_header(token: &Event) -> Result<String, AuthenticationError> {
    let json =
        serde_json::to_string(token).map_err(|e| AuthenticationError::MalformedToken(e.to_string()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(json.as_bytes());
    Ok(format!("{} {}", AUTH_SCHEME, encoded))
}

/// Parse `Nostr <base64>` back into the token event.
pub fn decode_authorization_header(header: &str) -> Result<Event, AuthenticationError> {
    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| AuthenticationError::MalformedToken("expected 'Nostr <base64>'".into()))?;

    if scheme != AUTH_SCHEME {
        return Err(AuthenticationError::MalformedToken(format!(
            "expected scheme '{}', got '{}'",
            AUTH_SCHEME, scheme
        )));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AuthenticationError::MalformedToken(format!("base64: {}", e)))?;

    serde_json::from_slice(&decoded)
        .map_err(|e| AuthenticationError::MalformedToken(format!("json: {}", e)))
}

/// Verify a token against the request it claims to authorize.
///
/// Checks fail fast in this order:
/// 1. kind is 27235
/// 2. `created_at` lies within `[now - window, now]`
/// 3. `u` tag equals `url` exactly
/// 4. `method` tag equals the uppercased `method`
/// 5. `payload` tag equals the body hash, when a body is present
/// 6. id and signature verify
pub fn verify_auth_token(
    token: &Event,
    url: &str,
    method: &str,
    payload: Option<&[u8]>,
    window: u64,
    now: u64,
) -> Result<(), AuthenticationError> {
    if token.kind != KIND_HTTP_AUTH {
        return Err(AuthenticationError::InvalidKind {
            expected: KIND_HTTP_AUTH,
            actual: token.kind,
        });
    }

    if token.created_at > now {
        return Err(AuthenticationError::TokenFromFuture {
            skew: token.created_at - now,
        });
    }
    let age = now - token.created_at;
    if age > window {
        return Err(AuthenticationError::TokenExpired { age, window });
    }

    let token_url = token
        .first_tag_value(URL_TAG)
        .ok_or(AuthenticationError::MissingTag(URL_TAG))?;
    if token_url != url {
        return Err(AuthenticationError::TokenUrlMismatch {
            expected: url.to_string(),
            actual: token_url.to_string(),
        });
    }

    let expected_method = method.to_uppercase();
    let token_method = token
        .first_tag_value(METHOD_TAG)
        .ok_or(AuthenticationError::MissingTag(METHOD_TAG))?;
    if token_method != expected_method {
        return Err(AuthenticationError::TokenMethodMismatch {
            expected: expected_method,
            actual: token_method.to_string(),
        });
    }

    if let Some(body) = payload {
        let expected = hash_payload(body);
        let actual = token.first_tag_value(PAYLOAD_TAG);
        if actual != Some(expected.as_str()) {
            return Err(AuthenticationError::TokenPayloadMismatch {
                expected,
                actual: actual.map(str::to_string),
            });
        }
    }

    match verify_event(token) {
        Ok(true) => Ok(()),
        Ok(false) => Err(AuthenticationError::SignatureInvalid),
        Err(e) => {
            debug!("token verification error: {}", e);
            Err(AuthenticationError::SignatureInvalid)
        }
    }
}

/// Stateless request authenticator with a configured timestamp window.
#[derive(Debug, Clone, Copy)]
pub struct RequestAuthenticator {
    window: u64,
}

impl Default for RequestAuthenticator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_WINDOW)
    }
}

impl RequestAuthenticator {
    pub fn new(window: u64) -> Self {
        Self { window }
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Build a token and render it as an `Authorization` header value.
    pub fn authorization_header(
        &self,
        keys: &Keys,
        url: &str,
        method: &str,
        payload: Option<&[u8]>,
        now: u64,
    ) -> Result<String, AuthenticationError> {
        let token = build_auth_token(keys, url, method, payload, now)?;
        encode_authorization_header(&token)
    }

    pub fn verify(
        &self,
        token: &Event,
        url: &str,
        method: &str,
        payload: Option<&[u8]>,
        now: u64,
    ) -> Result<(), AuthenticationError> {
        verify_auth_token(token, url, method, payload, self.window, now)
    }

    /// Decode and verify an `Authorization` header, returning the signer's pubkey.
    pub fn verify_header(
        &self,
        header: &str,
        url: &str,
        method: &str,
        payload: Option<&[u8]>,
        now: u64,
    ) -> Result<String, AuthenticationError> {
        let token = decode_authorization_header(header)?;
        self.verify(&token, url, method, payload, now)?;
        Ok(token.pubkey)
    }
}
