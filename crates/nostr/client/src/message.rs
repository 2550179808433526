//! Nostr relay message types.
//!
//! Client to relay: EVENT, REQ, CLOSE, AUTH.
//! Relay to client: EVENT, OK, EOSE, CLOSED, NOTICE, AUTH, COUNT.

use nostr::{Event, Filter};
use serde_json::{Value, json};
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Event),

    /// `["REQ", <subscription_id>, <filter>...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// `["CLOSE", <subscription_id>]`
    Close { subscription_id: String },

    /// `["AUTH", <event>]`
    Auth(Event),
}

impl ClientMessage {
    /// Serialize to the JSON array sent over the wire.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut parts = Vec::with_capacity(filters.len() + 2);
                parts.push(json!("REQ"));
                parts.push(json!(subscription_id));
                for filter in filters {
                    parts.push(serde_json::to_value(filter)?);
                }
                Value::Array(parts)
            }
            ClientMessage::Close { subscription_id } => json!(["CLOSE", subscription_id]),
            ClientMessage::Auth(event) => json!(["AUTH", event]),
        };
        Ok(value.to_string())
    }

    /// Parse a client message (used by relays and test doubles).
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let parts = parse_array(text)?;
        match kind_of(&parts)? {
            "EVENT" => Ok(ClientMessage::Event(event_at(&parts, 1)?)),
            "AUTH" => Ok(ClientMessage::Auth(event_at(&parts, 1)?)),
            "REQ" => {
                let subscription_id = str_at(&parts, 1, "subscription_id")?;
                let filters = parts[2..]
                    .iter()
                    .map(|f| serde_json::from_value(f.clone()))
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(ClientMessage::Close {
                subscription_id: str_at(&parts, 1, "subscription_id")?,
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription_id>, <event>]`
    Event {
        subscription_id: String,
        event: Event,
    },

    /// `["OK", <event_id>, <true|false>, <message>]`
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// `["EOSE", <subscription_id>]`
    Eose { subscription_id: String },

    /// `["CLOSED", <subscription_id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },

    /// `["NOTICE", <message>]`
    Notice { message: String },

    /// `["AUTH", <challenge>]`
    Auth { challenge: String },

    /// `["COUNT", <subscription_id>, {"count": <n>}]`
    Count { subscription_id: String, count: u64 },
}

impl RelayMessage {
    /// Parse a JSON message from the relay.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let parts = parse_array(text)?;
        match kind_of(&parts)? {
            "EVENT" => Ok(RelayMessage::Event {
                subscription_id: str_at(&parts, 1, "subscription_id")?,
                event: event_at(&parts, 2)?,
            }),
            "OK" => {
                let event_id = str_at(&parts, 1, "event_id")?;
                let success = parts
                    .get(2)
                    .ok_or(MessageError::MissingField("success"))?
                    .as_bool()
                    .ok_or_else(|| MessageError::InvalidFormat("success not a boolean".into()))?;
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message: optional_str_at(&parts, 3),
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(&parts, 1, "subscription_id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(&parts, 1, "subscription_id")?,
                message: optional_str_at(&parts, 2),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(&parts, 1, "message")?,
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: str_at(&parts, 1, "challenge")?,
            }),
            "COUNT" => {
                let subscription_id = str_at(&parts, 1, "subscription_id")?;
                let count = parts
                    .get(2)
                    .and_then(|v| v.get("count"))
                    .and_then(Value::as_u64)
                    .ok_or(MessageError::MissingField("count"))?;
                Ok(RelayMessage::Count {
                    subscription_id,
                    count,
                })
            }
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    /// Serialize to the JSON array a relay would send.
    pub fn to_json(&self) -> String {
        let value = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => json!(["OK", event_id, success, message]),
            RelayMessage::Eose { subscription_id } => json!(["EOSE", subscription_id]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            RelayMessage::Notice { message } => json!(["NOTICE", message]),
            RelayMessage::Auth { challenge } => json!(["AUTH", challenge]),
            RelayMessage::Count {
                subscription_id,
                count,
            } => json!(["COUNT", subscription_id, { "count": count }]),
        };
        value.to_string()
    }
}

fn parse_array(text: &str) -> Result<Vec<Value>, MessageError> {
    let parts: Vec<Value> =
        serde_json::from_str(text).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;
    if parts.is_empty() {
        return Err(MessageError::InvalidFormat("empty array".to_string()));
    }
    Ok(parts)
}

fn kind_of(parts: &[Value]) -> Result<&str, MessageError> {
    parts[0]
        .as_str()
        .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))
}

fn str_at(parts: &[Value], index: usize, field: &'static str) -> Result<String, MessageError> {
    parts
        .get(index)
        .ok_or(MessageError::MissingField(field))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}

fn optional_str_at(parts: &[Value], index: usize) -> String {
    parts
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn event_at(parts: &[Value], index: usize) -> Result<Event, MessageError> {
    let value = parts.get(index).ok_or(MessageError::MissingField("event"))?;
    Ok(serde_json::from_value(value.clone())?)
}
