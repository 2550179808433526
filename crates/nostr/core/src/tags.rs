//! Typed views over raw tag arrays.
//!
//! Raw tags are positional string arrays. [`Tag::parse`] maps the common
//! shapes onto variants with explicit optional fields; anything it cannot
//! interpret is kept verbatim in [`Tag::Unknown`]. `Tag::parse(raw).to_vec()`
//! always reproduces `raw` exactly.

/// A parsed tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// `["p", <pubkey>, <relay>?, <petname>?]`
    PubkeyRef {
        pubkey: String,
        relay: Option<String>,
        petname: Option<String>,
    },
    /// `["e", <id>, <relay>?, <marker>?, <author>?]`
    EventRef {
        id: String,
        relay: Option<String>,
        marker: Option<String>,
        author: Option<String>,
    },
    /// `["t", <hashtag>]`
    Hashtag(String),
    /// `["r", <url>, <marker>?]`
    RelayRef { url: String, marker: Option<String> },
    /// `["subject", <text>]`
    Subject(String),
    /// `["d", <identifier>]`
    Identifier(String),
    /// `["relay", <url>]` as used by auth events
    Relay(String),
    /// `["challenge", <nonce>]`
    Challenge(String),
    /// Any other named tag with at least one value.
    Generic { name: String, values: Vec<String> },
    /// Raw components that fit none of the above.
    Unknown(Vec<String>),
}

impl Tag {
    pub fn parse(raw: &[String]) -> Tag {
        let Some((name, values)) = raw.split_first() else {
            return Tag::Unknown(Vec::new());
        };
        let opt = |i: usize| values.get(i).cloned();

        match (name.as_str(), values.len()) {
            ("p", 1..=3) => Tag::PubkeyRef {
                pubkey: values[0].clone(),
                relay: opt(1),
                petname: opt(2),
            },
            ("e", 1..=4) => Tag::EventRef {
                id: values[0].clone(),
                relay: opt(1),
                marker: opt(2),
                author: opt(3),
            },
            ("t", 1) => Tag::Hashtag(values[0].clone()),
            ("r", 1..=2) => Tag::RelayRef {
                url: values[0].clone(),
                marker: opt(1),
            },
            ("subject", 1) => Tag::Subject(values[0].clone()),
            ("d", 1) => Tag::Identifier(values[0].clone()),
            ("relay", 1) => Tag::Relay(values[0].clone()),
            ("challenge", 1) => Tag::Challenge(values[0].clone()),
            ("p" | "e" | "t" | "r" | "subject" | "d" | "relay" | "challenge", _) => {
                Tag::Unknown(raw.to_vec())
            }
            (_, 0) => Tag::Unknown(raw.to_vec()),
            _ => Tag::Generic {
                name: name.clone(),
                values: values.to_vec(),
            },
        }
    }

    pub fn parse_all(tags: &[Vec<String>]) -> Vec<Tag> {
        tags.iter().map(|t| Tag::parse(t)).collect()
    }

    /// Tag name, or `None` for an empty unknown tag.
    pub fn name(&self) -> Option<&str> {
        Some(match self {
            Tag::PubkeyRef { .. } => "p",
            Tag::EventRef { .. } => "e",
            Tag::Hashtag(_) => "t",
            Tag::RelayRef { .. } => "r",
            Tag::Subject(_) => "subject",
            Tag::Identifier(_) => "d",
            Tag::Relay(_) => "relay",
            Tag::Challenge(_) => "challenge",
            Tag::Generic { name, .. } => name,
            Tag::Unknown(raw) => return raw.first().map(String::as_str),
        })
    }

    /// Raw components for the wire.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Tag::PubkeyRef {
                pubkey,
                relay,
                petname,
            } => positional("p", pubkey, &[relay, petname]),
            Tag::EventRef {
                id,
                relay,
                marker,
                author,
            } => positional("e", id, &[relay, marker, author]),
            Tag::Hashtag(value) => vec!["t".to_string(), value.clone()],
            Tag::RelayRef { url, marker } => positional("r", url, &[marker]),
            Tag::Subject(value) => vec!["subject".to_string(), value.clone()],
            Tag::Identifier(value) => vec!["d".to_string(), value.clone()],
            Tag::Relay(url) => vec!["relay".to_string(), url.clone()],
            Tag::Challenge(nonce) => vec!["challenge".to_string(), nonce.clone()],
            Tag::Generic { name, values } => {
                let mut raw = Vec::with_capacity(values.len() + 1);
                raw.push(name.clone());
                raw.extend(values.iter().cloned());
                raw
            }
            Tag::Unknown(raw) => raw.clone(),
        }
    }
}

impl From<Tag> for Vec<String> {
    fn from(tag: Tag) -> Self {
        tag.to_vec()
    }
}

// Trailing `None`s are dropped; an interior `None` becomes "".
fn positional(name: &str, first: &str, rest: &[&Option<String>]) -> Vec<String> {
    let last = rest.iter().rposition(|v| v.is_some()).map_or(0, |i| i + 1);
    let mut raw = vec![name.to_string(), first.to_string()];
    raw.extend(
        rest[..last]
            .iter()
            .map(|v| v.as_deref().unwrap_or_default().to_string()),
    );
    raw
}
