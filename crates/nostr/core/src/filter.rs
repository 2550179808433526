//! NIP-01 subscription filters.

use crate::nip01::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("since ({since}) is after until ({until})")]
    InvalidRange { since: u64, until: u64 },

    #[error("limit must be positive")]
    ZeroLimit,

    #[error("invalid tag key '{0}': expected '#<name>'")]
    InvalidTagKey(String),
}

/// Query constraints matched against events.
///
/// Absent fields do not constrain. Tag constraints are keyed `#<name>` on the
/// wire and flattened into the filter object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Constrain tag `name` (without the `#`) to one of `values`.
    pub fn tag(mut self, name: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.insert(
            format!("#{}", name),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn hashtags(self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("t", values)
    }

    pub fn pubkey_refs(self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("p", values)
    }

    /// `limit` as a `usize`, saturating.
    pub fn limit_usize(&self) -> Option<usize> {
        self.limit.map(|l| usize::try_from(l).unwrap_or(usize::MAX))
    }

    /// Check the filter's own invariants.
    pub fn validate(&self) -> Result<(), FilterError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(FilterError::InvalidRange { since, until });
        }
        if self.limit == Some(0) {
            return Err(FilterError::ZeroLimit);
        }
        if let Some(key) = self
            .tags
            .keys()
            .find(|k| !k.starts_with('#') || k.len() < 2)
        {
            return Err(FilterError::InvalidTagKey(key.clone()));
        }
        Ok(())
    }

    /// Whether `event` satisfies every constraint.
    ///
    /// `ids` and `authors` match by prefix; `since` and `until` are inclusive.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| event.id.starts_with(id.as_str()))
        {
            return false;
        }

        if let Some(authors) = &self.authors
            && !authors.iter().any(|a| event.pubkey.starts_with(a.as_str()))
        {
            return false;
        }

        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(key, values)| {
            let Some(name) = key.strip_prefix('#') else {
                return true;
            };
            event
                .tag_values(name)
                .any(|value| values.iter().any(|v| v == value))
        })
    }
}
