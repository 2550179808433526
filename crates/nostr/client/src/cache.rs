//! Local event storage: the store trait consulted by queries and an
//! in-memory LRU implementation.

use nostr::{Event, Filter, is_addressable_kind, is_replaceable_kind, sort_events};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Local store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable cache consulted and updated by the query aggregator.
///
/// Calls are blocking; async callers run them on the blocking pool.
pub trait LocalEventStore: Send + Sync {
    /// Events matching `filter`, newest first, truncated to its limit.
    fn find(&self, filter: &Filter) -> StoreResult<Vec<Event>>;

    /// Store every event in `events` as one atomic batch, returning how many
    /// were new.
    fn upsert_batch(&self, events: &[Event]) -> StoreResult<usize>;
}

/// Configuration for the in-memory cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of events to hold before evicting the least recently used
    pub max_events: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_events: 10_000 }
    }
}

/// Event cache with LRU eviction and kind/author/tag indexes.
///
/// Replaceable kinds keep one event per (author, kind); addressable kinds keep
/// one per (author, kind, `d` tag). Older versions are refused.
pub struct EventCache {
    config: CacheConfig,
    events: HashMap<String, Event>,
    /// Event ids in access order, oldest first
    lru: VecDeque<String>,
    by_kind: HashMap<u16, HashSet<String>>,
    by_author: HashMap<String, HashSet<String>>,
    /// tag name -> tag value -> event ids
    by_tag: HashMap<String, HashMap<String, HashSet<String>>>,
    /// (author, kind, d tag) -> current event id; d tag is empty for plain
    /// replaceable kinds
    latest: HashMap<(String, u16, String), String>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            events: HashMap::new(),
            lru: VecDeque::new(),
            by_kind: HashMap::new(),
            by_author: HashMap::new(),
            by_tag: HashMap::new(),
            latest: HashMap::new(),
        }
    }

    /// Insert an event. Returns `true` if it was stored as a new event.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.id) {
            self.touch(&event.id);
            return false;
        }

        if let Some(key) = replacement_key(&event) {
            if let Some(current_id) = self.latest.get(&key).cloned()
                && let Some(current) = self.events.get(&current_id)
            {
                if !supersedes(&event, current) {
                    return false;
                }
                self.remove(&current_id);
            }
            self.latest.insert(key, event.id.clone());
        }

        if self.events.len() >= self.config.max_events.max(1)
            && let Some(oldest) = self.lru.pop_front()
        {
            self.remove(&oldest);
        }

        let id = event.id.clone();
        self.by_kind.entry(event.kind).or_default().insert(id.clone());
        self.by_author
            .entry(event.pubkey.clone())
            .or_default()
            .insert(id.clone());
        for tag in event.tags.iter().filter(|t| t.len() >= 2) {
            self.by_tag
                .entry(tag[0].clone())
                .or_default()
                .entry(tag[1].clone())
                .or_default()
                .insert(id.clone());
        }
        self.lru.push_back(id.clone());
        self.events.insert(id, event);
        true
    }

    pub fn get(&mut self, event_id: &str) -> Option<&Event> {
        if self.events.contains_key(event_id) {
            self.touch(event_id);
        }
        self.events.get(event_id)
    }

    /// Events matching `filter`, newest first, truncated to its limit.
    ///
    /// The narrowest available index picks the candidates; `Filter::matches`
    /// makes the final decision.
    pub fn query(&self, filter: &Filter) -> Vec<Event> {
        let candidates: Box<dyn Iterator<Item = &Event> + '_> = match self.candidate_ids(filter) {
            Some(ids) => Box::new(ids.into_iter().filter_map(|id| self.events.get(id))),
            None => Box::new(self.events.values()),
        };

        let mut found: Vec<Event> = candidates.filter(|e| filter.matches(e)).cloned().collect();
        sort_events(&mut found);
        if let Some(limit) = filter.limit_usize() {
            found.truncate(limit);
        }
        found
    }

    pub fn remove(&mut self, event_id: &str) -> Option<Event> {
        let event = self.events.remove(event_id)?;
        self.lru.retain(|id| id != event_id);

        if let Some(ids) = self.by_kind.get_mut(&event.kind) {
            ids.remove(event_id);
        }
        if let Some(ids) = self.by_author.get_mut(&event.pubkey) {
            ids.remove(event_id);
        }
        for tag in event.tags.iter().filter(|t| t.len() >= 2) {
            if let Some(ids) = self
                .by_tag
                .get_mut(&tag[0])
                .and_then(|values| values.get_mut(&tag[1]))
            {
                ids.remove(event_id);
            }
        }
        if let Some(key) = replacement_key(&event)
            && self.latest.get(&key) == Some(&event.id)
        {
            self.latest.remove(&key);
        }

        Some(event)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn touch(&mut self, event_id: &str) {
        self.lru.retain(|id| id != event_id);
        self.lru.push_back(event_id.to_string());
    }

    /// Smallest index bucket the filter constrains, if any. Prefix-matched
    /// `ids`/`authors` can't use the exact-key indexes.
    fn candidate_ids(&self, filter: &Filter) -> Option<HashSet<&String>> {
        let mut buckets: Vec<HashSet<&String>> = Vec::new();

        if let Some(kinds) = &filter.kinds {
            buckets.push(
                kinds
                    .iter()
                    .filter_map(|k| self.by_kind.get(k))
                    .flatten()
                    .collect(),
            );
        }

        if let Some(authors) = &filter.authors
            && authors.iter().all(|a| a.len() == 64)
        {
            buckets.push(
                authors
                    .iter()
                    .filter_map(|a| self.by_author.get(a))
                    .flatten()
                    .collect(),
            );
        }

        for (key, values) in &filter.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            let index = self.by_tag.get(name);
            buckets.push(
                values
                    .iter()
                    .filter_map(|v| index.and_then(|i| i.get(v)))
                    .flatten()
                    .collect(),
            );
        }

        buckets.into_iter().min_by_key(HashSet::len)
    }
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}

fn replacement_key(event: &Event) -> Option<(String, u16, String)> {
    if is_replaceable_kind(event.kind) {
        Some((event.pubkey.clone(), event.kind, String::new()))
    } else if is_addressable_kind(event.kind) {
        let d = event.first_tag_value("d").unwrap_or_default().to_string();
        Some((event.pubkey.clone(), event.kind, d))
    } else {
        None
    }
}

/// Newer wins; equal timestamps keep the lowest id.
fn supersedes(candidate: &Event, current: &Event) -> bool {
    candidate.created_at > current.created_at
        || (candidate.created_at == current.created_at && candidate.id < current.id)
}

/// Thread-safe [`LocalEventStore`] over an [`EventCache`].
#[derive(Default)]
pub struct InMemoryEventStore {
    cache: Mutex<EventCache>,
}

impl InMemoryEventStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            cache: Mutex::new(EventCache::with_config(config)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl LocalEventStore for InMemoryEventStore {
    fn find(&self, filter: &Filter) -> StoreResult<Vec<Event>> {
        Ok(self.cache.lock().query(filter))
    }

    fn upsert_batch(&self, events: &[Event]) -> StoreResult<usize> {
        // One lock for the whole batch so readers never see half of it.
        let mut cache = self.cache.lock();
        Ok(events
            .iter()
            .filter(|event| cache.insert((*event).clone()))
            .count())
    }
}
