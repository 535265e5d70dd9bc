//! In-process coordination store
//!
//! Mirrors the Redis command semantics the core relies on, including key
//! expiry. Time is read from the tokio clock so tests can pause and advance
//! it. Every trait call takes the single state lock once, which makes each
//! call atomic in the same way a single Redis command is.

use async_trait::async_trait;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CoordinationStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    /// Kept sorted by (score, member)
    ZSet(Vec<(f64, String)>),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
}

impl State {
    /// Live entry for `key`, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn live_or_insert(&mut self, key: &str, empty: Value) -> &mut Entry {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.is_expired(now) {
                    *entry = Entry::new(empty);
                }
                entry
            }
            MapEntry::Vacant(vacant) => vacant.insert(Entry::new(empty)),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn parse_int(key: &str, raw: &str) -> StoreResult<i64> {
    raw.parse().map_err(|_| StoreError::NotAnInteger {
        key: key.to_string(),
    })
}

/// Resolve a Redis-style inclusive range against a list length
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Coordination store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn key_count(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state.entries.values().filter(|e| !e.is_expired(now)).count()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.live_or_insert(key, Value::ZSet(Vec::new()));
        let Value::ZSet(items) = &mut entry.value else {
            return Err(wrong_type(key, "zset"));
        };
        items.retain(|(_, m)| m != member);
        let pos = items
            .iter()
            .position(|(s, m)| (*s, m.as_str()) > (score, member))
            .unwrap_or(items.len());
        items.insert(pos, (score, member.to_string()));
        Ok(())
    }

    async fn zpeek_min(&self, key: &str) -> StoreResult<Option<(String, f64)>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::ZSet(items),
                ..
            }) => Ok(items.first().map(|(s, m)| (m.clone(), *s))),
            Some(_) => Err(wrong_type(key, "zset")),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let removed = match state.live(key) {
            None => return Ok(false),
            Some(Entry {
                value: Value::ZSet(items),
                ..
            }) => {
                let before = items.len();
                items.retain(|(_, m)| m != member);
                before != items.len()
            }
            Some(_) => return Err(wrong_type(key, "zset")),
        };
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::ZSet(items),
                ..
            }) => Ok(items.len() as u64),
            Some(_) => Err(wrong_type(key, "zset")),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        let is_string = match state.live(key) {
            None => return Ok(None),
            Some(entry) => matches!(entry.value, Value::Str(_)),
        };
        if !is_string {
            return Err(wrong_type(key, "string"));
        }
        match state.entries.remove(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.state.lock().await.entries.remove(key);
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.live(key) else {
            return Ok(false);
        };
        let Value::Str(current) = &mut entry.value else {
            return Err(wrong_type(key, "string"));
        };
        if current.as_str() != expected {
            return Ok(false);
        }
        *current = new.to_string();
        entry.expires_at = None;
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let entry = state.live_or_insert(key, Value::Str("0".to_string()));
        let Value::Str(raw) = &mut entry.value else {
            return Err(wrong_type(key, "string"));
        };
        let next = parse_int(key, raw)? + delta;
        *raw = next.to_string();
        Ok(next)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let entry = state.live_or_insert(key, Value::Hash(HashMap::new()));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key, "hash"));
        };
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let entry = state.live_or_insert(key, Value::Hash(HashMap::new()));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key, "hash"));
        };
        let current = match hash.get(field) {
            Some(raw) => parse_int(key, raw)?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.live(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.live_or_insert(key, Value::List(VecDeque::new()));
        let Value::List(list) = &mut entry.value else {
            return Err(wrong_type(key, "list"));
        };
        list.push_back(value.to_string());
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as u64),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.live_or_insert(key, Value::Set(BTreeSet::new()));
        let Value::Set(set) = &mut entry.value else {
            return Err(wrong_type(key, "set"));
        };
        set.insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }
}
