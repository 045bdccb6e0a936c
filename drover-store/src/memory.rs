//! In-process store backend
//!
//! Keys live in a single map guarded by a `parking_lot` lock, each entry
//! carrying an optional expiry that is checked lazily on access. Every
//! operation, transactions included, runs under the write lock, so the
//! backend is linearizable within one process. It is shared between a
//! processor and its workers only when they run in the same process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::provider::{StoreOp, StoreProvider, Subscription};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Queue(VecDeque<Vec<u8>>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bytes,
    Queue,
    Hash,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Bytes => "string",
            Kind::Queue => "queue",
            Kind::Hash => "hash",
        }
    }
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Value::Bytes(_) => Kind::Bytes,
            Value::Queue(_) => Kind::Queue,
            Value::Hash(_) => Kind::Hash,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

type Entries = HashMap<String, Entry>;

fn wrong_type(key: &str, expected: Kind, actual: Kind) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected: expected.name(),
        actual: actual.name(),
    }
}

/// Drop `key` if it has expired, then return the live entry
fn live<'a>(entries: &'a mut Entries, key: &str) -> Option<&'a mut Entry> {
    if entries
        .get(key)
        .is_some_and(|entry| entry.is_expired(Instant::now()))
    {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn live_kind(entries: &mut Entries, key: &str) -> Option<Kind> {
    live(entries, key).map(|entry| entry.value.kind())
}

fn queue_mut<'a>(
    entries: &'a mut Entries,
    key: &str,
) -> StoreResult<Option<&'a mut VecDeque<Vec<u8>>>> {
    match live(entries, key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Queue(queue),
            ..
        }) => Ok(Some(queue)),
        Some(entry) => Err(wrong_type(key, Kind::Queue, entry.value.kind())),
    }
}

fn hash_mut<'a>(
    entries: &'a mut Entries,
    key: &str,
) -> StoreResult<Option<&'a mut HashMap<String, Vec<u8>>>> {
    match live(entries, key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Hash(hash),
            ..
        }) => Ok(Some(hash)),
        Some(entry) => Err(wrong_type(key, Kind::Hash, entry.value.kind())),
    }
}

fn push(entries: &mut Entries, key: &str, value: &[u8]) -> StoreResult<usize> {
    if let Some(queue) = queue_mut(entries, key)? {
        queue.push_back(value.to_vec());
        return Ok(queue.len());
    }
    let queue = VecDeque::from([value.to_vec()]);
    entries.insert(key.to_string(), Entry::new(Value::Queue(queue), None));
    Ok(1)
}

fn remove_from_queue(entries: &mut Entries, key: &str, value: &[u8]) -> StoreResult<usize> {
    let Some(queue) = queue_mut(entries, key)? else {
        return Ok(0);
    };
    let before = queue.len();
    queue.retain(|item| item != value);
    let removed = before - queue.len();
    if queue.is_empty() {
        entries.remove(key);
    }
    Ok(removed)
}

fn hash_put(entries: &mut Entries, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
    if let Some(hash) = hash_mut(entries, key)? {
        hash.insert(field.to_string(), value.to_vec());
        return Ok(());
    }
    let hash = HashMap::from([(field.to_string(), value.to_vec())]);
    entries.insert(key.to_string(), Entry::new(Value::Hash(hash), None));
    Ok(())
}

fn hash_remove(entries: &mut Entries, key: &str, field: &str) -> StoreResult<bool> {
    let Some(hash) = hash_mut(entries, key)? else {
        return Ok(false);
    };
    let removed = hash.remove(field).is_some();
    if hash.is_empty() {
        entries.remove(key);
    }
    Ok(removed)
}

fn expire(entries: &mut Entries, key: &str, ttl: Duration) -> bool {
    match live(entries, key) {
        Some(entry) => {
            entry.expires_at = Some(Instant::now() + ttl);
            true
        }
        None => false,
    }
}

/// Check every operation against the kinds the keys would have at that
/// point, so a transaction that would fail part-way is rejected untouched.
fn check_transaction(entries: &mut Entries, ops: &[StoreOp]) -> StoreResult<()> {
    let mut planned: HashMap<&str, Option<Kind>> = HashMap::new();

    for op in ops {
        let key = op.key();
        let current = match planned.get(key) {
            Some(kind) => *kind,
            None => live_kind(entries, key),
        };

        let next = match op {
            StoreOp::Set { .. } => Some(Kind::Bytes),
            StoreOp::Delete { .. } => None,
            StoreOp::Expire { .. } => current,
            StoreOp::QueuePush { .. } | StoreOp::QueueRemove { .. } => match current {
                None | Some(Kind::Queue) => Some(Kind::Queue),
                Some(other) => return Err(wrong_type(key, Kind::Queue, other)),
            },
            StoreOp::HashSet { .. } | StoreOp::HashDelete { .. } => match current {
                None | Some(Kind::Hash) => Some(Kind::Hash),
                Some(other) => return Err(wrong_type(key, Kind::Hash, other)),
            },
        };
        planned.insert(key, next);
    }
    Ok(())
}

fn apply(entries: &mut Entries, op: StoreOp) -> StoreResult<()> {
    match op {
        StoreOp::Set { key, value, ttl } => {
            entries.insert(key, Entry::new(Value::Bytes(value), ttl));
        }
        StoreOp::Delete { key } => {
            entries.remove(&key);
        }
        StoreOp::QueuePush { key, value } => {
            push(entries, &key, &value)?;
        }
        StoreOp::QueueRemove { key, value } => {
            remove_from_queue(entries, &key, &value)?;
        }
        StoreOp::HashSet { key, field, value } => hash_put(entries, &key, &field, &value)?,
        StoreOp::HashDelete { key, field } => {
            hash_remove(entries, &key, &field)?;
        }
        StoreOp::Expire { key, ttl } => {
            expire(entries, &key, ttl);
        }
    }
    Ok(())
}

/// Store backend held entirely in process memory
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Entries>,
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of keys that have not expired
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreProvider for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write();
        match live(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(entry) => Err(wrong_type(key, Kind::Bytes, entry.value.kind())),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.entries.write().insert(
            key.to_string(),
            Entry::new(Value::Bytes(value.to_vec()), ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write();
        Ok(live(&mut entries, key).is_some() && entries.remove(key).is_some())
    }

    async fn push_queue(&self, key: &str, value: &[u8]) -> StoreResult<usize> {
        push(&mut self.entries.write(), key, value)
    }

    async fn pop_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write();
        let Some(queue) = queue_mut(&mut entries, key)? else {
            return Ok(None);
        };
        let item = queue.pop_front();
        if queue.is_empty() {
            entries.remove(key);
        }
        Ok(item)
    }

    async fn peek_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write();
        Ok(queue_mut(&mut entries, key)?.and_then(|queue| queue.front().cloned()))
    }

    async fn take_queue_entry(
        &self,
        from: &str,
        value: &[u8],
        to: Option<&str>,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write();
        if let Some(to) = to {
            // a destination of the wrong kind fails before anything moves
            queue_mut(&mut entries, to)?;
        }
        let Some(queue) = queue_mut(&mut entries, from)? else {
            return Ok(false);
        };
        let Some(position) = queue.iter().position(|item| item == value) else {
            return Ok(false);
        };
        queue.remove(position);
        if queue.is_empty() {
            entries.remove(from);
        }
        if let Some(to) = to {
            push(&mut entries, to, value)?;
        }
        Ok(true)
    }

    async fn queue_len(&self, key: &str) -> StoreResult<usize> {
        let mut entries = self.entries.write();
        Ok(queue_mut(&mut entries, key)?.map_or(0, |queue| queue.len()))
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write();
        Ok(hash_mut(&mut entries, key)?.and_then(|hash| hash.get(field).cloned()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        hash_put(&mut self.entries.write(), key, field, value)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        hash_remove(&mut self.entries.write(), key, field)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut entries = self.entries.write();
        Ok(hash_mut(&mut entries, key)?.cloned().unwrap_or_default())
    }

    async fn run_transaction(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        let mut entries = self.entries.write();
        check_transaction(&mut entries, &ops)?;
        let count = ops.len();
        for op in ops {
            apply(&mut entries, op)?;
        }
        debug!("Applied transaction with {} operations", count);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.write();
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry::new(Value::Bytes(value.to_vec()), Some(ttl)),
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        let mut entries = self.entries.write();
        let matches = matches!(
            live(&mut entries, key),
            Some(Entry { value: Value::Bytes(bytes), .. }) if bytes.as_slice() == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn refresh_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write();
        match live(&mut entries, key) {
            Some(entry) if matches!(&entry.value, Value::Bytes(bytes) if bytes.as_slice() == expected) =>
            {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> StoreResult<usize> {
        let mut channels = self.channels.lock();
        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(0);
        };
        subscribers.retain(|sender| sender.send(message.to_vec()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(Subscription::new(channel, receiver))
    }

    async fn server_time_utc(&self) -> StoreResult<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_and_expiry() {
        let store = InMemoryStore::new();
        store.set("a", b"1", None).await.unwrap();
        store
            .set("b", b"2", Some(Duration::from_millis(20)))
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.cleanup_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let store = InMemoryStore::new();
        for item in [b"a", b"b", b"c"] {
            store.push_queue("q", item).await.unwrap();
        }
        assert_eq!(store.queue_len("q").await.unwrap(), 3);
        assert_eq!(store.pop_queue("q").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.pop_queue("q").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.pop_queue("q").await.unwrap(), Some(b"c".to_vec()));
        assert_eq!(store.pop_queue("q").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_take_queue_entry_moves_one_match() {
        let store = InMemoryStore::new();
        for item in [b"a", b"b", b"a"] {
            store.push_queue("q", item).await.unwrap();
        }
        assert_eq!(store.peek_queue("q").await.unwrap(), Some(b"a".to_vec()));

        assert!(store.take_queue_entry("q", b"a", Some("dead")).await.unwrap());
        assert_eq!(store.queue_len("q").await.unwrap(), 2);
        assert_eq!(store.peek_queue("dead").await.unwrap(), Some(b"a".to_vec()));

        assert!(store.take_queue_entry("q", b"b", None).await.unwrap());
        assert!(!store.take_queue_entry("q", b"b", None).await.unwrap());
        assert_eq!(store.pop_queue("q").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.peek_queue("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_into_wrong_type_leaves_source_intact() {
        let store = InMemoryStore::new();
        store.push_queue("q", b"a").await.unwrap();
        store.set("plain", b"v", None).await.unwrap();

        let err = store.take_queue_entry("q", b"a", Some("plain")).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
        assert_eq!(store.queue_len("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = InMemoryStore::new();
        store.set("k", b"v", None).await.unwrap();
        let err = store.push_queue("k", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { expected: "queue", .. }));
    }

    #[tokio::test]
    async fn test_failed_transaction_changes_nothing() {
        let store = InMemoryStore::new();
        store.set("plain", b"v", None).await.unwrap();

        let result = store
            .run_transaction(vec![
                StoreOp::hash_set("h", "f", b"1".to_vec()),
                StoreOp::queue_push("plain", b"x".to_vec()),
            ])
            .await;
        assert!(result.is_err());
        assert!(store.hash_get("h", "f").await.unwrap().is_none());
        assert_eq!(store.get("plain").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_transaction_tracks_kinds_across_steps() {
        let store = InMemoryStore::new();
        store.set("k", b"v", None).await.unwrap();

        store
            .run_transaction(vec![
                StoreOp::delete("k"),
                StoreOp::queue_push("k", b"1".to_vec()),
                StoreOp::queue_push("k", b"2".to_vec()),
                StoreOp::queue_remove("k", b"1".to_vec()),
            ])
            .await
            .unwrap();
        assert_eq!(store.queue_len("k").await.unwrap(), 1);
        assert_eq!(store.pop_queue("k").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.set_if_absent("lock", b"me", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", b"you", ttl).await.unwrap());
        assert!(!store.delete_if_equals("lock", b"you").await.unwrap());
        assert!(store.refresh_if_equals("lock", b"me", ttl).await.unwrap());
        assert!(store.delete_if_equals("lock", b"me").await.unwrap());
        assert!(store.set_if_absent("lock", b"you", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_subscribers() {
        let store = InMemoryStore::new();
        assert_eq!(store.publish("ch", b"lost").await.unwrap(), 0);

        let mut first = store.subscribe("ch").await.unwrap();
        let mut second = store.subscribe("ch").await.unwrap();
        assert_eq!(store.publish("ch", b"hello").await.unwrap(), 2);
        assert_eq!(first.next_message().await, Some(b"hello".to_vec()));
        assert_eq!(second.next_message().await, Some(b"hello".to_vec()));

        drop(second);
        assert_eq!(store.publish("ch", b"again").await.unwrap(), 1);
        assert!(first.try_next_message().is_some());
    }
}
