//! Shared-object registry with LRU idle expiry.
//!
//! The access cache holds long-lived auxiliary objects (credential stores,
//! reusable connections) under opaque string keys. Objects are reference
//! counted by holder: while referenced they are pinned; once idle they join
//! a deadline-ordered list and are disposed when their expiry window runs
//! out. Non-shareable objects admit one holder at a time and queue waiters.
//!
//! The structure is not internally synchronized; owners wanting cross-thread
//! access wrap it in their own mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

use crate::config::AccessCacheConfig;

/// An object that can live in the [`AccessCache`].
pub trait CacheableObject: Send + Sync {
    /// May this object have more than one concurrent holder?
    fn shareable(&self) -> bool;

    /// Is this object eligible for idle-timeout disposal?
    fn expires(&self) -> bool;

    /// Called exactly once when the registry lets go of the object.
    fn dispose(&self) {}

    /// Downcast hook for typed access to stored objects.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared handle to a registered object.
pub type SharedObject = Arc<dyn CacheableObject>;

/// Channel on which a queued [`AccessCache::request_entry`] delivers.
pub type EntryReceiver = oneshot::Receiver<SharedObject>;

// Nodes live in an arena and link the idle list by index, so the map can
// rehash freely without invalidating anything.
struct Node {
    key: String,
    object: SharedObject,
    /// Expiry deadline; only meaningful while the node sits in the idle list.
    deadline: Instant,
    use_count: u32,
    waiters: VecDeque<oneshot::Sender<SharedObject>>,
    older: Option<usize>,
    newer: Option<usize>,
    in_idle_list: bool,
}

/// LRU registry of reference-counted, expirable shared objects.
pub struct AccessCache {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    oldest: Option<usize>,
    newest: Option<usize>,
    config: AccessCacheConfig,
}

impl AccessCache {
    /// Creates an empty registry with default tuning.
    pub fn new() -> Self {
        Self::with_config(AccessCacheConfig::default())
    }

    /// Creates an empty registry with the given tuning.
    pub fn with_config(config: AccessCacheConfig) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            oldest: None,
            newest: None,
            config,
        }
    }

    /// Registers `object` under `key`; the caller holds the first reference.
    ///
    /// Replacing a still-referenced entry is a usage error: the old object is
    /// force-disposed and a warning logged.
    pub fn add_entry(&mut self, key: impl Into<String>, object: SharedObject) {
        let key = key.into();
        if let Some(&slot) = self.index.get(&key) {
            let old = self.nodes[slot].as_ref().map(|n| n.use_count).unwrap_or(0);
            if old > 0 {
                warn!(key, use_count = old, "add_entry over a still-referenced entry");
            }
            self.drop_node(slot);
        }

        let node = Node {
            key: key.clone(),
            object,
            deadline: Instant::now(),
            use_count: 1,
            waiters: VecDeque::new(),
            older: None,
            newer: None,
            in_idle_list: false,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, slot);
    }

    /// O(1) membership check; reference counts and idle order are untouched.
    pub fn has_entry(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Synchronous acquisition.
    ///
    /// Returns `None` when the key is absent, or when the object is
    /// non-shareable and currently held elsewhere.
    pub fn request_entry_now(&mut self, key: &str) -> Option<SharedObject> {
        let slot = *self.index.get(key)?;
        let available = {
            let node = self.nodes[slot].as_ref()?;
            node.use_count == 0 || node.object.shareable()
        };
        if !available {
            return None;
        }
        self.unlink_idle(slot);
        let node = self.nodes[slot].as_mut()?;
        node.use_count += 1;
        Some(Arc::clone(&node.object))
    }

    /// Asynchronous acquisition.
    ///
    /// `None` only when the key is entirely absent. Otherwise the returned
    /// receiver resolves with the object: immediately when it is available,
    /// or FIFO-later when the current exclusive holder releases it. Delivery
    /// through the channel keeps the caller out of re-entrant territory.
    pub fn request_entry(&mut self, key: &str) -> Option<EntryReceiver> {
        let slot = *self.index.get(key)?;
        let (tx, rx) = oneshot::channel();
        let available = {
            let node = self.nodes[slot].as_ref()?;
            node.use_count == 0 || node.object.shareable()
        };
        if available {
            self.unlink_idle(slot);
            let node = self.nodes[slot].as_mut()?;
            node.use_count += 1;
            let _ = tx.send(Arc::clone(&node.object));
        } else {
            self.nodes[slot].as_mut()?.waiters.push_back(tx);
        }
        Some(rx)
    }

    /// Releases one reference on `key`.
    ///
    /// If waiters are queued, ownership is handed to the next live waiter
    /// without the object ever touching the idle list. Otherwise the count
    /// drops; at zero, expirable objects enter the idle list with a fresh
    /// deadline.
    pub fn release_entry(&mut self, key: &str) {
        let Some(&slot) = self.index.get(key) else {
            warn!(key, "release_entry for unknown key");
            return;
        };
        let Some(node) = self.nodes[slot].as_mut() else {
            return;
        };
        if node.use_count == 0 {
            warn!(key, "release_entry without a matching request");
            return;
        }

        // hand off to the next waiter that is still listening
        while let Some(tx) = node.waiters.pop_front() {
            if tx.send(Arc::clone(&node.object)).is_ok() {
                // use_count is transferred to the new holder unchanged
                return;
            }
        }

        node.use_count -= 1;
        if node.use_count == 0 && node.object.expires() {
            let deadline = Instant::now() + self.config.expiry_window;
            self.push_idle(slot, deadline);
        }
    }

    /// Forcibly unregisters and disposes the entry under `key`.
    pub fn remove_entry(&mut self, key: &str) {
        let Some(&slot) = self.index.get(key) else {
            warn!(key, "remove_entry for unknown key");
            return;
        };
        if let Some(node) = self.nodes[slot].as_ref() {
            if node.use_count > 1 {
                warn!(key, use_count = node.use_count, "remove_entry while actively shared");
            }
        }
        self.drop_node(slot);
    }

    /// Disposes every entry unconditionally.
    pub fn clear(&mut self) {
        for slot in 0..self.nodes.len() {
            if self.nodes[slot].is_some() {
                self.drop_node(slot);
            }
        }
        self.oldest = None;
        self.newest = None;
    }

    /// Deadline of the oldest idle entry, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.oldest
            .and_then(|slot| self.nodes[slot].as_ref())
            .map(|n| n.deadline)
    }

    /// Interval until the next timer fire, rounded up to the configured
    /// granularity so clustered deadlines coalesce. `None` when the idle
    /// list is empty.
    pub fn next_timer_interval(&self, now: Instant) -> Option<Duration> {
        let deadline = self.next_deadline()?;
        let raw = deadline.saturating_duration_since(now);
        let gran = self.config.timer_granularity;
        if gran.is_zero() {
            return Some(raw);
        }
        let steps = raw.as_nanos().div_ceil(gran.as_nanos()).max(1);
        Some(gran * steps as u32)
    }

    /// Disposes every idle entry whose deadline has passed; returns how many
    /// were dropped.
    pub fn expire_idle(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(slot) = self.oldest {
            let due = match self.nodes[slot].as_ref() {
                Some(node) => node.deadline <= now,
                None => break,
            };
            if !due {
                break;
            }
            self.drop_node(slot);
            expired += 1;
        }
        expired
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Idle-list keys in expiry order, oldest first. Test and diagnostics
    /// aid; does not touch counts or order.
    pub fn idle_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = self.oldest;
        while let Some(slot) = cursor {
            let Some(node) = self.nodes[slot].as_ref() else {
                break;
            };
            keys.push(node.key.clone());
            cursor = node.newer;
        }
        keys
    }

    fn push_idle(&mut self, slot: usize, deadline: Instant) {
        {
            let node = self.nodes[slot]
                .as_mut()
                .filter(|n| !n.in_idle_list);
            let Some(node) = node else { return };
            node.deadline = deadline;
            node.in_idle_list = true;
            node.older = self.newest;
            node.newer = None;
        }
        if let Some(prev) = self.newest {
            if let Some(prev_node) = self.nodes[prev].as_mut() {
                prev_node.newer = Some(slot);
            }
        }
        self.newest = Some(slot);
        if self.oldest.is_none() {
            self.oldest = Some(slot);
        }
    }

    fn unlink_idle(&mut self, slot: usize) {
        let (older, newer) = match self.nodes[slot].as_mut() {
            Some(node) if node.in_idle_list => {
                node.in_idle_list = false;
                let links = (node.older, node.newer);
                node.older = None;
                node.newer = None;
                links
            }
            _ => return,
        };
        match older {
            Some(o) => {
                if let Some(n) = self.nodes[o].as_mut() {
                    n.newer = newer;
                }
            }
            None => self.oldest = newer,
        }
        match newer {
            Some(n) => {
                if let Some(o) = self.nodes[n].as_mut() {
                    o.older = older;
                }
            }
            None => self.newest = older,
        }
    }

    fn drop_node(&mut self, slot: usize) {
        self.unlink_idle(slot);
        if let Some(node) = self.nodes[slot].take() {
            self.index.remove(&node.key);
            node.object.dispose();
            // queued waiters for a disposed object observe a closed channel
            drop(node.waiters);
            self.free.push(slot);
        }
    }
}

impl Default for AccessCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct TestObject {
        shareable: bool,
        expires: bool,
        disposed: AtomicBool,
    }

    impl TestObject {
        fn new(shareable: bool, expires: bool) -> Arc<Self> {
            Arc::new(Self {
                shareable,
                expires,
                disposed: AtomicBool::new(false),
            })
        }
    }

    impl CacheableObject for TestObject {
        fn shareable(&self) -> bool {
            self.shareable
        }
        fn expires(&self) -> bool {
            self.expires
        }
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn cache_with_window(secs: u64) -> AccessCache {
        AccessCache::with_config(AccessCacheConfig {
            expiry_window: Duration::from_secs(secs),
            timer_granularity: Duration::from_secs(16),
        })
    }

    #[tokio::test]
    async fn idle_list_membership_tracks_use_count() {
        let mut cache = AccessCache::new();
        cache.add_entry("a", TestObject::new(true, true));
        // held by the registrant: not idle
        assert!(cache.idle_keys().is_empty());

        cache.release_entry("a");
        assert_eq!(cache.idle_keys(), vec!["a".to_string()]);

        let obj = cache.request_entry_now("a").unwrap();
        assert!(cache.idle_keys().is_empty());
        drop(obj);
        cache.release_entry("a");
        assert_eq!(cache.idle_keys(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn idle_list_is_ordered_oldest_first() {
        tokio::time::pause();
        let mut cache = cache_with_window(120);
        cache.add_entry("a", TestObject::new(true, true));
        cache.add_entry("b", TestObject::new(true, true));
        cache.release_entry("a");
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.release_entry("b");

        assert_eq!(cache.idle_keys(), vec!["a".to_string(), "b".to_string()]);
        // oldest deadline <= every other deadline
        let oldest = cache.next_deadline().unwrap();
        assert!(oldest <= Instant::now() + Duration::from_secs(121));
    }

    #[tokio::test]
    async fn non_expiring_objects_stay_out_of_idle_list() {
        let mut cache = AccessCache::new();
        cache.add_entry("a", TestObject::new(true, false));
        cache.release_entry("a");
        assert!(cache.idle_keys().is_empty());
        assert!(cache.has_entry("a"));
        // still acquirable
        assert!(cache.request_entry_now("a").is_some());
    }

    #[tokio::test]
    async fn non_shareable_objects_are_exclusive() {
        let mut cache = AccessCache::new();
        cache.add_entry("conn", TestObject::new(false, true));

        // registrant still holds the reference
        assert!(cache.request_entry_now("conn").is_none());
        cache.release_entry("conn");

        let first = cache.request_entry_now("conn").unwrap();
        assert!(cache.request_entry_now("conn").is_none());
        drop(first);
        cache.release_entry("conn");
        assert!(cache.request_entry_now("conn").is_some());
    }

    #[tokio::test]
    async fn shareable_objects_admit_many_holders() {
        let mut cache = AccessCache::new();
        cache.add_entry("auth", TestObject::new(true, false));
        assert!(cache.request_entry_now("auth").is_some());
        assert!(cache.request_entry_now("auth").is_some());
        cache.release_entry("auth");
        cache.release_entry("auth");
        cache.release_entry("auth");
    }

    #[tokio::test]
    async fn queued_waiter_receives_on_release() {
        let mut cache = AccessCache::new();
        cache.add_entry("conn", TestObject::new(false, true));

        // queued behind the registrant's reference
        let rx = cache.request_entry("conn").unwrap();
        cache.release_entry("conn");
        let obj = rx.await.expect("waiter should be served");
        assert!(!obj.shareable());

        // ownership was transferred: still exclusive
        assert!(cache.request_entry_now("conn").is_none());
    }

    #[tokio::test]
    async fn waiters_are_served_fifo_and_dead_waiters_skipped() {
        let mut cache = AccessCache::new();
        cache.add_entry("conn", TestObject::new(false, true));

        let rx1 = cache.request_entry("conn").unwrap();
        let rx2 = cache.request_entry("conn").unwrap();
        drop(rx1); // first waiter went away

        cache.release_entry("conn");
        rx2.await.expect("second waiter should be served");
    }

    #[tokio::test]
    async fn request_entry_for_absent_key_is_refused() {
        let mut cache = AccessCache::new();
        assert!(cache.request_entry("nothing").is_none());
        assert!(cache.request_entry_now("nothing").is_none());
    }

    #[tokio::test]
    async fn available_request_entry_delivers_immediately() {
        let mut cache = AccessCache::new();
        cache.add_entry("auth", TestObject::new(true, false));
        let rx = cache.request_entry("auth").unwrap();
        rx.await.expect("shareable object delivers at once");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_expire_after_window_never_before() {
        let mut cache = cache_with_window(120);
        let obj = TestObject::new(true, true);
        cache.add_entry("a", Arc::clone(&obj) as SharedObject);
        cache.release_entry("a");

        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(cache.expire_idle(Instant::now()), 0);
        assert!(cache.has_entry("a"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.expire_idle(Instant::now()), 1);
        assert!(!cache.has_entry("a"));
        assert!(obj.disposed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_interval_rounds_up_to_granularity() {
        let mut cache = cache_with_window(120);
        cache.add_entry("a", TestObject::new(true, true));
        cache.release_entry("a");

        let interval = cache.next_timer_interval(Instant::now()).unwrap();
        assert_eq!(interval, Duration::from_secs(128)); // 120 rounded up to 16s boundary
        assert!(cache.next_timer_interval(Instant::now() + interval).is_some());
    }

    #[tokio::test]
    async fn replacing_a_referenced_entry_disposes_the_old_object() {
        let mut cache = AccessCache::new();
        let old = TestObject::new(true, true);
        cache.add_entry("k", Arc::clone(&old) as SharedObject);
        cache.add_entry("k", TestObject::new(true, true));
        assert!(old.disposed.load(Ordering::SeqCst));
        assert!(cache.has_entry("k"));
    }

    #[tokio::test]
    async fn release_and_remove_of_absent_keys_are_no_ops() {
        let mut cache = AccessCache::new();
        cache.release_entry("ghost");
        cache.remove_entry("ghost");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_disposes_everything_even_referenced() {
        let mut cache = AccessCache::new();
        let held = TestObject::new(true, true);
        cache.add_entry("held", Arc::clone(&held) as SharedObject);
        cache.add_entry("idle", TestObject::new(true, true));
        cache.release_entry("idle");

        cache.clear();
        assert!(cache.is_empty());
        assert!(held.disposed.load(Ordering::SeqCst));
        assert!(cache.idle_keys().is_empty());
    }

    #[tokio::test]
    async fn lru_invariant_over_random_schedule() {
        // exercise add/request/release sequences and re-check the invariant
        // "in idle list iff use_count == 0" via observable behavior
        let mut cache = cache_with_window(120);
        let counter = AtomicU32::new(0);
        for i in 0..8 {
            cache.add_entry(format!("k{i}"), TestObject::new(true, true));
        }
        for i in 0..8 {
            cache.release_entry(&format!("k{i}"));
        }
        assert_eq!(cache.idle_keys().len(), 8);

        // re-acquire a few and confirm they leave the list
        for i in [1usize, 3, 5] {
            cache.request_entry_now(&format!("k{i}")).unwrap();
            counter.fetch_add(1, Ordering::Relaxed);
        }
        let idle = cache.idle_keys();
        assert_eq!(idle.len(), 5);
        for i in [1usize, 3, 5] {
            assert!(!idle.contains(&format!("k{i}")));
        }

        // release them back; they move to the tail in release order
        for i in [5usize, 3, 1] {
            cache.release_entry(&format!("k{i}"));
        }
        let idle = cache.idle_keys();
        assert_eq!(idle.len(), 8);
        assert_eq!(&idle[5..], &["k5".to_string(), "k3".to_string(), "k1".to_string()]);
    }
}
