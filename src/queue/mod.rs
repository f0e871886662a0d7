//! Per-guild track queue backed by a [`QueueStore`].
//!
//! The queue loads its persisted snapshot lazily and exactly once: the first
//! operation that needs it triggers a single `store.get`, and concurrent
//! callers share that outstanding read. Mutations load before they apply, so
//! a first-op mutation extends the stored queue instead of clobbering it. If
//! a local mutation lands while a load is already in flight, the snapshot is
//! discarded rather than allowed to overwrite newer state (local-write-wins).
//! Every mutation persists synchronously before returning, so durability is
//! exactly as strong as the store's write latency.

pub mod store;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Result;
use crate::track::Track;

pub use store::{KeyValueBackend, KvStoreAdapter, MemoryStore, QueueSnapshot, QueueStore};

/// Cuántos tracks recientes se conservan para "previous".
const HISTORY_CAPACITY: usize = 100;

/// Load phase of the persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Uninit,
    Loading,
    Ready,
}

#[derive(Debug)]
struct QueueInner {
    current: Option<Track>,
    tracks: VecDeque<Track>,
    previous: VecDeque<Track>,
    load_state: LoadState,
    /// Set when a local mutation happens before the initial load completes;
    /// the loader then discards its (stale) snapshot.
    modified: bool,
}

/// Ordered pending-track list plus one "current" track for a guild.
pub struct Queue {
    guild_id: String,
    store: Arc<dyn QueueStore>,
    inner: Mutex<QueueInner>,
    load_gate: Notify,
}

impl Queue {
    pub fn new(guild_id: impl Into<String>, store: Arc<dyn QueueStore>) -> Self {
        Self {
            guild_id: guild_id.into(),
            store,
            inner: Mutex::new(QueueInner {
                current: None,
                tracks: VecDeque::new(),
                previous: VecDeque::new(),
                load_state: LoadState::Uninit,
                modified: false,
            }),
            load_gate: Notify::new(),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.lock().load_state
    }

    /// Loads the persisted snapshot at most once; concurrent callers await
    /// the same outstanding read. Load failures are logged and treated as an
    /// empty queue, never surfaced to callers.
    pub async fn ensure_loaded(&self) {
        let is_loader = {
            let mut inner = self.inner.lock();
            match inner.load_state {
                LoadState::Ready => return,
                LoadState::Loading => false,
                LoadState::Uninit => {
                    inner.load_state = LoadState::Loading;
                    true
                }
            }
        };

        if is_loader {
            let loaded = self.store.get(&self.guild_id).await;
            {
                let mut inner = self.inner.lock();
                if inner.modified {
                    debug!(guild_id = %self.guild_id, "queue mutated during load, discarding stale snapshot");
                } else {
                    match loaded {
                        Ok(Some(snapshot)) => {
                            inner.current = snapshot.current;
                            inner.tracks = snapshot.tracks.into();
                            inner.previous = snapshot.previous.into();
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(guild_id = %self.guild_id, error = %e, "queue load failed, starting empty");
                        }
                    }
                }
                inner.load_state = LoadState::Ready;
            }
            self.load_gate.notify_waiters();
        } else {
            loop {
                let notified = self.load_gate.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inner.lock().load_state == LoadState::Ready {
                    return;
                }
                notified.await;
            }
        }
    }

    /// Appends tracks to the tail and persists.
    pub async fn add(&self, tracks: impl IntoIterator<Item = Track>) -> Result<()> {
        self.begin_mutation().await;
        {
            let mut inner = self.inner.lock();
            inner.tracks.extend(tracks);
        }
        self.persist().await
    }

    /// Removes and returns the track at `index`, if any.
    pub async fn remove(&self, index: usize) -> Result<Option<Track>> {
        self.begin_mutation().await;
        let removed = {
            let mut inner = self.inner.lock();
            inner.tracks.remove(index)
        };
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Drops all pending tracks (current is untouched).
    pub async fn clear(&self) -> Result<()> {
        self.begin_mutation().await;
        {
            let mut inner = self.inner.lock();
            inner.tracks.clear();
        }
        self.persist().await
    }

    /// Drops everything: pending tracks, current and history.
    pub async fn reset(&self) -> Result<()> {
        self.begin_mutation().await;
        {
            let mut inner = self.inner.lock();
            inner.tracks.clear();
            inner.current = None;
            inner.previous.clear();
        }
        self.persist().await
    }

    /// Mezcla los tracks pendientes.
    pub async fn shuffle(&self) -> Result<()> {
        self.begin_mutation().await;
        {
            let mut inner = self.inner.lock();
            let mut rng = rand::thread_rng();
            inner.tracks.make_contiguous().shuffle(&mut rng);
        }
        self.persist().await
    }

    /// Replaces the current track, pushing the old one into history.
    pub async fn set_current(&self, track: Option<Track>) -> Result<()> {
        self.begin_mutation().await;
        {
            let mut inner = self.inner.lock();
            Self::promote(&mut inner, track);
        }
        self.persist().await
    }

    /// Pops the queue head and promotes it to current; `None` when empty.
    pub async fn next(&self) -> Result<Option<Track>> {
        self.begin_mutation().await;
        let next = {
            let mut inner = self.inner.lock();
            match inner.tracks.pop_front() {
                Some(track) => {
                    Self::promote(&mut inner, Some(track.clone()));
                    Some(track)
                }
                None => None,
            }
        };
        if next.is_some() {
            self.persist().await?;
        }
        Ok(next)
    }

    /// Discards indices `[0, index]` and promotes the track at `index`.
    pub async fn skip_to(&self, index: usize) -> Result<Option<Track>> {
        self.begin_mutation().await;
        let skipped = {
            let mut inner = self.inner.lock();
            if index >= inner.tracks.len() {
                None
            } else {
                let mut last = None;
                for _ in 0..=index {
                    last = inner.tracks.pop_front();
                }
                Self::promote(&mut inner, last.clone());
                last
            }
        };
        if skipped.is_some() {
            self.persist().await?;
        }
        Ok(skipped)
    }

    // --- Lecturas en memoria ---

    pub fn current(&self) -> Option<Track> {
        self.inner.lock().current.clone()
    }

    pub fn get(&self, index: usize) -> Option<Track> {
        self.inner.lock().tracks.get(index).cloned()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.inner.lock().tracks.iter().cloned().collect()
    }

    pub fn previous(&self) -> Vec<Track> {
        self.inner.lock().previous.iter().cloned().collect()
    }

    /// Number of pending tracks.
    pub fn size(&self) -> usize {
        self.inner.lock().tracks.len()
    }

    /// Pending tracks plus the current one.
    pub fn total_size(&self) -> usize {
        let inner = self.inner.lock();
        inner.tracks.len() + usize::from(inner.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.tracks.is_empty() && inner.current.is_none()
    }

    /// Total playtime of current plus pending tracks.
    pub fn duration(&self) -> Duration {
        let inner = self.inner.lock();
        let pending: u64 = inner.tracks.iter().map(|t| t.info.length).sum();
        let current = inner.current.as_ref().map_or(0, |t| t.info.length);
        Duration::from_millis(pending + current)
    }

    // --- Private helpers ---

    /// Brings the persisted snapshot in before mutating, so a first-op
    /// mutation extends the stored queue instead of replacing it. A mutation
    /// that races an already outstanding load proceeds immediately and flags
    /// the loader to discard its stale snapshot.
    async fn begin_mutation(&self) {
        {
            let mut inner = self.inner.lock();
            match inner.load_state {
                LoadState::Ready => return,
                LoadState::Loading => {
                    inner.modified = true;
                    return;
                }
                LoadState::Uninit => {}
            }
        }
        self.ensure_loaded().await;
    }

    fn promote(inner: &mut QueueInner, track: Option<Track>) {
        if let Some(old) = inner.current.take() {
            inner.previous.push_back(old);
            while inner.previous.len() > HISTORY_CAPACITY {
                inner.previous.pop_front();
            }
        }
        inner.current = track;
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = {
            let inner = self.inner.lock();
            QueueSnapshot {
                current: inner.current.clone(),
                tracks: inner.tracks.iter().cloned().collect(),
                previous: inner.previous.iter().cloned().collect(),
            }
        };
        self.store.set(&self.guild_id, snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::track::test_support::track;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store stub whose `get` blocks until released, for load-race tests.
    #[derive(Default)]
    struct GatedStore {
        release: Notify,
        gate_reads: bool,
        get_calls: AtomicU32,
        snapshot: Mutex<Option<QueueSnapshot>>,
        saved: Mutex<Option<QueueSnapshot>>,
    }

    impl GatedStore {
        fn with_snapshot(snapshot: QueueSnapshot) -> Self {
            Self {
                gate_reads: true,
                snapshot: Mutex::new(Some(snapshot)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl QueueStore for GatedStore {
        async fn get(&self, _guild_id: &str) -> Result<Option<QueueSnapshot>> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.gate_reads {
                self.release.notified().await;
            }
            Ok(self.snapshot.lock().clone())
        }

        async fn set(&self, _guild_id: &str, snapshot: QueueSnapshot) -> Result<()> {
            *self.saved.lock() = Some(snapshot);
            Ok(())
        }

        async fn delete(&self, _guild_id: &str) -> Result<()> {
            Ok(())
        }

        async fn has(&self, _guild_id: &str) -> Result<bool> {
            Ok(self.saved.lock().is_some())
        }
    }

    fn queue_with(store: Arc<dyn QueueStore>) -> Arc<Queue> {
        Arc::new(Queue::new("guild-1", store))
    }

    #[tokio::test]
    async fn test_add_then_next_returns_track() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue.add([track("a", "A", "Artist")]).await.unwrap();

        let next = queue.next().await.unwrap().unwrap();
        assert_eq!(next.identifier(), "a");
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.current().unwrap().identifier(), "a");
    }

    #[tokio::test]
    async fn test_next_drains_in_order() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue
            .add([
                track("a", "A", "x"),
                track("b", "B", "x"),
                track("c", "C", "x"),
            ])
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(queue.next().await.unwrap().unwrap().identifier().to_string());
        }
        assert_eq!(seen, ["a", "b", "c"]);
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.current().unwrap().identifier(), "c");
        assert!(queue.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skip_to_discards_leading_tracks() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue
            .add([
                track("a", "A", "x"),
                track("b", "B", "x"),
                track("c", "C", "x"),
                track("d", "D", "x"),
            ])
            .await
            .unwrap();

        let promoted = queue.skip_to(2).await.unwrap().unwrap();
        assert_eq!(promoted.identifier(), "c");
        assert_eq!(queue.current().unwrap().identifier(), "c");
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.get(0).unwrap().identifier(), "d");

        assert!(queue.skip_to(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        for i in 0..(HISTORY_CAPACITY + 5) {
            let id = format!("t{i}");
            queue
                .set_current(Some(track(&id, &id, "x")))
                .await
                .unwrap();
        }

        let previous = queue.previous();
        assert_eq!(previous.len(), HISTORY_CAPACITY);
        // t0..t4 evicted oldest-first.
        assert_eq!(previous[0].identifier(), "t5");
    }

    #[tokio::test]
    async fn test_concurrent_first_reads_trigger_one_get() {
        let store = Arc::new(GatedStore::with_snapshot(QueueSnapshot {
            current: None,
            tracks: vec![track("persisted", "P", "x")],
            previous: Vec::new(),
        }));
        let queue = queue_with(store.clone());

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.ensure_loaded().await }
        });
        let second = tokio::spawn({
            let queue = queue.clone();
            async move { queue.ensure_loaded().await }
        });

        // Let both callers reach the gate, then release the read.
        tokio::task::yield_now().await;
        store.release.notify_waiters();

        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.load_state(), LoadState::Ready);
    }

    #[tokio::test]
    async fn test_first_mutation_extends_persisted_snapshot() {
        // Store already holds one track; an `add` as the very first
        // operation must load it before appending, not overwrite it.
        let store = Arc::new(GatedStore {
            snapshot: Mutex::new(Some(QueueSnapshot {
                current: None,
                tracks: vec![track("persisted", "P", "x")],
                previous: Vec::new(),
            })),
            ..GatedStore::default()
        });
        let queue = queue_with(store.clone());

        queue.add([track("fresh", "New", "x")]).await.unwrap();

        assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.get(0).unwrap().identifier(), "persisted");
        assert_eq!(queue.get(1).unwrap().identifier(), "fresh");

        let saved = store.saved.lock().clone().unwrap();
        let ids: Vec<&str> = saved.tracks.iter().map(|t| t.identifier()).collect();
        assert_eq!(ids, ["persisted", "fresh"]);
    }

    #[tokio::test]
    async fn test_mutation_before_load_wins_over_snapshot() {
        let store = Arc::new(GatedStore::with_snapshot(QueueSnapshot {
            current: Some(track("stale-current", "Old", "x")),
            tracks: vec![track("stale", "Old", "x")],
            previous: Vec::new(),
        }));
        let queue = queue_with(store.clone());

        let loader = tokio::spawn({
            let queue = queue.clone();
            async move { queue.ensure_loaded().await }
        });
        tokio::task::yield_now().await;

        // Mutate while the load is still outstanding.
        queue.add([track("fresh", "New", "x")]).await.unwrap();

        store.release.notify_waiters();
        loader.await.unwrap();

        assert_eq!(queue.size(), 1);
        assert_eq!(queue.get(0).unwrap().identifier(), "fresh");
        assert!(queue.current().is_none());
    }

    #[tokio::test]
    async fn test_repeated_loads_hit_the_store_once() {
        let mut mock = store::MockQueueStore::new();
        mock.expect_get().times(1).returning(|_| Ok(None));
        mock.expect_set().returning(|_, _| Ok(()));

        let queue = queue_with(Arc::new(mock));
        queue.ensure_loaded().await;
        queue.ensure_loaded().await;
        queue.add([track("a", "A", "x")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_failure_treated_as_empty() {
        struct FailingStore;

        #[async_trait]
        impl QueueStore for FailingStore {
            async fn get(&self, _: &str) -> Result<Option<QueueSnapshot>> {
                Err(Error::Store("backend offline".to_string()))
            }
            async fn set(&self, _: &str, _: QueueSnapshot) -> Result<()> {
                Ok(())
            }
            async fn delete(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn has(&self, _: &str) -> Result<bool> {
                Ok(false)
            }
        }

        let queue = queue_with(Arc::new(FailingStore));
        queue.ensure_loaded().await;
        assert!(queue.is_empty());
        assert_eq!(queue.load_state(), LoadState::Ready);
    }

    #[tokio::test]
    async fn test_mutations_persist_before_returning() {
        let store = Arc::new(GatedStore::default());
        let queue = queue_with(store.clone());

        queue.add([track("a", "A", "x")]).await.unwrap();
        let saved = store.saved.lock().clone().unwrap();
        assert_eq!(saved.tracks.len(), 1);

        queue.next().await.unwrap();
        let saved = store.saved.lock().clone().unwrap();
        assert!(saved.tracks.is_empty());
        assert_eq!(saved.current.unwrap().identifier(), "a");
    }

    #[tokio::test]
    async fn test_shuffle_keeps_contents() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue
            .add((0..20).map(|i| track(&format!("t{i}"), "T", "x")))
            .await
            .unwrap();

        queue.shuffle().await.unwrap();
        assert_eq!(queue.size(), 20);

        let mut ids: Vec<String> = queue
            .tracks()
            .iter()
            .map(|t| t.identifier().to_string())
            .collect();
        ids.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }
}
