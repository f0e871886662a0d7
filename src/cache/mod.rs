//! TTL cache in front of track search, with in-flight coalescing.
//!
//! Identical queries arriving while a search is outstanding all await one
//! shared future, so the upstream node sees exactly one request per key. The
//! crate [`Error`](crate::error::Error) is `Clone` precisely so those shared
//! futures can hand the same outcome to every waiter.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SearchSource;
use crate::error::Result;
use crate::manager::SearchResult;
use crate::track::Track;

/// How often the background sweep purges expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upstream the cache delegates to; implemented by
/// [`Manager`](crate::manager::Manager).
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    async fn search(&self, query: &str, source: SearchSource) -> Result<SearchResult>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: SearchResult,
    stored_at: Instant,
}

type InFlight = Shared<BoxFuture<'static, Result<SearchResult>>>;

/// Hit/miss counters plus current size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

pub struct SearchCache<B: SearchBackend> {
    backend: Arc<B>,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, InFlight>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn cache_key(source: SearchSource, query: &str) -> String {
    format!("{}:{}", source.name(), query.trim().to_lowercase())
}

impl<B: SearchBackend> SearchCache<B> {
    pub fn new(backend: Arc<B>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolves a query through the cache.
    ///
    /// Fresh entries are served directly; an identical in-flight query is
    /// awaited instead of duplicated; otherwise the backend is asked and the
    /// result stored with a fresh timestamp, empty or not.
    pub async fn fetch(&self, query: &str, source: SearchSource) -> Result<SearchResult> {
        let key = cache_key(source, query);

        if let Some(hit) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let (future, owner) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => (occupied.get().clone(), false),
            Entry::Vacant(vacant) => {
                let backend = self.backend.clone();
                let query = query.to_string();
                let future: InFlight = async move { backend.search(&query, source).await }
                    .boxed()
                    .shared();
                vacant.insert(future.clone());
                (future, true)
            }
        };

        let result = future.await;
        if owner {
            self.in_flight.remove(&key);
            if let Ok(ref value) = result {
                self.entries.insert(
                    key,
                    CacheEntry {
                        result: value.clone(),
                        stored_at: Instant::now(),
                    },
                );
            }
        }
        result
    }

    /// Joins independent fetches for several queries.
    pub async fn batch_fetch(
        &self,
        queries: &[String],
        source: SearchSource,
    ) -> Vec<Result<SearchResult>> {
        futures::future::join_all(queries.iter().map(|query| self.fetch(query, source))).await
    }

    /// Best-effort warmup of keys that are neither cached nor in flight.
    /// Cold keys are fetched concurrently; failures are logged and dropped.
    pub async fn preload(&self, queries: &[String], source: SearchSource) {
        let cold: Vec<&String> = queries
            .iter()
            .filter(|query| {
                let key = cache_key(source, query);
                self.lookup(&key).is_none() && !self.in_flight.contains_key(&key)
            })
            .collect();

        let outcomes =
            futures::future::join_all(cold.iter().map(|query| self.fetch(query.as_str(), source)))
                .await;
        for (query, outcome) in cold.iter().zip(outcomes) {
            if let Err(e) = outcome {
                debug!(query = %query, error = %e, "preload fetch failed");
            }
        }
    }

    /// The best single track for a query, through the cache.
    pub async fn fetch_top_result(
        &self,
        query: &str,
        source: SearchSource,
    ) -> Result<Option<Track>> {
        Ok(self.fetch(query, source).await?.first_track())
    }

    /// Expired entries are evicted on read, never served.
    fn lookup(&self, key: &str) -> Option<SearchResult> {
        let stale = match self.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                return Some(entry.result.clone())
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.entries.remove(key);
        }
        None
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.entries.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Drops every entry and resets the counters.
    pub fn clear_cache(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() <= self.ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "cache sweep evicted expired entries");
        }
    }

    /// Spawns the [`SWEEP_INTERVAL`] sweep; it stops once the cache is
    /// dropped.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.purge_expired();
            }
        })
    }
}
