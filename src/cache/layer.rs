//! The query cache: read-through fetching, coalescing, and invalidation.
//!
//! Reads are cache-first:
//! 1. fresh entry: served immediately
//! 2. stale entry: served immediately, revalidated in the background
//! 3. missing entry: fetched; concurrent readers attach to the one fetch
//! 4. failed entry: refetched while within the retry budget
//!
//! Writes follow a strict two-phase contract: the write runs first, and
//! only a successful outcome marks affected entries stale. Optimistic
//! writes may edit affected payloads up front and roll back on failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::{CacheConfig, RevalidateMode};

use super::entry::{CacheResult, Entry, EntryStatus, Fetcher};
use super::invalidate::Mutation;
use super::key::QueryKey;

/// Errors surfaced by the cache layer.
///
/// Both variants wrap whatever the underlying transport reported; the
/// caller may retry by re-invoking the operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
  #[error("fetch failed: {0}")]
  FetchFailed(String),
  #[error("mutation failed: {0}")]
  MutationFailed(String),
}

/// Emitted on every visible entry status transition.
#[derive(Debug, Clone)]
pub struct CacheEvent {
  /// Cache hash of the affected key
  pub key: String,
  pub status: EntryStatus,
}

struct Shared {
  entries: Mutex<HashMap<String, Entry>>,
  events: broadcast::Sender<CacheEvent>,
  config: CacheConfig,
}

/// Client-side query cache over a remote collection.
///
/// Cloning is cheap; clones share the same entry map and event channel.
#[derive(Clone)]
pub struct QueryCache {
  shared: Arc<Shared>,
}

/// What a read decided to do, resolved under the entry lock.
enum Plan<T> {
  /// Serve this snapshot as-is
  Serve(CacheResult<T>),
  /// Serve this snapshot now and revalidate in the background
  ServeStale {
    result: CacheResult<T>,
    generation: u64,
  },
  /// This caller owns the fetch and awaits its outcome
  Fetch { generation: u64 },
  /// Another caller's fetch is in flight; wait for its outcome
  Wait,
  /// Nothing to serve
  Fail(CacheError),
}

impl QueryCache {
  /// Create a cache with the given tuning.
  pub fn new(config: CacheConfig) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      shared: Arc::new(Shared {
        entries: Mutex::new(HashMap::new()),
        events,
        config,
      }),
    }
  }

  /// Subscribe to entry status transitions.
  ///
  /// Every transition is broadcast keyed by cache hash; the same channel
  /// is what attaches concurrent readers to an in-flight fetch.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.shared.events.subscribe()
  }

  /// Read through the cache.
  ///
  /// `fetch` crosses the transport boundary and reports errors as strings.
  /// It runs in a spawned task, so a caller that gives up never cancels a
  /// fetch other readers are attached to. The returned snapshot carries
  /// the entry's freshness tag; a stale snapshot means a revalidation is
  /// on its way.
  pub async fn query<T, K, F, Fut>(&self, key: &K, fetch: F) -> Result<CacheResult<T>, CacheError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    K: QueryKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let hash = key.cache_hash();
    let fetcher = erase(fetch);

    match self.plan_read(&hash, key.operation(), &fetcher) {
      Plan::Serve(result) => Ok(result),
      Plan::ServeStale { result, generation } => {
        self.spawn_fetch(&hash, generation, fetcher);
        Ok(result)
      }
      Plan::Fetch { generation } => {
        debug!(key = %key.description(), "fetching");
        self.spawn_fetch(&hash, generation, fetcher);
        self.wait_for(&hash).await
      }
      Plan::Wait => self.wait_for(&hash).await,
      Plan::Fail(err) => Err(err),
    }
  }

  /// Perform a write, then (only if it succeeds) outdate affected entries.
  ///
  /// Strict two-phase: a failed write leaves every entry untouched and
  /// surfaces the transport's error.
  pub async fn mutate<T, M, F, Fut>(&self, mutation: &M, write: F) -> Result<T, CacheError>
  where
    M: Mutation,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, String>>,
  {
    match write().await {
      Ok(output) => {
        self.invalidate(mutation);
        Ok(output)
      }
      Err(message) => Err(CacheError::MutationFailed(message)),
    }
  }

  /// Perform a write with an optimistic cache edit.
  ///
  /// `patch` is applied to every affected entry's payload before the write
  /// runs; if the write fails, patched entries roll back to their
  /// snapshot. That rollback is the only path by which a failed write
  /// changes visible cache state.
  pub async fn mutate_optimistic<T, M, P, F, Fut>(
    &self,
    mutation: &M,
    patch: P,
    write: F,
  ) -> Result<T, CacheError>
  where
    M: Mutation,
    P: Fn(&mut Value),
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, String>>,
  {
    let selectors = mutation.affects();

    let snapshots: Vec<Snapshot> = {
      let mut entries = self.shared.entries();
      let mut snapshots = Vec::new();
      for (hash, entry) in entries.iter_mut() {
        if !selectors.iter().any(|s| s.matches(hash, entry.operation)) {
          continue;
        }
        if let Some(payload) = entry.payload.as_mut() {
          snapshots.push(Snapshot {
            hash: hash.clone(),
            payload: payload.clone(),
            updated_at: entry.updated_at,
          });
          patch(payload);
          self.shared.emit(hash, entry.visible_status());
        }
      }
      snapshots
    };

    match write().await {
      Ok(output) => {
        self.invalidate(mutation);
        Ok(output)
      }
      Err(message) => {
        self.rollback(snapshots);
        Err(CacheError::MutationFailed(message))
      }
    }
  }

  /// Decide how to serve a read. All bookkeeping happens under the entry
  /// lock; nothing here blocks.
  fn plan_read<T>(&self, hash: &str, operation: &'static str, fetcher: &Fetcher) -> Plan<T>
  where
    T: DeserializeOwned,
  {
    let shared = &self.shared;
    let mut entries = shared.entries();

    let entry = match entries.get_mut(hash) {
      Some(entry) => entry,
      None => {
        // First access: create the entry and own its first fetch
        let mut entry = Entry::new(operation);
        entry.fetcher = Some(Arc::clone(fetcher));
        let generation = entry.generation;
        entries.insert(hash.to_string(), entry);
        shared.emit(hash, EntryStatus::Pending);
        return Plan::Fetch { generation };
      }
    };

    // Keep the freshest fetcher for background revalidation
    entry.fetcher = Some(Arc::clone(fetcher));

    // Age-based staleness, when configured, applies on top of
    // mutation-driven invalidation
    if entry.status == EntryStatus::Fresh && self.expired(entry) {
      entry.status = EntryStatus::Stale;
      shared.emit(hash, EntryStatus::Stale);
    }

    match entry.status {
      EntryStatus::Fresh => match decode::<T>(entry) {
        Some(data) => Plan::Serve(CacheResult {
          data,
          status: EntryStatus::Fresh,
          updated_at: entry.updated_at,
        }),
        None => {
          // Undecodable payload: treat as a miss and refetch
          entry.payload = None;
          entry.status = EntryStatus::Pending;
          shared.emit(hash, EntryStatus::Pending);
          Plan::Fetch {
            generation: entry.generation,
          }
        }
      },

      EntryStatus::Stale => {
        let decoded = decode::<T>(entry);
        let updated_at = entry.updated_at;
        let generation = entry.generation;
        // stale -> pending; the payload is retained while revalidating, so
        // the visible status stays stale and no event fires here
        entry.status = EntryStatus::Pending;
        match decoded {
          Some(data) => Plan::ServeStale {
            result: CacheResult {
              data,
              status: EntryStatus::Stale,
              updated_at,
            },
            generation,
          },
          None => {
            entry.payload = None;
            Plan::Fetch { generation }
          }
        }
      }

      EntryStatus::Pending => match decode::<T>(entry) {
        // Revalidation in flight: keep serving the last-known-good value
        Some(data) => Plan::Serve(CacheResult {
          data,
          status: EntryStatus::Stale,
          updated_at: entry.updated_at,
        }),
        None => Plan::Wait,
      },

      EntryStatus::Error => {
        if entry.failures <= shared.config.error_retry_budget {
          let decoded = decode::<T>(entry);
          let updated_at = entry.updated_at;
          let generation = entry.generation;
          entry.status = EntryStatus::Pending;
          shared.emit(hash, entry.visible_status());
          match decoded {
            Some(data) => Plan::ServeStale {
              result: CacheResult {
                data,
                status: EntryStatus::Stale,
                updated_at,
              },
              generation,
            },
            None => Plan::Fetch { generation },
          }
        } else {
          // Budget exhausted: stop touching the transport
          match decode::<T>(entry) {
            Some(data) => Plan::Serve(CacheResult {
              data,
              status: EntryStatus::Error,
              updated_at: entry.updated_at,
            }),
            None => Plan::Fail(CacheError::FetchFailed(
              entry
                .error
                .clone()
                .unwrap_or_else(|| "fetch failed".to_string()),
            )),
          }
        }
      }
    }
  }

  /// Run the fetch in its own task so it survives abandoned callers.
  fn spawn_fetch(&self, hash: &str, generation: u64, fetcher: Fetcher) {
    let shared = Arc::clone(&self.shared);
    let hash = hash.to_string();
    tokio::spawn(async move {
      let result = fetcher().await;
      shared.complete_fetch(&hash, generation, result);
    });
  }

  /// Attach to the in-flight fetch for `hash` and serve its outcome.
  async fn wait_for<T>(&self, hash: &str) -> Result<CacheResult<T>, CacheError>
  where
    T: DeserializeOwned,
  {
    let mut events = self.shared.events.subscribe();
    loop {
      {
        let entries = self.shared.entries();
        let entry = match entries.get(hash) {
          Some(entry) => entry,
          None => {
            return Err(CacheError::FetchFailed("cache entry dropped".to_string()));
          }
        };

        match entry.visible_status() {
          EntryStatus::Pending => {} // still in flight
          EntryStatus::Error if entry.payload.is_none() => {
            return Err(CacheError::FetchFailed(
              entry
                .error
                .clone()
                .unwrap_or_else(|| "fetch failed".to_string()),
            ));
          }
          status => match decode::<T>(entry) {
            Some(data) => {
              return Ok(CacheResult {
                data,
                status,
                updated_at: entry.updated_at,
              });
            }
            None => {
              return Err(CacheError::FetchFailed(
                "cached payload does not match the requested type".to_string(),
              ));
            }
          },
        }
      }

      match events.recv().await {
        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => {
          return Err(CacheError::FetchFailed("cache shut down".to_string()));
        }
      }
    }
  }

  /// Mark every entry matching the mutation's affected-keys relation stale.
  ///
  /// Payloads are retained; readers keep the last-known-good value until a
  /// revalidation lands. In eager mode, revalidation starts immediately
  /// for affected entries that retained a fetcher.
  fn invalidate<M: Mutation>(&self, mutation: &M) {
    let selectors = mutation.affects();
    let eager = self.shared.config.revalidate == RevalidateMode::Eager;
    let mut refetches: Vec<(String, u64, Fetcher)> = Vec::new();

    {
      let mut entries = self.shared.entries();
      for (hash, entry) in entries.iter_mut() {
        if !selectors.iter().any(|s| s.matches(hash, entry.operation)) {
          continue;
        }

        // Any fetch already in flight started under the old generation and
        // will land stale rather than fresh
        entry.generation += 1;

        if entry.status == EntryStatus::Fresh {
          entry.status = EntryStatus::Stale;
          self.shared.emit(hash, EntryStatus::Stale);
        }

        if eager && entry.status == EntryStatus::Stale {
          if let Some(fetcher) = entry.fetcher.clone() {
            entry.status = EntryStatus::Pending; // payload retained
            refetches.push((hash.clone(), entry.generation, fetcher));
          }
        }
      }
    }

    debug!(mutation = mutation.name(), "cache invalidated");
    for (hash, generation, fetcher) in refetches {
      self.spawn_fetch(&hash, generation, fetcher);
    }
  }

  /// Restore optimistic edits after a failed write.
  fn rollback(&self, snapshots: Vec<Snapshot>) {
    let mut entries = self.shared.entries();
    for snapshot in snapshots {
      let entry = match entries.get_mut(&snapshot.hash) {
        Some(entry) => entry,
        None => continue,
      };
      // A fetch that completed meanwhile holds newer data than the snapshot
      if entry.updated_at != snapshot.updated_at {
        continue;
      }
      entry.payload = Some(snapshot.payload);
      self.shared.emit(&snapshot.hash, entry.visible_status());
    }
  }

  /// Whether age-based staleness applies to this entry.
  fn expired(&self, entry: &Entry) -> bool {
    match (self.shared.config.stale_after_secs, entry.updated_at) {
      (Some(secs), Some(updated_at)) => Utc::now() - updated_at > Duration::seconds(secs as i64),
      _ => false,
    }
  }
}

/// Pre-mutation snapshot of an optimistically patched entry.
struct Snapshot {
  hash: String,
  payload: Value,
  updated_at: Option<DateTime<Utc>>,
}

impl Shared {
  fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, key: &str, status: EntryStatus) {
    // Nobody listening is fine
    let _ = self.events.send(CacheEvent {
      key: key.to_string(),
      status,
    });
  }

  /// Store a finished fetch. A mutation that landed while the fetch was in
  /// flight bumped the generation, in which case the data may predate the
  /// write and cannot be reported fresh.
  fn complete_fetch(&self, hash: &str, started_generation: u64, result: Result<Value, String>) {
    let mut entries = self.entries();
    let entry = match entries.get_mut(hash) {
      Some(entry) => entry,
      None => return,
    };

    match result {
      Ok(value) => {
        entry.payload = Some(value);
        entry.updated_at = Some(Utc::now());
        entry.error = None;
        entry.failures = 0;
        entry.status = if entry.generation == started_generation {
          EntryStatus::Fresh
        } else {
          EntryStatus::Stale
        };
      }
      Err(message) => {
        entry.failures += 1;
        entry.error = Some(message);
        entry.status = EntryStatus::Error;
      }
    }
    self.emit(hash, entry.status);
  }
}

/// Decode an entry's payload into the caller's type.
fn decode<T: DeserializeOwned>(entry: &Entry) -> Option<T> {
  entry
    .payload
    .as_ref()
    .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Wrap a typed fetch closure into the type-erased form entries retain.
fn erase<T, F, Fut>(fetch: F) -> Fetcher
where
  T: Serialize + Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, String>> + Send + 'static,
{
  Arc::new(move || {
    let fut = fetch();
    let boxed: BoxFuture<'static, Result<Value, String>> = Box::pin(async move {
      let data = fut.await?;
      serde_json::to_value(&data).map_err(|e| format!("unencodable payload: {e}"))
    });
    boxed
  })
}
