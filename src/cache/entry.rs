//! Cache entry state and read results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;

/// Freshness status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// A fetch is in flight and no previous payload exists
  Pending,
  /// Payload reflects the last known server state
  Fresh,
  /// Payload is served, but a mutation (or age) has outdated it
  Stale,
  /// The last fetch failed
  Error,
}

/// Type-erased fetcher retained by an entry for revalidation.
///
/// Payloads cross the cache boundary serialized, the same discipline a
/// persistent storage backend would apply; errors cross as the transport's
/// message string.
pub(crate) type Fetcher =
  Arc<dyn Fn() -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Internal per-key cache state.
pub(crate) struct Entry {
  /// Key family, matched by invalidation selectors
  pub operation: &'static str,
  /// Last successfully fetched payload; retained through stale and error
  /// states so readers keep a last-known-good value
  pub payload: Option<Value>,
  pub status: EntryStatus,
  /// Transport error message when the last fetch failed
  pub error: Option<String>,
  /// When the payload was last stored
  pub updated_at: Option<DateTime<Utc>>,
  /// Consecutive failed fetches since the last success
  pub failures: u32,
  /// Bumped by every affecting mutation; a fetch that started under an
  /// older generation cannot complete fresh
  pub generation: u64,
  /// Last fetcher seen for this key, reused for background revalidation
  pub fetcher: Option<Fetcher>,
}

impl Entry {
  pub fn new(operation: &'static str) -> Self {
    Self {
      operation,
      payload: None,
      status: EntryStatus::Pending,
      error: None,
      updated_at: None,
      failures: 0,
      generation: 0,
      fetcher: None,
    }
  }

  /// Status as visible to readers: an entry revalidating an existing
  /// payload reads as stale, not pending.
  pub fn visible_status(&self) -> EntryStatus {
    if self.status == EntryStatus::Pending && self.payload.is_some() {
      EntryStatus::Stale
    } else {
      self.status
    }
  }
}

/// Result of a cache read: the payload plus its freshness tag.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub status: EntryStatus,
  /// When the payload was last stored, if it has ever been fetched
  pub updated_at: Option<DateTime<Utc>>,
}
