//! Client-side query cache with stale-while-revalidate semantics.
//!
//! This module mirrors remote collection state on the client:
//! - caches query results keyed by a canonical query hash
//! - coalesces concurrent fetches for the same key into one request
//! - marks affected entries stale after successful mutations
//! - optionally applies optimistic updates, rolled back on failure
//! - broadcasts entry status transitions to subscribers

mod entry;
mod invalidate;
mod key;
mod layer;

pub use entry::{CacheResult, EntryStatus};
pub use invalidate::{KeySelector, Mutation};
pub use key::QueryKey;
pub use layer::{CacheError, CacheEvent, QueryCache};
