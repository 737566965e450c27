//! Core of a resource-management app skeleton: a server-side user store and
//! a client-side query cache, connected only by a wire contract.
//!
//! - [`store`] owns the authoritative in-memory collection and enforces
//!   validation and uniqueness with a typed error taxonomy.
//! - [`cache`] mirrors server responses on the client: it coalesces
//!   concurrent fetches per key, serves stale data while revalidating, and
//!   reconciles entries after writes (with optional optimistic updates).
//! - [`client`] wires the two together the way a frontend data layer wraps
//!   a remote API.
//! - [`config`] tunes cache behavior (staleness window, retry budget,
//!   lazy vs eager revalidation).

pub mod cache;
pub mod client;
pub mod config;
pub mod store;
