//! Authoritative in-memory user store.
//!
//! This module is the server-side half of the crate:
//! - owns the user collection for the lifetime of the process
//! - enforces field validation and email uniqueness on create
//! - exposes list/create/delete returning typed results or typed errors
//!
//! It has no knowledge of HTTP or any other transport; the boundary layer
//! serializes [`User`] and [`ErrorDescriptor`] records however it likes.

mod error;
mod service;
mod types;

pub use error::{ErrorDescriptor, StoreError};
pub use service::UserStore;
pub use types::{CreateUser, User};
