//! The user store: sole authority over the user collection.

use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::error::StoreError;
use super::types::{CreateUser, User};

/// In-memory user collection, insertion order preserved.
///
/// The collection lives for the lifetime of the process. Writers hold the
/// write lock across their whole check-then-act sequence, so the uniqueness
/// check in [`create`](UserStore::create) and the existence check in
/// [`delete`](UserStore::delete) are atomic with the mutation that follows.
/// Readers share the read lock and never observe a partial write.
pub struct UserStore {
  users: RwLock<Vec<User>>,
}

impl UserStore {
  /// Create an empty store.
  pub fn new() -> Self {
    Self {
      users: RwLock::new(Vec::new()),
    }
  }

  /// Snapshot of all users in insertion order.
  ///
  /// An empty collection returns an empty vec, never an error.
  pub fn list(&self) -> Vec<User> {
    let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
    users.clone()
  }

  /// Validate and append a new user.
  ///
  /// Inputs are trimmed before validation. The email must be shaped like
  /// an address (local part, `@`, dotted domain) and unique within the
  /// collection, compared case-insensitively.
  pub fn create(&self, input: CreateUser) -> Result<User, StoreError> {
    let name = input.name.trim().to_string();
    let email = input.email.trim().to_string();

    if name.is_empty() {
      return Err(StoreError::Validation {
        field: "name",
        reason: "must not be empty".to_string(),
      });
    }
    validate_email(&email)?;

    // Uniqueness check and append under one write lock
    let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
    if users.iter().any(|u| u.email.eq_ignore_ascii_case(&email)) {
      return Err(StoreError::DuplicateKey(email));
    }

    let user = User {
      id: Uuid::new_v4().to_string(),
      name,
      email,
      created_at: Utc::now(),
    };
    users.push(user.clone());
    debug!(id = %user.id, "user created");

    Ok(user)
  }

  /// Remove the user with the given id, closing the gap.
  ///
  /// Deleting an absent id fails with [`StoreError::NotFound`]; a second
  /// delete of the same id is a failure, not a no-op success.
  pub fn delete(&self, id: &str) -> Result<User, StoreError> {
    let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
    let position = users
      .iter()
      .position(|u| u.id == id)
      .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let user = users.remove(position);
    debug!(id = %user.id, "user deleted");

    Ok(user)
  }
}

impl Default for UserStore {
  fn default() -> Self {
    Self::new()
  }
}

/// Check that an email is shaped like `local@domain.tld`.
fn validate_email(email: &str) -> Result<(), StoreError> {
  let fail = |reason: &str| StoreError::Validation {
    field: "email",
    reason: reason.to_string(),
  };

  if email.is_empty() {
    return Err(fail("must not be empty"));
  }

  let (local, domain) = email.split_once('@').ok_or_else(|| fail("missing @"))?;
  if local.is_empty() || domain.contains('@') {
    return Err(fail("malformed address"));
  }
  if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
    return Err(fail("missing domain segment"));
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  fn input(name: &str, email: &str) -> CreateUser {
    CreateUser {
      name: name.to_string(),
      email: email.to_string(),
    }
  }

  #[test]
  fn test_create_assigns_id_and_timestamp() {
    let store = UserStore::new();
    let user = store.create(input("Ann", "ann@example.com")).unwrap();

    assert!(!user.id.is_empty());
    assert_eq!(user.name, "Ann");
    assert_eq!(user.email, "ann@example.com");

    let listed = store.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], user);
  }

  #[test]
  fn test_create_trims_fields() {
    let store = UserStore::new();
    let user = store.create(input("  Ann  ", " ann@example.com ")).unwrap();

    assert_eq!(user.name, "Ann");
    assert_eq!(user.email, "ann@example.com");
  }

  #[test]
  fn test_create_rejects_empty_name() {
    let store = UserStore::new();
    let err = store.create(input("   ", "ann@example.com")).unwrap_err();

    assert!(matches!(err, StoreError::Validation { field: "name", .. }));
    assert!(store.list().is_empty());
  }

  #[test]
  fn test_create_rejects_malformed_emails() {
    let store = UserStore::new();
    let malformed = [
      "",
      "ann",
      "@example.com",
      "ann@",
      "ann@example",
      "ann@.com",
      "ann@example.",
      "ann@exam@ple.com",
    ];

    for email in malformed {
      let err = store.create(input("Ann", email)).unwrap_err();
      assert!(
        matches!(err, StoreError::Validation { field: "email", .. }),
        "expected rejection for {email:?}"
      );
    }
    assert!(store.list().is_empty());
  }

  #[test]
  fn test_duplicate_email_is_case_insensitive() {
    let store = UserStore::new();
    store.create(input("Ann", "ann@example.com")).unwrap();

    let err = store.create(input("Ann B", "ANN@example.com ")).unwrap_err();
    assert_eq!(err, StoreError::DuplicateKey("ANN@example.com".to_string()));
    assert_eq!(store.list().len(), 1);
  }

  #[test]
  fn test_delete_twice_fails_the_second_time() {
    let store = UserStore::new();
    let user = store.create(input("Ann", "ann@example.com")).unwrap();

    store.delete(&user.id).unwrap();
    let err = store.delete(&user.id).unwrap_err();
    assert_eq!(err, StoreError::NotFound(user.id));
  }

  #[test]
  fn test_delete_closes_the_gap() {
    let store = UserStore::new();
    let a = store.create(input("A", "a@example.com")).unwrap();
    let b = store.create(input("B", "b@example.com")).unwrap();
    let c = store.create(input("C", "c@example.com")).unwrap();

    store.delete(&b.id).unwrap();

    let ids: Vec<String> = store.list().into_iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![a.id, c.id]);
  }

  #[test]
  fn test_list_is_idempotent() {
    let store = UserStore::new();
    store.create(input("A", "a@example.com")).unwrap();
    store.create(input("B", "b@example.com")).unwrap();

    assert_eq!(store.list(), store.list());
  }

  #[test]
  fn test_concurrent_creates_have_a_single_winner() {
    let store = Arc::new(UserStore::new());

    let handles: Vec<_> = (0..8)
      .map(|i| {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
          store.create(CreateUser {
            name: format!("User {i}"),
            email: "shared@example.com".to_string(),
          })
        })
      })
      .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();

    assert_eq!(winners, 1);
    assert_eq!(store.list().len(), 1);
  }

  #[test]
  fn test_create_delete_lifecycle() {
    let store = UserStore::new();

    let ann = store.create(input("Ann", "ann@example.com")).unwrap();
    assert!(!ann.id.is_empty());

    let err = store.create(input("Ann", "ANN@example.com ")).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));

    store.delete(&ann.id).unwrap();
    let err = store.delete(&ann.id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    assert!(store.list().is_empty());
  }
}
