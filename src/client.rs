//! Cached client over the user store.
//!
//! Wires the query cache to the store through the wire contract only:
//! every call crosses the boundary as a closure returning payload or an
//! error string, the way a remote API client would be wrapped. The store's
//! typed errors cross serialized as their wire descriptor.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::{
  CacheError, CacheResult, KeySelector, Mutation, QueryCache, QueryKey,
};
use crate::config::CacheConfig;
use crate::store::{CreateUser, StoreError, User, UserStore};

/// Query keys for user data.
#[derive(Debug, Clone)]
pub enum UserQuery {
  /// The user collection, with optional filter parameters
  List { params: BTreeMap<String, String> },
  /// A single user by id
  Detail { id: String },
}

impl UserQuery {
  /// The unfiltered collection.
  pub fn list() -> Self {
    Self::List {
      params: BTreeMap::new(),
    }
  }
}

impl QueryKey for UserQuery {
  fn canonical(&self) -> String {
    match self {
      // BTreeMap iteration is sorted, so equal parameter sets always
      // canonicalize identically regardless of insertion order
      Self::List { params } => params
        .iter()
        .map(|(k, v)| format!("{}={}", k.trim().to_lowercase(), v.trim().to_lowercase()))
        .collect::<Vec<_>>()
        .join("&"),
      Self::Detail { id } => id.trim().to_string(),
    }
  }

  fn operation(&self) -> &'static str {
    match self {
      Self::List { .. } => "users",
      Self::Detail { .. } => "user_detail",
    }
  }

  fn description(&self) -> String {
    match self {
      Self::List { params } if params.is_empty() => "all users".to_string(),
      Self::List { params } => format!("users ({} filters)", params.len()),
      Self::Detail { id } => format!("user {}", id),
    }
  }
}

/// Write operations with their declared affected keys.
#[derive(Debug, Clone)]
pub enum UserMutation {
  Create,
  Delete { id: String },
}

impl Mutation for UserMutation {
  fn name(&self) -> &'static str {
    match self {
      Self::Create => "create_user",
      Self::Delete { .. } => "delete_user",
    }
  }

  fn affects(&self) -> Vec<KeySelector> {
    match self {
      // A new user lands in every list query
      Self::Create => vec![KeySelector::Operation("users")],
      // A removed user affects every list query plus its own detail entry
      Self::Delete { id } => vec![
        KeySelector::Operation("users"),
        KeySelector::Key(
          UserQuery::Detail { id: id.clone() }.cache_hash(),
        ),
      ],
    }
  }
}

/// User client with transparent caching.
#[derive(Clone)]
pub struct CachedUserClient {
  store: Arc<UserStore>,
  cache: QueryCache,
}

impl CachedUserClient {
  /// Create a client over the given store.
  pub fn new(store: Arc<UserStore>, config: CacheConfig) -> Self {
    Self {
      store,
      cache: QueryCache::new(config),
    }
  }

  /// The underlying cache, e.g. for subscriptions.
  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// List users through the cache.
  pub async fn list_users(&self) -> Result<CacheResult<Vec<User>>, CacheError> {
    let store = Arc::clone(&self.store);
    self
      .cache
      .query(&UserQuery::list(), move || {
        let store = Arc::clone(&store);
        async move { Ok::<_, String>(store.list()) }
      })
      .await
  }

  /// Look up a single user by id through the cache.
  pub async fn get_user(&self, id: &str) -> Result<CacheResult<Option<User>>, CacheError> {
    let key = UserQuery::Detail { id: id.to_string() };
    let store = Arc::clone(&self.store);
    let id = id.to_string();
    self
      .cache
      .query(&key, move || {
        let store = Arc::clone(&store);
        let id = id.clone();
        async move { Ok::<_, String>(store.list().into_iter().find(|u| u.id == id)) }
      })
      .await
  }

  /// Create a user, then outdate every cached list.
  pub async fn create_user(&self, input: CreateUser) -> Result<User, CacheError> {
    let store = Arc::clone(&self.store);
    self
      .cache
      .mutate(&UserMutation::Create, move || async move {
        store.create(input).map_err(|e| wire_error(&e))
      })
      .await
  }

  /// Delete a user, then outdate every cached list and the user's detail
  /// entry.
  pub async fn delete_user(&self, id: &str) -> Result<User, CacheError> {
    let mutation = UserMutation::Delete { id: id.to_string() };
    let store = Arc::clone(&self.store);
    let id = id.to_string();
    self
      .cache
      .mutate(&mutation, move || async move {
        store.delete(&id).map_err(|e| wire_error(&e))
      })
      .await
  }

  /// Delete with an optimistic cache edit: the row disappears from cached
  /// lists immediately and reappears if the store rejects the delete.
  pub async fn delete_user_optimistic(&self, id: &str) -> Result<User, CacheError> {
    let mutation = UserMutation::Delete { id: id.to_string() };
    let store = Arc::clone(&self.store);
    let target = id.to_string();
    let patched = id.to_string();
    self
      .cache
      .mutate_optimistic(
        &mutation,
        move |payload: &mut Value| {
          if let Some(rows) = payload.as_array_mut() {
            rows.retain(|row| row.get("id").and_then(Value::as_str) != Some(patched.as_str()));
          }
        },
        move || async move { store.delete(&target).map_err(|e| wire_error(&e)) },
      )
      .await
  }
}

/// Serialize a store error into its wire descriptor.
fn wire_error(err: &StoreError) -> String {
  serde_json::to_string(&err.descriptor()).unwrap_or_else(|_| err.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EntryStatus;
  use std::time::Duration;

  fn client() -> CachedUserClient {
    CachedUserClient::new(Arc::new(UserStore::new()), CacheConfig::default())
  }

  fn ann() -> CreateUser {
    CreateUser {
      name: "Ann".to_string(),
      email: "ann@example.com".to_string(),
    }
  }

  #[test]
  fn test_list_key_is_stable_across_spellings() {
    let mut loud = BTreeMap::new();
    loud.insert("Sort".to_string(), " Name ".to_string());
    let mut quiet = BTreeMap::new();
    quiet.insert("Sort".to_string(), "name".to_string());

    let a = UserQuery::List { params: loud };
    let b = UserQuery::List { params: quiet };
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_list_and_detail_keys_do_not_collide() {
    let list = UserQuery::list();
    let detail = UserQuery::Detail { id: String::new() };
    assert_ne!(list.cache_hash(), detail.cache_hash());
  }

  #[test]
  fn test_delete_affects_lists_and_own_detail() {
    let mutation = UserMutation::Delete {
      id: "abc".to_string(),
    };
    let affected = mutation.affects();

    assert!(affected.contains(&KeySelector::Operation("users")));
    let detail_hash = UserQuery::Detail {
      id: "abc".to_string(),
    }
    .cache_hash();
    assert!(affected.contains(&KeySelector::Key(detail_hash)));
  }

  #[tokio::test]
  async fn test_list_reflects_create_after_revalidation() {
    let client = client();

    let empty = client.list_users().await.unwrap();
    assert!(empty.data.is_empty());
    assert_eq!(empty.status, EntryStatus::Fresh);

    client.create_user(ann()).await.unwrap();

    // The cached empty list is served while revalidation runs
    let stale = client.list_users().await.unwrap();
    assert!(stale.data.is_empty());
    assert_eq!(stale.status, EntryStatus::Stale);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let fresh = client.list_users().await.unwrap();
    assert_eq!(fresh.status, EntryStatus::Fresh);
    assert_eq!(fresh.data.len(), 1);
    assert_eq!(fresh.data[0].name, "Ann");
  }

  #[tokio::test]
  async fn test_duplicate_create_surfaces_descriptor() {
    let client = client();
    client.create_user(ann()).await.unwrap();

    let err = client
      .create_user(CreateUser {
        name: "Ann B".to_string(),
        email: "ANN@example.com ".to_string(),
      })
      .await
      .unwrap_err();

    match err {
      CacheError::MutationFailed(message) => assert!(message.contains("duplicate_key")),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_delete_invalidates_detail_entry() {
    let client = client();
    let user = client.create_user(ann()).await.unwrap();

    let found = client.get_user(&user.id).await.unwrap();
    assert_eq!(found.data.as_ref().map(|u| u.id.as_str()), Some(user.id.as_str()));
    assert_eq!(found.status, EntryStatus::Fresh);

    client.delete_user(&user.id).await.unwrap();

    // Old snapshot first, then the revalidated miss
    let stale = client.get_user(&user.id).await.unwrap();
    assert_eq!(stale.status, EntryStatus::Stale);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let gone = client.get_user(&user.id).await.unwrap();
    assert_eq!(gone.status, EntryStatus::Fresh);
    assert!(gone.data.is_none());
  }

  #[tokio::test]
  async fn test_optimistic_delete_hides_row_immediately() {
    let client = client();
    let user = client.create_user(ann()).await.unwrap();

    client.list_users().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.delete_user_optimistic(&user.id).await.unwrap();

    // No revalidation has run yet; the patched payload is already empty
    let list = client.list_users().await.unwrap();
    assert!(list.data.is_empty());
  }

  #[tokio::test]
  async fn test_optimistic_delete_rolls_back_for_unknown_id() {
    let client = client();
    client.create_user(ann()).await.unwrap();

    client.list_users().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = client.delete_user_optimistic("no-such-id").await.unwrap_err();
    match err {
      CacheError::MutationFailed(message) => assert!(message.contains("not_found")),
      other => panic!("unexpected error: {other:?}"),
    }

    // The cached list still holds the user and was never invalidated
    let list = client.list_users().await.unwrap();
    assert_eq!(list.data.len(), 1);
    assert_eq!(list.status, EntryStatus::Fresh);
  }

  #[tokio::test]
  async fn test_full_lifecycle_through_cache() {
    let client = client();

    let user = client.create_user(ann()).await.unwrap();
    assert!(!user.id.is_empty());
    assert_eq!(user.email, "ann@example.com");

    let err = client
      .create_user(CreateUser {
        name: "Ann".to_string(),
        email: "ANN@example.com ".to_string(),
      })
      .await
      .unwrap_err();
    assert!(matches!(err, CacheError::MutationFailed(_)));

    client.delete_user(&user.id).await.unwrap();
    let err = client.delete_user(&user.id).await.unwrap_err();
    match err {
      CacheError::MutationFailed(message) => assert!(message.contains("not_found")),
      other => panic!("unexpected error: {other:?}"),
    }

    let list = client.list_users().await.unwrap();
    assert!(list.data.is_empty());
    assert_eq!(list.status, EntryStatus::Fresh);
  }
}
