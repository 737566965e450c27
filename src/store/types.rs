use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  /// Server-assigned UUID, immutable once assigned
  pub id: String,
  pub name: String,
  pub email: String,
  /// Set at creation, immutable
  pub created_at: DateTime<Utc>,
}

/// Input for creating a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateUser {
  pub name: String,
  pub email: String,
}
