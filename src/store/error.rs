//! Error types for the user store.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Every variant leaves the collection unchanged, and retrying the same
/// input fails identically; retries belong to the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
  /// A required field is missing or malformed.
  #[error("invalid {field}: {reason}")]
  Validation { field: &'static str, reason: String },

  /// A user with the same email already exists.
  #[error("a user with email {0} already exists")]
  DuplicateKey(String),

  /// No user with the given id.
  #[error("no user with id {0}")]
  NotFound(String),
}

impl StoreError {
  /// Stable machine-readable tag for the transport boundary.
  pub fn kind(&self) -> &'static str {
    match self {
      StoreError::Validation { .. } => "validation",
      StoreError::DuplicateKey(_) => "duplicate_key",
      StoreError::NotFound(_) => "not_found",
    }
  }

  /// The wire-shaped error record.
  pub fn descriptor(&self) -> ErrorDescriptor {
    ErrorDescriptor {
      kind: self.kind(),
      message: self.to_string(),
    }
  }
}

/// Error shape handed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDescriptor {
  pub kind: &'static str,
  pub message: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_descriptor_wire_shape() {
    let err = StoreError::NotFound("abc-123".to_string());
    let json = serde_json::to_value(err.descriptor()).unwrap();

    assert_eq!(json["kind"], "not_found");
    assert!(json["message"].as_str().unwrap().contains("abc-123"));
  }

  #[test]
  fn test_kinds_are_distinct() {
    let validation = StoreError::Validation {
      field: "name",
      reason: "must not be empty".to_string(),
    };
    assert_eq!(validation.kind(), "validation");
    assert_eq!(StoreError::DuplicateKey(String::new()).kind(), "duplicate_key");
    assert_eq!(StoreError::NotFound(String::new()).kind(), "not_found");
  }
}
