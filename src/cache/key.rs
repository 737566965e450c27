//! Canonical query keys.

use sha2::{Digest, Sha256};

/// A cacheable query descriptor.
///
/// Implementors produce a canonical form that is stable across equivalent
/// spellings of the same query: parameter order, case, and surrounding
/// whitespace must not change it. The canonical form is hashed so entry
/// keys are fixed-length regardless of query size.
pub trait QueryKey {
  /// Canonical string form of the query. Render parameter sets in sorted
  /// order so equal sets canonicalize identically.
  fn canonical(&self) -> String;

  /// Key family this query belongs to (e.g. "users"), matched by mutation
  /// invalidation rules.
  fn operation(&self) -> &'static str;

  /// Human-readable description for logs.
  fn description(&self) -> String;

  /// SHA256 hash of the operation plus canonical form.
  fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.operation().as_bytes());
    hasher.update(b":");
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }
}
