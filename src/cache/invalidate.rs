//! Declarative mutation-to-key invalidation rules.

/// Selects the cache entries a mutation outdates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
  /// Every entry of a key family (e.g. every list query of a collection)
  Operation(&'static str),
  /// One exact entry, by cache hash
  Key(String),
}

impl KeySelector {
  pub(crate) fn matches(&self, hash: &str, operation: &str) -> bool {
    match self {
      KeySelector::Operation(op) => *op == operation,
      KeySelector::Key(key) => key == hash,
    }
  }
}

/// A write operation with a declared set of affected cache keys.
///
/// The relation is computed once per mutation value and applied
/// mechanically by the cache layer after the write succeeds; call sites
/// never invalidate keys by hand.
pub trait Mutation {
  /// Mutation name for logs.
  fn name(&self) -> &'static str;

  /// Cache keys this mutation outdates when it succeeds.
  fn affects(&self) -> Vec<KeySelector>;
}
