use std::sync::Arc;

use crate::types::Asset;
use crate::types::Dependency;

pub type DelegateRef = Arc<dyn Delegate + Send + Sync>;

/// Optional hook contributing dependency edges the compiler's direct parse
/// of the source cannot see (e.g. framework conventions).
pub trait Delegate: Send + Sync {
  fn get_implicit_dependencies(&self, _asset: &Asset) -> Vec<Dependency> {
    Vec::new()
  }
}
