use serde::Deserialize;
use serde::Serialize;

use crate::hash::hash_string;

/// The location within a source file where a dependency was declared
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
  /// 1-based line number
  pub line: u32,
  /// 1-based column number
  pub column: u32,
}

/// A dependency denotes a connection between two assets
///
/// It records the declared specifier together with how the edge should be
/// treated by the bundle-tree builder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dependency {
  /// The import or export specifier that connects two assets together
  pub specifier: String,

  /// The location within the source file where the dependency was found
  pub loc: Option<SourceLocation>,

  /// Whether the dependency was declared through a dynamic import expression
  ///
  /// Dynamic dependencies become the entry of a child bundle rather than
  /// being placed into the importing bundle.
  pub dynamic: bool,

  /// Whether the dependency is optional
  ///
  /// If an optional dependency cannot be resolved, it will not fail the build.
  pub optional: bool,

  /// The dependency's content is compiled into the parent asset
  ///
  /// No child asset is created; the referenced path is watched with the
  /// parent as subscriber so edits retrigger the parent.
  pub included_in_parent: bool,
}

impl Dependency {
  pub fn new(specifier: impl Into<String>) -> Self {
    Dependency {
      specifier: specifier.into(),
      ..Dependency::default()
    }
  }

  pub fn dynamic(specifier: impl Into<String>) -> Self {
    Dependency {
      specifier: specifier.into(),
      dynamic: true,
      ..Dependency::default()
    }
  }

  /// Stable identifier for this dependency descriptor
  pub fn id(&self) -> String {
    hash_string(format!(
      "{}:{}:{}:{}",
      self.specifier, self.dynamic, self.optional, self.included_in_parent
    ))
  }

  /// Local-relative specifiers resolve against the importing file or the
  /// project root and are never auto-installed.
  pub fn is_local_specifier(&self) -> bool {
    self.specifier.starts_with('.')
      || self.specifier.starts_with('/')
      || self.specifier.starts_with('~')
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn local_specifier_classification() {
    assert!(Dependency::new("./a.js").is_local_specifier());
    assert!(Dependency::new("../a.js").is_local_specifier());
    assert!(Dependency::new("/src/a.js").is_local_specifier());
    assert!(Dependency::new("~/src/a.js").is_local_specifier());
    assert!(!Dependency::new("lodash").is_local_specifier());
    assert!(!Dependency::new("@scope/pkg/util").is_local_specifier());
  }

  #[test]
  fn id_distinguishes_dynamic_edges() {
    let stat = Dependency::new("./a.js");
    let dynamic = Dependency::dynamic("./a.js");
    assert_ne!(stat.id(), dynamic.id());
  }
}
