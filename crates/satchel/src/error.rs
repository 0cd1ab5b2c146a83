use std::path::PathBuf;

use thiserror::Error;

/// Classified bundler failures surfaced by the orchestration core.
///
/// A missing packager is deliberately not represented here: the bundle-tree
/// builder emits such assets through an opaque sibling bundle instead.
#[derive(Debug, Error)]
pub enum BundlerError {
  #[error("Cannot resolve dependency '{specifier}' from '{from}'")]
  ResolveNotFound { specifier: String, from: PathBuf },

  #[error("Ambiguous specifier '{specifier}' from '{from}'")]
  ResolveAmbiguous { specifier: String, from: PathBuf },

  #[error("Failed to compile {path}: {message}")]
  CompileError { path: PathBuf, message: String },

  #[error("Failed to install '{module}': {reason}")]
  InstallFailed { module: String, reason: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("internal invariant violated: {0}")]
  InternalInvariant(String),
}
