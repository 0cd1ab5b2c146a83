use std::fmt::Display;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// The platform the output bundles are produced for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
  #[default]
  Browser,
  Node,
  Electron,
}

impl Display for Target {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Target::Browser => write!(f, "browser"),
      Target::Node => write!(f, "node"),
      Target::Electron => write!(f, "electron"),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  None,
  Error,
  Warn,
  #[default]
  Info,
  Verbose,
}

/// The options passed into satchel through the CLI or the programmatic API.
///
/// Unset fields are derived from the build mode by [`BundlerOptions::resolve`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundlerOptions {
  pub production: Option<bool>,
  pub out_dir: Option<PathBuf>,
  pub out_file: Option<String>,
  pub public_url: Option<String>,
  pub watch: Option<bool>,
  pub cache: Option<bool>,
  pub cache_dir: Option<PathBuf>,
  pub kill_workers: Option<bool>,
  pub minify: Option<bool>,
  pub target: Option<Target>,
  pub hmr: Option<bool>,
  pub https: Option<bool>,
  pub log_level: Option<LogLevel>,
  pub hmr_port: Option<u16>,
  pub source_maps: Option<bool>,
  pub hmr_hostname: Option<String>,
  pub detailed_report: Option<bool>,
  pub autoinstall: Option<bool>,
  pub content_hash: Option<bool>,
  pub threads: Option<usize>,
}

/// Fully derived options, every field concrete
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedOptions {
  pub production: bool,
  pub out_dir: PathBuf,
  pub out_file: Option<String>,
  pub public_url: String,
  pub watch: bool,
  pub cache: bool,
  pub cache_dir: PathBuf,
  pub kill_workers: bool,
  pub minify: bool,
  pub target: Target,
  pub hmr: bool,
  pub https: bool,
  pub log_level: LogLevel,
  pub hmr_port: u16,
  pub source_maps: bool,
  pub hmr_hostname: Option<String>,
  pub detailed_report: bool,
  pub autoinstall: bool,
  pub content_hash: bool,
  pub threads: Option<usize>,
  pub project_root: PathBuf,
  node_env: Option<String>,
}

impl BundlerOptions {
  /// Derive every unset field from the build mode.
  ///
  /// `production` falls back to `NODE_ENV=production`; `watch` defaults to
  /// the inverse of `production`; `hmr` is forced off for node targets and
  /// otherwise defaults to `watch`; `minify` and `contentHash` default to
  /// `production`; `autoinstall` is forced off in production.
  pub fn resolve(&self, project_root: PathBuf) -> ResolvedOptions {
    self.resolve_with_env(project_root, std::env::var("NODE_ENV").ok())
  }

  pub fn resolve_with_env(
    &self,
    project_root: PathBuf,
    node_env: Option<String>,
  ) -> ResolvedOptions {
    let production =
      self.production.unwrap_or(false) || node_env.as_deref() == Some("production");
    let watch = self.watch.unwrap_or(!production);
    let target = self.target.unwrap_or_default();
    let hmr = if target == Target::Node {
      false
    } else {
      self.hmr.unwrap_or(watch)
    };

    ResolvedOptions {
      production,
      out_dir: self
        .out_dir
        .clone()
        .unwrap_or_else(|| project_root.join("dist")),
      out_file: self.out_file.clone(),
      public_url: self.public_url.clone().unwrap_or_else(|| "/".to_string()),
      watch,
      cache: self.cache.unwrap_or(true),
      cache_dir: self
        .cache_dir
        .clone()
        .unwrap_or_else(|| project_root.join(".cache")),
      kill_workers: self.kill_workers.unwrap_or(true),
      minify: self.minify.unwrap_or(production),
      target,
      hmr,
      https: self.https.unwrap_or(false),
      log_level: self.log_level.unwrap_or_default(),
      hmr_port: self.hmr_port.unwrap_or(0),
      source_maps: self.source_maps.unwrap_or(true),
      hmr_hostname: self.hmr_hostname.clone(),
      detailed_report: self.detailed_report.unwrap_or(false),
      autoinstall: if production {
        false
      } else {
        self.autoinstall.unwrap_or(true)
      },
      content_hash: self.content_hash.unwrap_or(production),
      threads: self.threads,
      project_root,
      node_env,
    }
  }
}

impl ResolvedOptions {
  /// Whether we are running under a test harness; failed builds are rethrown
  /// in this mode so harnesses can observe them.
  pub fn is_test_env(&self) -> bool {
    self.node_env.as_deref() == Some("test") || cfg!(test)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn resolve(options: BundlerOptions, node_env: Option<&str>) -> ResolvedOptions {
    options.resolve_with_env(PathBuf::from("/app"), node_env.map(String::from))
  }

  #[test]
  fn development_defaults() {
    let resolved = resolve(BundlerOptions::default(), None);

    assert!(!resolved.production);
    assert!(resolved.watch);
    assert!(resolved.hmr);
    assert!(!resolved.minify);
    assert!(!resolved.content_hash);
    assert!(resolved.autoinstall);
    assert_eq!(resolved.out_dir, PathBuf::from("/app/dist"));
    assert_eq!(resolved.cache_dir, PathBuf::from("/app/.cache"));
  }

  #[test]
  fn node_env_production_implies_production() {
    let resolved = resolve(BundlerOptions::default(), Some("production"));

    assert!(resolved.production);
    assert!(!resolved.watch);
    assert!(!resolved.hmr);
    assert!(resolved.minify);
    assert!(resolved.content_hash);
    assert!(!resolved.autoinstall, "autoinstall is forced off in production");
  }

  #[test]
  fn hmr_is_forced_off_for_node_targets() {
    let resolved = resolve(
      BundlerOptions {
        target: Some(Target::Node),
        hmr: Some(true),
        ..BundlerOptions::default()
      },
      None,
    );

    assert!(!resolved.hmr);
  }

  #[test]
  fn explicit_flags_win_over_derived_defaults() {
    let resolved = resolve(
      BundlerOptions {
        production: Some(true),
        watch: Some(true),
        minify: Some(false),
        content_hash: Some(false),
        ..BundlerOptions::default()
      },
      None,
    );

    assert!(resolved.production);
    assert!(resolved.watch);
    assert!(!resolved.minify);
    assert!(!resolved.content_hash);
  }
}
