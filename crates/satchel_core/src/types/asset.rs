use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use satchel_filesystem::FileSystem;
use satchel_filesystem::FileSystemRef;

use super::Dependency;
use super::FileType;

/// Dense arena index of an asset in the registry
pub type AssetId = usize;

/// Dense arena index of a bundle in the bundle tree
pub type BundleId = usize;

/// The package.json closest to an asset, opaque to the core
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageDescriptor {
  pub name: Option<String>,
  pub version: Option<String>,
  pub main: Option<String>,
  /// Directory containing the package.json
  #[serde(skip)]
  pub package_dir: PathBuf,
}

/// Opaque freshness metadata stored alongside a cached compile result.
///
/// The cache itself has no knowledge of transform options or upstream file
/// mtimes, so callers re-validate entries against this before trusting them.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheData {
  /// Files whose change invalidates the cached result, with the mtime
  /// observed at compile time (milliseconds since the epoch).
  pub invalidate_on_file_change: Vec<TrackedFile>,

  /// Environment variables read during the transform, with the observed value
  pub env: BTreeMap<String, Option<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFile {
  pub path: PathBuf,
  pub mtime_ms: u64,
}

pub fn mtime_ms(time: SystemTime) -> u64 {
  time
    .duration_since(SystemTime::UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// The worker's output for one asset, also the compile-cache value
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessedAsset {
  /// Produced representation per output type, e.g. `{"js": "..."}`
  pub generated: IndexMap<FileType, String>,

  /// Content hash of the compiled asset
  pub hash: String,

  /// Dependencies discovered by the transform, in declaration order
  pub dependencies: Vec<Dependency>,

  pub cache_data: CacheData,
}

/// One source file in the graph, plus its loaded state and edges.
///
/// The registry is the single owner of `Asset` records; bundles and
/// dependency descriptors refer back to them by `AssetId` only.
#[derive(Clone, Debug, Default)]
pub struct Asset {
  pub id: AssetId,

  /// Canonical absolute path, the unique registry key
  pub file_path: PathBuf,

  pub package: Arc<PackageDescriptor>,

  /// Declared type, derived from the file extension
  pub asset_type: FileType,

  pub processed: bool,
  pub generated: IndexMap<FileType, String>,
  pub hash: Option<String>,
  pub build_time: Duration,
  pub cache_data: CacheData,

  /// Declared specifier -> dependency descriptor, in declaration order
  pub dependencies: IndexMap<String, Dependency>,

  /// Declared specifier -> resolved asset. Absent for deps skipped because
  /// they are `included_in_parent`.
  pub dep_assets: IndexMap<String, AssetId>,

  /// Dependency descriptors that pointed at this asset
  pub parent_deps: HashSet<Dependency>,

  /// The bundle currently owning this asset, if placed
  pub parent_bundle: Option<BundleId>,

  /// Sibling bundles that also contain this asset (multi-type generation)
  pub bundles: HashSet<BundleId>,
}

impl Asset {
  pub fn new(id: AssetId, file_path: PathBuf, package: Arc<PackageDescriptor>) -> Self {
    let asset_type = file_path
      .extension()
      .map(|ext| FileType::from_extension(&ext.to_string_lossy()))
      .unwrap_or_default();

    Asset {
      id,
      file_path,
      package,
      asset_type,
      ..Asset::default()
    }
  }

  /// Forget the compiled state and edges so the next load recomputes them
  pub fn invalidate(&mut self) {
    self.processed = false;
    self.generated.clear();
    self.hash = None;
    self.build_time = Duration::ZERO;
    self.cache_data = CacheData::default();
    self.dependencies.clear();
    self.dep_assets.clear();
  }

  /// Forget all current bundle placement before re-running the tree pass
  pub fn invalidate_bundle(&mut self) {
    self.parent_bundle = None;
    self.bundles.clear();
  }

  /// Whether a cached compile result is stale for this asset.
  ///
  /// A tracked file that disappeared, changed mtime, or an environment
  /// variable that changed value all flip the entry to stale.
  pub fn should_invalidate(cache_data: &CacheData, fs: &FileSystemRef) -> bool {
    for tracked in &cache_data.invalidate_on_file_change {
      match fs.modified(&tracked.path) {
        Ok(modified) => {
          if mtime_ms(modified) != tracked.mtime_ms {
            return true;
          }
        }
        Err(_) => return true,
      }
    }

    for (key, recorded) in &cache_data.env {
      let current = std::env::var(key).ok();
      if &current != recorded {
        return true;
      }
    }

    false
  }

  /// Rewrite references in the generated output to final bundle names
  pub fn replace_bundle_names(&mut self, name_map: &HashMap<String, String>) {
    for contents in self.generated.values_mut() {
      for (from, to) in name_map {
        if from != to && contents.contains(from.as_str()) {
          *contents = contents.replace(from.as_str(), to.as_str());
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn asset() -> Asset {
    Asset::new(
      0,
      PathBuf::from("/app/src/entry.js"),
      Arc::new(PackageDescriptor::default()),
    )
  }

  #[test]
  fn declared_type_comes_from_extension() {
    assert_eq!(asset().asset_type, FileType::Js);

    let css = Asset::new(
      1,
      PathBuf::from("/app/src/styles.css"),
      Arc::new(PackageDescriptor::default()),
    );
    assert_eq!(css.asset_type, FileType::Css);
  }

  #[test]
  fn invalidate_clears_compiled_state_and_edges() {
    let mut asset = asset();
    asset.processed = true;
    asset.generated.insert(FileType::Js, "code".into());
    asset.hash = Some("abc".into());
    asset.dependencies.insert("./a".into(), Dependency::new("./a"));
    asset.dep_assets.insert("./a".into(), 2);

    asset.invalidate();

    assert!(!asset.processed);
    assert!(asset.generated.is_empty());
    assert!(asset.hash.is_none());
    assert!(asset.dependencies.is_empty());
    assert!(asset.dep_assets.is_empty());
  }

  #[test]
  fn invalidate_bundle_forgets_all_placement() {
    let mut asset = asset();
    asset.parent_bundle = Some(3);
    asset.bundles.extend([3, 4]);

    asset.invalidate_bundle();

    assert_eq!(asset.parent_bundle, None);
    assert!(asset.bundles.is_empty());
  }

  #[test]
  fn replace_bundle_names_rewrites_generated_output() {
    let mut asset = asset();
    asset
      .generated
      .insert(FileType::Js, "import('./other.js')".into());

    let mut names = HashMap::new();
    names.insert("other.js".to_string(), "other.1a2b3c4d.js".to_string());
    asset.replace_bundle_names(&names);

    assert_eq!(
      asset.generated.get(&FileType::Js).unwrap(),
      "import('./other.1a2b3c4d.js')"
    );
  }
}
