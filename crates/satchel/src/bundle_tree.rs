use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexSet;

use satchel_core::hash::hash_string;
use satchel_core::plugin::PackageContext;
use satchel_core::plugin::PackagedSource;
use satchel_core::types::AssetId;
use satchel_core::types::BundleId;
use satchel_core::types::Dependency;
use satchel_core::types::FileType;
use satchel_core::types::ResolvedOptions;
use satchel_filesystem::FileSystem;
use satchel_filesystem::FileSystemRef;

use crate::plugins::PackagerRegistry;
use crate::plugins::RawPackager;
use crate::registry::AssetRegistry;

/// A grouping of assets that will produce one artifact
#[derive(Debug)]
pub struct Bundle {
  pub id: BundleId,
  pub ty: FileType,
  /// The asset that caused this bundle's creation; never moved out
  pub entry_asset: Option<AssetId>,
  pub assets: IndexSet<AssetId>,
  /// Bundles created by dynamic-import boundaries (and opaque emissions)
  pub child_bundles: Vec<BundleId>,
  /// Per-type peers sharing this bundle's entry context
  pub sibling_bundles: HashMap<FileType, BundleId>,
  pub parent: Option<BundleId>,
  /// Name before content-hash naming is applied
  pub base_name: String,
  /// Emitted byte-for-byte because no packager handles the type
  pub is_opaque: bool,
}

fn base_name_for(path: &Path, ty: &FileType) -> String {
  let stem = path
    .file_stem()
    .and_then(|stem| stem.to_str())
    .unwrap_or("bundle");
  format!("{stem}.{}", ty.extension())
}

/// The bundle tree produced from a finished asset graph.
///
/// Bundles live in an arena and refer to each other by index; assets refer
/// back to their placement through `parent_bundle`/`bundles` on the
/// registry record.
#[derive(Debug, Default)]
pub struct BundleTree {
  bundles: Vec<Bundle>,
}

impl BundleTree {
  /// Recursively partition the graph reachable from `entry` into bundles.
  ///
  /// Callers must have cleared previous placement (`invalidate_bundle`) on
  /// every registered asset beforehand.
  pub fn build(
    registry: &mut AssetRegistry,
    packagers: &PackagerRegistry,
    entry: AssetId,
    out_file: Option<&str>,
  ) -> BundleTree {
    let mut tree = BundleTree::default();
    let mut parent_bundles = Vec::new();
    tree.place(registry, packagers, entry, None, None, &mut parent_bundles);

    if let Some(out_file) = out_file {
      if let Some(root) = tree.bundles.first_mut() {
        root.base_name = out_file.to_string();
      }
    }

    tree
  }

  pub fn root(&self) -> Option<&Bundle> {
    self.bundles.first()
  }

  pub fn bundle(&self, id: BundleId) -> &Bundle {
    &self.bundles[id]
  }

  pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
    self.bundles.iter()
  }

  pub fn len(&self) -> usize {
    self.bundles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bundles.is_empty()
  }

  fn place(
    &mut self,
    registry: &mut AssetRegistry,
    packagers: &PackagerRegistry,
    asset_id: AssetId,
    dep: Option<&Dependency>,
    bundle: Option<BundleId>,
    parent_bundles: &mut Vec<BundleId>,
  ) {
    if let Some(dep) = dep {
      registry.asset_mut(asset_id).parent_deps.insert(dep.clone());
    }

    if let Some(parent_bundle) = registry.asset(asset_id).parent_bundle {
      match bundle {
        Some(bundle) if parent_bundle != bundle => {
          // The asset is shared; hoist it to the lowest common ancestor of
          // matching type.
          let common = self.find_common_ancestor(bundle, parent_bundle);
          if parent_bundle != common
            && self.bundles[parent_bundle].ty == self.bundles[common].ty
          {
            self.move_asset_to_bundle(registry, asset_id, common);
            return;
          }
        }
        Some(_) => return,
        None => {}
      }

      // A placed ancestor still on the recursion stack means a dependency
      // cycle; stop here so the walk terminates.
      if parent_bundles.contains(&parent_bundle) {
        return;
      }
    }

    let asset_type = registry.asset(asset_id).asset_type.clone();
    let current = match (bundle, dep) {
      (None, _) => {
        let name = base_name_for(&registry.asset(asset_id).file_path, &asset_type);
        self.create_bundle(registry, asset_type.clone(), Some(asset_id), None, name, false)
      }
      (Some(bundle), Some(dep)) if dep.dynamic => {
        self.create_child_bundle(registry, bundle, asset_id, false)
      }
      (Some(bundle), _) if !packagers.has(&asset_type) => {
        // Opaque file emission: a single-asset bundle copied as-is
        self.create_child_bundle(registry, bundle, asset_id, true)
      }
      (Some(bundle), _) => {
        let sibling = self.get_sibling_bundle(registry, bundle, &asset_type);
        self.add_asset(registry, sibling, asset_id);
        bundle
      }
    };

    let generated_types: Vec<FileType> = registry
      .asset(asset_id)
      .generated
      .keys()
      .cloned()
      .collect();

    if generated_types.contains(&self.bundles[current].ty) {
      self.add_asset(registry, current, asset_id);
    }
    if generated_types.contains(&asset_type) {
      for ty in &generated_types {
        let sibling = self.get_sibling_bundle(registry, current, ty);
        self.add_asset(registry, sibling, asset_id);
      }
    }

    registry.asset_mut(asset_id).parent_bundle = Some(current);

    let edges: Vec<(Dependency, AssetId)> = {
      let asset = registry.asset(asset_id);
      asset
        .dep_assets
        .iter()
        .filter_map(|(specifier, child)| {
          asset
            .dependencies
            .get(specifier)
            .map(|dep| (dep.clone(), *child))
        })
        .collect()
    };

    parent_bundles.push(current);
    for (dep, child) in edges {
      self.place(
        registry,
        packagers,
        child,
        Some(&dep),
        Some(current),
        parent_bundles,
      );
    }
    parent_bundles.pop();
  }

  fn create_bundle(
    &mut self,
    registry: &mut AssetRegistry,
    ty: FileType,
    entry_asset: Option<AssetId>,
    parent: Option<BundleId>,
    base_name: String,
    is_opaque: bool,
  ) -> BundleId {
    let id = self.bundles.len();
    self.bundles.push(Bundle {
      id,
      ty,
      entry_asset,
      assets: IndexSet::new(),
      child_bundles: Vec::new(),
      sibling_bundles: HashMap::new(),
      parent,
      base_name,
      is_opaque,
    });

    if let Some(entry) = entry_asset {
      self.add_asset(registry, id, entry);
    }

    id
  }

  fn create_child_bundle(
    &mut self,
    registry: &mut AssetRegistry,
    parent: BundleId,
    entry_asset: AssetId,
    is_opaque: bool,
  ) -> BundleId {
    let ty = registry.asset(entry_asset).asset_type.clone();
    let name = base_name_for(&registry.asset(entry_asset).file_path, &ty);
    let child = self.create_bundle(registry, ty, Some(entry_asset), Some(parent), name, is_opaque);
    self.bundles[parent].child_bundles.push(child);
    child
  }

  /// The per-type peer of a bundle, created on demand. A bundle is its own
  /// sibling for its own type.
  fn get_sibling_bundle(
    &mut self,
    registry: &mut AssetRegistry,
    bundle: BundleId,
    ty: &FileType,
  ) -> BundleId {
    if self.bundles[bundle].ty == *ty {
      return bundle;
    }

    if let Some(sibling) = self.bundles[bundle].sibling_bundles.get(ty) {
      return *sibling;
    }

    let stem = self.bundles[bundle]
      .base_name
      .rsplit_once('.')
      .map(|(stem, _)| stem.to_string())
      .unwrap_or_else(|| self.bundles[bundle].base_name.clone());
    let name = format!("{stem}.{}", ty.extension());

    let sibling = self.create_bundle(registry, ty.clone(), None, Some(bundle), name, false);
    self.bundles[bundle].sibling_bundles.insert(ty.clone(), sibling);
    sibling
  }

  fn add_asset(&mut self, registry: &mut AssetRegistry, bundle: BundleId, asset_id: AssetId) {
    self.bundles[bundle].assets.insert(asset_id);
    registry.asset_mut(asset_id).bundles.insert(bundle);
  }

  fn remove_asset(&mut self, registry: &mut AssetRegistry, bundle: BundleId, asset_id: AssetId) {
    self.bundles[bundle].assets.shift_remove(&asset_id);
    registry.asset_mut(asset_id).bundles.remove(&bundle);
  }

  /// The deepest bundle on the ancestor chains of both bundles
  pub fn find_common_ancestor(&self, a: BundleId, b: BundleId) -> BundleId {
    let b_chain: HashSet<BundleId> = self.ancestors(b).into_iter().collect();

    for candidate in self.ancestors(a) {
      if b_chain.contains(&candidate) {
        return candidate;
      }
    }

    // Every bundle chains up to the root, so the chains always intersect
    *self.ancestors(a).last().expect("Bundle tree has no root")
  }

  fn ancestors(&self, id: BundleId) -> Vec<BundleId> {
    let mut chain = vec![id];
    let mut current = id;
    while let Some(parent) = self.bundles[current].parent {
      chain.push(parent);
      current = parent;
    }
    chain
  }

  /// Hoist a shared asset (and its co-located subtree) into `target`.
  ///
  /// A bundle's entry asset never moves: it was explicitly requested to live
  /// in its own bundle. The asset migrates across all its per-type sibling
  /// memberships, and child deps placed in the same source bundle travel
  /// with it.
  fn move_asset_to_bundle(
    &mut self,
    registry: &mut AssetRegistry,
    asset_id: AssetId,
    target: BundleId,
  ) {
    let Some(old) = registry.asset(asset_id).parent_bundle else {
      return;
    };
    if old == target || self.bundles[old].entry_asset == Some(asset_id) {
      return;
    }

    let memberships: Vec<BundleId> = registry.asset(asset_id).bundles.iter().copied().collect();
    for member in memberships {
      let ty = self.bundles[member].ty.clone();
      self.remove_asset(registry, member, asset_id);
      let sibling = self.get_sibling_bundle(registry, target, &ty);
      self.add_asset(registry, sibling, asset_id);
    }

    registry.asset_mut(asset_id).parent_bundle = Some(target);

    let children: Vec<AssetId> = registry.asset(asset_id).dep_assets.values().copied().collect();
    for child in children {
      if registry.asset(child).parent_bundle == Some(old) {
        self.move_asset_to_bundle(registry, child, target);
      }
    }
  }

  /// Content hash of a bundle, derived from its members' content hashes.
  /// Stable across builds when no member changed.
  pub fn content_hash_of(&self, bundle: &Bundle, registry: &AssetRegistry) -> String {
    let mut input = bundle.base_name.clone();
    for asset_id in &bundle.assets {
      if let Some(asset) = registry.get(*asset_id) {
        if let Some(hash) = &asset.hash {
          input.push(':');
          input.push_str(hash);
        }
      }
    }
    hash_string(input)
  }

  /// Mapping from bundle base name to final artifact filename: hash-derived
  /// when content hashing is enabled, deterministic otherwise.
  pub fn bundle_name_map(
    &self,
    registry: &AssetRegistry,
    content_hash: bool,
  ) -> HashMap<String, String> {
    let mut name_map = HashMap::new();

    for bundle in &self.bundles {
      let final_name = if content_hash {
        let hash = self.content_hash_of(bundle, registry);
        match bundle.base_name.rsplit_once('.') {
          Some((stem, ext)) => format!("{stem}.{}.{ext}", &hash[..8]),
          None => format!("{}.{}", bundle.base_name, &hash[..8]),
        }
      } else {
        bundle.base_name.clone()
      };

      name_map.insert(bundle.base_name.clone(), final_name);
    }

    name_map
  }

  /// Walk the tree and invoke the type packager for every bundle whose
  /// content hash changed relative to `prev_hashes`. Returns the new hash
  /// map, which seeds the next incremental run.
  pub async fn package(
    &self,
    registry: &AssetRegistry,
    packagers: &PackagerRegistry,
    fs: &FileSystemRef,
    options: &Arc<ResolvedOptions>,
    name_map: &HashMap<String, String>,
    prev_hashes: &HashMap<String, String>,
  ) -> anyhow::Result<HashMap<String, String>> {
    let mut new_hashes = HashMap::new();
    fs.create_dir_all(&options.out_dir)?;

    for bundle in &self.bundles {
      if bundle.assets.is_empty() {
        continue;
      }

      let final_name = name_map
        .get(&bundle.base_name)
        .cloned()
        .unwrap_or_else(|| bundle.base_name.clone());
      let hash = self.content_hash_of(bundle, registry);

      if prev_hashes.get(&final_name) == Some(&hash) {
        new_hashes.insert(final_name, hash);
        continue;
      }

      let packager: satchel_core::plugin::PackagerRef = if bundle.is_opaque {
        Arc::new(RawPackager::default())
      } else {
        match packagers.get(&bundle.ty) {
          Some(packager) => packager,
          None => continue,
        }
      };

      let sources: Vec<PackagedSource> = bundle
        .assets
        .iter()
        .filter_map(|asset_id| {
          let asset = registry.get(*asset_id)?;
          let contents = asset.generated.get(&bundle.ty)?;
          Some(PackagedSource {
            file_path: asset.file_path.clone(),
            contents: contents.clone(),
          })
        })
        .collect();

      let entry_path = bundle
        .entry_asset
        .and_then(|id| registry.get(id))
        .map(|asset| asset.file_path.clone());

      tracing::debug!(bundle = %final_name, "Packaging bundle");
      let packaged = packager
        .package(PackageContext {
          bundle_name: final_name.clone(),
          bundle_type: bundle.ty.clone(),
          sources,
          entry_path,
          options: options.clone(),
          file_system: fs.clone(),
        })
        .await?;

      fs.write(&options.out_dir.join(&final_name), &packaged.contents)?;
      new_hashes.insert(final_name, hash);
    }

    Ok(new_hashes)
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use satchel_core::types::Asset;
  use satchel_core::types::PackageDescriptor;

  use crate::plugins::CssPackager;
  use crate::plugins::JsPackager;

  use super::*;

  fn packagers() -> PackagerRegistry {
    let registry = PackagerRegistry::default();
    registry.add(FileType::Js, Arc::new(JsPackager::default())).unwrap();
    registry.add(FileType::Css, Arc::new(CssPackager::default())).unwrap();
    registry
  }

  fn add_asset(registry: &mut AssetRegistry, path: &str) -> AssetId {
    let (id, _) = registry.get_or_create(
      PathBuf::from(path),
      Arc::new(PackageDescriptor::default()),
    );
    let ty = registry.asset(id).asset_type.clone();
    let asset: &mut Asset = registry.asset_mut(id);
    asset.processed = true;
    asset.hash = Some(hash_string(path));
    asset.generated.insert(ty, format!("/* {path} */"));
    id
  }

  fn link(registry: &mut AssetRegistry, parent: AssetId, child: AssetId, dep: Dependency) {
    let specifier = dep.specifier.clone();
    let asset = registry.asset_mut(parent);
    asset.dependencies.insert(specifier.clone(), dep);
    asset.dep_assets.insert(specifier, child);
  }

  #[test]
  fn trivial_entry_forms_one_bundle() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    let root = tree.root().unwrap();
    assert_eq!(root.ty, FileType::Js);
    assert_eq!(root.entry_asset, Some(a));
    assert_eq!(root.assets.len(), 1);
    assert_eq!(registry.asset(a).parent_bundle, Some(root.id));
  }

  #[test]
  fn static_deps_share_the_entry_bundle() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    link(&mut registry, a, b, Dependency::new("./b.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    assert_eq!(tree.len(), 1);
    let root = tree.root().unwrap();
    assert!(root.assets.contains(&a));
    assert!(root.assets.contains(&b));
    assert!(registry.asset(b).parent_deps.iter().any(|d| d.specifier == "./b.js"));
  }

  #[test]
  fn dynamic_deps_split_into_child_bundles() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    link(&mut registry, a, b, Dependency::dynamic("./b.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    let root = tree.root().unwrap();
    assert!(root.assets.contains(&a));
    assert!(!root.assets.contains(&b));
    assert_eq!(root.child_bundles.len(), 1);

    let child = tree.bundle(root.child_bundles[0]);
    assert_eq!(child.ty, FileType::Js);
    assert_eq!(child.entry_asset, Some(b));
    assert_eq!(registry.asset(b).parent_bundle, Some(child.id));
  }

  #[test]
  fn mixed_types_get_a_sibling_bundle() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let styles = add_asset(&mut registry, "/app/styles.css");
    link(&mut registry, a, styles, Dependency::new("./styles.css"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    let root = tree.root().unwrap();
    assert!(root.assets.contains(&a));
    assert!(!root.assets.contains(&styles));

    let css_sibling = tree.bundle(*root.sibling_bundles.get(&FileType::Css).unwrap());
    assert_eq!(css_sibling.ty, FileType::Css);
    assert!(css_sibling.assets.contains(&styles));
    assert_eq!(css_sibling.base_name, "a.css");

    // Every bundle an asset sits in has a type it generated output for
    for bundle in tree.bundles() {
      for asset_id in &bundle.assets {
        assert!(registry.asset(*asset_id).generated.contains_key(&bundle.ty));
      }
    }
  }

  #[test]
  fn assets_without_a_packager_become_opaque_bundles() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let logo = add_asset(&mut registry, "/app/logo.png");
    // Raw assets have a hash but no generated output
    registry.asset_mut(logo).generated.clear();
    link(&mut registry, a, logo, Dependency::new("./logo.png"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    let root = tree.root().unwrap();
    assert_eq!(root.child_bundles.len(), 1);
    let opaque = tree.bundle(root.child_bundles[0]);
    assert!(opaque.is_opaque);
    assert_eq!(opaque.base_name, "logo.png");
    assert_eq!(opaque.assets.len(), 1);
  }

  #[test]
  fn shared_assets_hoist_to_the_common_ancestor() {
    let mut registry = AssetRegistry::new();
    let root_asset = add_asset(&mut registry, "/app/root.js");
    let x = add_asset(&mut registry, "/app/x.js");
    let y = add_asset(&mut registry, "/app/y.js");
    let shared = add_asset(&mut registry, "/app/shared.js");

    link(&mut registry, root_asset, x, Dependency::dynamic("./x.js"));
    link(&mut registry, root_asset, y, Dependency::dynamic("./y.js"));
    link(&mut registry, x, shared, Dependency::new("./shared.js"));
    link(&mut registry, y, shared, Dependency::new("./shared.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), root_asset, None);

    let root = tree.root().unwrap();
    assert!(
      root.assets.contains(&shared),
      "shared.js hoists to the common ancestor instead of duplicating"
    );

    for child in &root.child_bundles {
      assert!(!tree.bundle(*child).assets.contains(&shared));
    }
    assert_eq!(registry.asset(shared).parent_bundle, Some(root.id));
  }

  #[test]
  fn dynamic_entries_are_never_hoisted_into_their_parent() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    // b is reached both statically and dynamically; the dynamic child's
    // entry stays anchored once created
    link(&mut registry, a, b, Dependency::dynamic("./b.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);
    let root = tree.root().unwrap();
    let child = tree.bundle(root.child_bundles[0]);
    assert_eq!(child.entry_asset, Some(b));
    assert!(!root.assets.contains(&b));
  }

  #[test]
  fn dependency_cycles_terminate_without_double_placement() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    link(&mut registry, a, b, Dependency::new("./b.js"));
    link(&mut registry, b, a, Dependency::new("./a.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    let root = tree.root().unwrap();
    assert_eq!(root.assets.len(), 2);
    assert_eq!(tree.len(), 1);
  }

  #[test]
  fn dynamic_cycles_terminate_via_the_recursion_stack() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    link(&mut registry, a, b, Dependency::dynamic("./b.js"));
    link(&mut registry, b, a, Dependency::new("./a.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    assert_eq!(registry.asset(a).parent_bundle, Some(tree.root().unwrap().id));
  }

  #[test]
  fn name_map_is_deterministic_and_content_addressed() {
    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    link(&mut registry, a, b, Dependency::dynamic("./b.js"));

    let tree = BundleTree::build(&mut registry, &packagers(), a, None);

    let plain = tree.bundle_name_map(&registry, false);
    assert_eq!(plain.get("a.js"), Some(&"a.js".to_string()));
    assert_eq!(plain.get("b.js"), Some(&"b.js".to_string()));

    let hashed = tree.bundle_name_map(&registry, true);
    let hashed_b = hashed.get("b.js").unwrap();
    assert!(hashed_b.starts_with("b."));
    assert!(hashed_b.ends_with(".js"));
    assert_eq!(hashed_b.len(), "b.".len() + 8 + ".js".len());

    // Rebuilding over identical content yields the same names
    for asset_id in registry.ids() {
      registry.asset_mut(asset_id).invalidate_bundle();
    }
    let rebuilt = BundleTree::build(&mut registry, &packagers(), a, None);
    assert_eq!(rebuilt.bundle_name_map(&registry, true), hashed);
  }

  #[tokio::test]
  async fn packaging_skips_bundles_whose_hash_is_unchanged() {
    use satchel_core::types::BundlerOptions;
    use satchel_filesystem::FileSystem;
    use satchel_filesystem::InMemoryFileSystem;

    let mut registry = AssetRegistry::new();
    let a = add_asset(&mut registry, "/app/a.js");
    let b = add_asset(&mut registry, "/app/b.js");
    link(&mut registry, a, b, Dependency::dynamic("./b.js"));

    let packagers = packagers();
    let tree = BundleTree::build(&mut registry, &packagers, a, None);
    let name_map = tree.bundle_name_map(&registry, false);

    let fs: FileSystemRef = Arc::new(InMemoryFileSystem::default());
    let options = Arc::new(
      BundlerOptions::default().resolve_with_env(PathBuf::from("/app"), None),
    );

    let hashes = tree
      .package(&registry, &packagers, &fs, &options, &name_map, &HashMap::new())
      .await
      .unwrap();

    assert!(fs.is_file(Path::new("/app/dist/a.js")));
    assert!(fs.is_file(Path::new("/app/dist/b.js")));
    assert_eq!(hashes.len(), 2);

    // A second pass with the previous hashes rewrites nothing
    let first_mtime = fs.modified(Path::new("/app/dist/a.js")).unwrap();
    let rehashes = tree
      .package(&registry, &packagers, &fs, &options, &name_map, &hashes)
      .await
      .unwrap();
    assert_eq!(rehashes, hashes);
    assert_eq!(fs.modified(Path::new("/app/dist/a.js")).unwrap(), first_mtime);
  }
}
