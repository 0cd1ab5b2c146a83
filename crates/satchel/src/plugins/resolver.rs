use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use satchel_core::plugin::get_module_parts;
use satchel_core::plugin::Resolution;
use satchel_core::plugin::ResolveError;
use satchel_core::plugin::Resolver;
use satchel_core::types::PackageDescriptor;
use satchel_filesystem::FileSystem;
use satchel_filesystem::FileSystemRef;

const EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "css", "json", "html", "wasm"];

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
  name: Option<String>,
  version: Option<String>,
  main: Option<String>,
}

/// Resolves specifiers against the file system.
///
/// Relative specifiers resolve from the importing file, `/` and `~` from the
/// project root, and bare specifiers through `node_modules` directories up
/// the ancestor chain, honoring the package.json `main` field.
pub struct PathResolver {
  fs: FileSystemRef,
  project_root: PathBuf,
}

impl std::fmt::Debug for PathResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PathResolver")
      .field("project_root", &self.project_root)
      .finish()
  }
}

impl PathResolver {
  pub fn new(fs: FileSystemRef, project_root: PathBuf) -> Self {
    PathResolver { fs, project_root }
  }

  fn resolve_path(&self, base: &Path) -> Option<PathBuf> {
    if self.fs.is_file(base) {
      return self.canonical(base);
    }

    for ext in EXTENSIONS {
      let candidate = PathBuf::from(format!("{}.{ext}", base.to_string_lossy()));
      if self.fs.is_file(&candidate) {
        return self.canonical(&candidate);
      }
    }

    if self.fs.is_dir(base) {
      for ext in EXTENSIONS {
        let candidate = base.join(format!("index.{ext}"));
        if self.fs.is_file(&candidate) {
          return self.canonical(&candidate);
        }
      }
    }

    None
  }

  fn canonical(&self, path: &Path) -> Option<PathBuf> {
    Some(
      self
        .fs
        .canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf()),
    )
  }

  fn resolve_node_module(&self, specifier: &str, parent: &Path) -> Option<PathBuf> {
    let (module, subpath) = get_module_parts(specifier);

    for dir in parent.ancestors().skip(1) {
      let module_dir = dir.join("node_modules").join(&module);
      if !self.fs.is_dir(&module_dir) {
        continue;
      }

      if let Some(subpath) = &subpath {
        return self.resolve_path(&module_dir.join(subpath));
      }

      let package_json = module_dir.join("package.json");
      if self.fs.is_file(&package_json) {
        if let Ok(contents) = self.fs.read_to_string(&package_json) {
          if let Ok(package) = serde_json::from_str::<PackageJson>(&contents) {
            if let Some(main) = package.main {
              if let Some(resolved) = self.resolve_path(&module_dir.join(main)) {
                return Some(resolved);
              }
            }
          }
        }
      }

      return self.resolve_path(&module_dir);
    }

    None
  }

  fn load_package(&self, file_path: &Path) -> Arc<PackageDescriptor> {
    for dir in file_path.ancestors().skip(1) {
      let package_json = dir.join("package.json");
      if !self.fs.is_file(&package_json) {
        continue;
      }

      let package = self
        .fs
        .read_to_string(&package_json)
        .ok()
        .and_then(|contents| serde_json::from_str::<PackageJson>(&contents).ok())
        .unwrap_or_default();

      return Arc::new(PackageDescriptor {
        name: package.name,
        version: package.version,
        main: package.main,
        package_dir: dir.to_path_buf(),
      });
    }

    Arc::new(PackageDescriptor::default())
  }
}

#[async_trait]
impl Resolver for PathResolver {
  async fn resolve(&self, specifier: &str, parent: &Path) -> anyhow::Result<Resolution> {
    let resolved = if specifier.starts_with('.') {
      let parent_dir = parent.parent().unwrap_or(&self.project_root);
      self.resolve_path(&parent_dir.join(specifier))
    } else if let Some(rooted) = specifier.strip_prefix('/') {
      // Entry paths arrive absolute; try them as files first, then fall
      // back to project-root-relative lookup
      self
        .resolve_path(Path::new(specifier))
        .or_else(|| self.resolve_path(&self.project_root.join(rooted)))
    } else if let Some(rooted) = specifier.strip_prefix('~') {
      let rooted = rooted.strip_prefix('/').unwrap_or(rooted);
      self.resolve_path(&self.project_root.join(rooted))
    } else {
      self.resolve_node_module(specifier, parent)
    };

    match resolved {
      Some(file_path) => {
        let package = self.load_package(&file_path);
        Ok(Resolution { file_path, package })
      }
      None => Err(anyhow::Error::new(ResolveError::NotFound {
        specifier: specifier.to_string(),
        from: parent.to_path_buf(),
      })),
    }
  }
}
