use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use satchel_core::hash::hash_bytes;
use satchel_core::plugin::TransformContext;
use satchel_core::plugin::Transformer;
use satchel_core::types::CacheData;
use satchel_core::types::Dependency;
use satchel_core::types::FileType;
use satchel_core::types::ProcessedAsset;
use satchel_core::types::SourceLocation;
use satchel_filesystem::FileSystem;

static STATIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?m)^\s*(?:import|export)\s+(?:[\w$*{},\s]+\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static REQUIRE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static DYNAMIC_IMPORT: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"import\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static CSS_IMPORT: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"@import\s+(?:url\(\s*)?['"]([^'"]+)['"]\s*\)?"#).unwrap());

fn loc_at(contents: &str, offset: usize) -> SourceLocation {
  let before = &contents[..offset];
  let line = before.matches('\n').count() as u32 + 1;
  let column = before
    .rfind('\n')
    .map(|idx| offset - idx)
    .unwrap_or(offset + 1) as u32;
  SourceLocation { line, column }
}

fn scan(contents: &str, patterns: &[(&Regex, bool)]) -> Vec<Dependency> {
  let mut found: Vec<(usize, Dependency)> = Vec::new();

  for (pattern, dynamic) in patterns {
    for captures in pattern.captures_iter(contents) {
      let spec = captures.get(1).unwrap();
      found.push((
        spec.start(),
        Dependency {
          specifier: spec.as_str().to_string(),
          loc: Some(loc_at(contents, spec.start())),
          dynamic: *dynamic,
          ..Dependency::default()
        },
      ));
    }
  }

  // Declaration order, first mention wins
  found.sort_by_key(|(offset, _)| *offset);
  let mut dependencies: Vec<Dependency> = Vec::new();
  for (_, dep) in found {
    if !dependencies.iter().any(|d| d.specifier == dep.specifier) {
      dependencies.push(dep);
    }
  }
  dependencies
}

/// Scans script sources for import/require/dynamic-import specifiers.
///
/// This is deliberately not a parser: the transform pipeline is a black box
/// to the orchestration core, and this transformer only recovers the
/// dependency edges and passes source through.
#[derive(Debug, Default)]
pub struct JsTransformer {}

#[async_trait]
impl Transformer for JsTransformer {
  async fn transform(&self, context: TransformContext) -> anyhow::Result<ProcessedAsset> {
    let contents = context.file_system.read_to_string(&context.file_path)?;

    let dependencies = scan(
      &contents,
      &[
        (&STATIC_IMPORT, false),
        (&REQUIRE, false),
        (&DYNAMIC_IMPORT, true),
      ],
    );

    Ok(ProcessedAsset {
      hash: hash_bytes(contents.as_bytes()),
      generated: [(FileType::Js, contents)].into_iter().collect(),
      dependencies,
      cache_data: CacheData::default(),
    })
  }
}

#[derive(Debug, Default)]
pub struct CssTransformer {}

#[async_trait]
impl Transformer for CssTransformer {
  async fn transform(&self, context: TransformContext) -> anyhow::Result<ProcessedAsset> {
    let contents = context.file_system.read_to_string(&context.file_path)?;

    let dependencies = scan(&contents, &[(&CSS_IMPORT, false)]);

    Ok(ProcessedAsset {
      hash: hash_bytes(contents.as_bytes()),
      generated: [(FileType::Css, contents)].into_iter().collect(),
      dependencies,
      cache_data: CacheData::default(),
    })
  }
}

/// Fallback for types without a registered transformer: hash the bytes,
/// produce no generated output and no dependencies. The bundle-tree builder
/// emits such assets through an opaque bundle.
#[derive(Debug, Default)]
pub struct RawTransformer {}

#[async_trait]
impl Transformer for RawTransformer {
  async fn transform(&self, context: TransformContext) -> anyhow::Result<ProcessedAsset> {
    let contents = context.file_system.read(&context.file_path)?;

    Ok(ProcessedAsset {
      hash: hash_bytes(&contents),
      ..ProcessedAsset::default()
    })
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Arc;

  use satchel_core::types::BundlerOptions;
  use satchel_core::types::PackageDescriptor;
  use satchel_filesystem::InMemoryFileSystem;

  use super::*;

  fn context(path: &str, contents: &str) -> TransformContext {
    let fs = InMemoryFileSystem::default();
    fs.write_file(std::path::Path::new(path), contents);

    TransformContext {
      file_path: PathBuf::from(path),
      package: Arc::new(PackageDescriptor::default()),
      options: Arc::new(
        BundlerOptions::default().resolve_with_env(PathBuf::from("/app"), None),
      ),
      file_system: Arc::new(fs),
    }
  }

  #[tokio::test]
  async fn finds_imports_in_declaration_order() {
    let source = r#"
import { a } from './a.js';
import './side-effect.css';
const b = require('./b.js');
export { c } from './c.js';
"#;
    let processed = JsTransformer::default()
      .transform(context("/app/entry.js", source))
      .await
      .unwrap();

    let specifiers: Vec<&str> = processed
      .dependencies
      .iter()
      .map(|d| d.specifier.as_str())
      .collect();
    assert_eq!(
      specifiers,
      vec!["./a.js", "./side-effect.css", "./b.js", "./c.js"]
    );
    assert!(processed.dependencies.iter().all(|d| !d.dynamic));
    assert!(processed.dependencies.iter().all(|d| d.loc.is_some()));
  }

  #[tokio::test]
  async fn dynamic_imports_are_flagged() {
    let source = "const page = import('./page.js');\n";
    let processed = JsTransformer::default()
      .transform(context("/app/entry.js", source))
      .await
      .unwrap();

    assert_eq!(processed.dependencies.len(), 1);
    assert!(processed.dependencies[0].dynamic);
    assert_eq!(processed.dependencies[0].specifier, "./page.js");
  }

  #[tokio::test]
  async fn css_imports_are_discovered() {
    let source = "@import './reset.css';\n@import url('theme.css');\nbody { margin: 0 }\n";
    let processed = CssTransformer::default()
      .transform(context("/app/styles.css", source))
      .await
      .unwrap();

    let specifiers: Vec<&str> = processed
      .dependencies
      .iter()
      .map(|d| d.specifier.as_str())
      .collect();
    assert_eq!(specifiers, vec!["./reset.css", "theme.css"]);
    assert!(processed.generated.contains_key(&FileType::Css));
  }

  #[tokio::test]
  async fn raw_transform_hashes_without_output() {
    let processed = RawTransformer::default()
      .transform(context("/app/logo.png", "not really a png"))
      .await
      .unwrap();

    assert!(processed.generated.is_empty());
    assert!(processed.dependencies.is_empty());
    assert!(!processed.hash.is_empty());
  }
}
