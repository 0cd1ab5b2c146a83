use anyhow::Context;
use async_trait::async_trait;

use satchel_core::plugin::PackageContext;
use satchel_core::plugin::PackagedBundle;
use satchel_core::plugin::Packager;
use satchel_filesystem::FileSystem;

/// Concatenates the generated script of every member asset.
///
/// Producing a runtime module loader is out of scope; members are emitted in
/// bundle order separated by statement boundaries.
#[derive(Debug, Default)]
pub struct JsPackager {}

#[async_trait]
impl Packager for JsPackager {
  async fn package(&self, ctx: PackageContext) -> anyhow::Result<PackagedBundle> {
    let mut output = String::new();

    for source in &ctx.sources {
      output.push_str(&format!("// {}\n", source.file_path.display()));
      output.push_str(source.contents.trim_end());
      output.push_str("\n;\n");
    }

    Ok(PackagedBundle {
      contents: output.into_bytes(),
    })
  }
}

#[derive(Debug, Default)]
pub struct CssPackager {}

#[async_trait]
impl Packager for CssPackager {
  async fn package(&self, ctx: PackageContext) -> anyhow::Result<PackagedBundle> {
    let mut output = String::new();

    for source in &ctx.sources {
      output.push_str(source.contents.trim_end());
      output.push('\n');
    }

    Ok(PackagedBundle {
      contents: output.into_bytes(),
    })
  }
}

/// Copies the entry file of an opaque bundle byte-for-byte
#[derive(Debug, Default)]
pub struct RawPackager {}

#[async_trait]
impl Packager for RawPackager {
  async fn package(&self, ctx: PackageContext) -> anyhow::Result<PackagedBundle> {
    let entry_path = ctx
      .entry_path
      .as_ref()
      .context("Opaque bundle has no entry path")?;
    let contents = ctx.file_system.read(entry_path)?;

    Ok(PackagedBundle { contents })
  }
}
