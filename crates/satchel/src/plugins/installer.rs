use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use anyhow::anyhow;

use satchel_core::plugin::PackageManager;

/// Installs missing packages by shelling out to npm in the project root
#[derive(Debug)]
pub struct NpmInstaller {
  project_root: PathBuf,
}

impl NpmInstaller {
  pub fn new(project_root: PathBuf) -> Self {
    NpmInstaller { project_root }
  }
}

impl PackageManager for NpmInstaller {
  fn install(&self, package_name: &str, _from: &Path) -> anyhow::Result<()> {
    tracing::info!(%package_name, "Running npm install");

    let status = Command::new("npm")
      .arg("install")
      .arg(package_name)
      .current_dir(&self.project_root)
      .status()?;

    if !status.success() {
      return Err(anyhow!(
        "npm install '{package_name}' exited with {status}"
      ));
    }

    Ok(())
  }
}
