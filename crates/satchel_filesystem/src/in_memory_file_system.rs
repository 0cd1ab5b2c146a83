use std::collections::HashMap;
use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::FileSystem;

#[cfg(not(target_os = "windows"))]
fn root_dir() -> PathBuf {
  PathBuf::from("/")
}

#[cfg(target_os = "windows")]
fn root_dir() -> PathBuf {
  PathBuf::from("C:/")
}

/// In memory implementation of a file-system entry
#[derive(Debug)]
enum Entry {
  File { contents: Vec<u8>, mtime_tick: u64 },
  Directory,
}

/// In memory implementation of the `FileSystem` trait, for testing purposes.
///
/// Writes bump a monotonic tick that stands in for the mtime, so freshness
/// checks behave deterministically regardless of clock granularity.
#[derive(Debug)]
pub struct InMemoryFileSystem {
  files: RwLock<HashMap<PathBuf, Entry>>,
  current_working_directory: RwLock<PathBuf>,
  clock: AtomicU64,
}

impl Default for InMemoryFileSystem {
  fn default() -> Self {
    Self {
      files: Default::default(),
      current_working_directory: RwLock::new(root_dir()),
      clock: AtomicU64::new(1),
    }
  }
}

impl InMemoryFileSystem {
  /// Change the current working directory. Used for resolving relative paths.
  pub fn set_current_working_directory(&self, cwd: &Path) {
    let cwd = self.canonicalize_impl(cwd);
    let mut state = self.current_working_directory.write();
    *state = cwd;
  }

  pub fn write_file(&self, path: &Path, contents: impl Into<Vec<u8>>) {
    let path = self.canonicalize_impl(path);
    let tick = self.clock.fetch_add(1, Ordering::SeqCst);
    let mut files = self.files.write();

    let mut dir = path.parent().map(Path::to_path_buf);
    while let Some(parent) = dir {
      files.entry(parent.clone()).or_insert(Entry::Directory);
      dir = parent.parent().map(Path::to_path_buf);
    }

    files.insert(
      path,
      Entry::File {
        contents: contents.into(),
        mtime_tick: tick,
      },
    );
  }

  pub fn create_directory(&self, path: &Path) {
    let path = self.canonicalize_impl(path);
    self.files.write().insert(path, Entry::Directory);
  }

  fn canonicalize_impl(&self, path: &Path) -> PathBuf {
    let cwd = self.current_working_directory.read();
    let mut result = if path.is_absolute() {
      vec![]
    } else {
      cwd.components().collect()
    };

    for component in path.components() {
      match component {
        Component::Prefix(prefix) => {
          result = vec![Component::Prefix(prefix)];
        }
        Component::RootDir => {
          result.push(Component::RootDir);
        }
        Component::CurDir => {}
        Component::ParentDir => {
          result.pop();
        }
        Component::Normal(part) => {
          result.push(Component::Normal(part));
        }
      }
    }

    PathBuf::from_iter(result)
  }
}

impl FileSystem for InMemoryFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    Ok(self.current_working_directory.read().clone())
  }

  fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
    Ok(self.canonicalize_impl(path))
  }

  fn exists(&self, path: &Path) -> bool {
    let path = self.canonicalize_impl(path);
    self.files.read().contains_key(&path)
  }

  fn is_file(&self, path: &Path) -> bool {
    let path = self.canonicalize_impl(path);
    matches!(self.files.read().get(&path), Some(Entry::File { .. }))
  }

  fn is_dir(&self, path: &Path) -> bool {
    let path = self.canonicalize_impl(path);
    matches!(self.files.read().get(&path), Some(Entry::Directory))
  }

  fn create_dir_all(&self, path: &Path) -> io::Result<()> {
    let path = self.canonicalize_impl(path);
    let mut files = self.files.write();

    let mut dir = Some(path);
    while let Some(current) = dir {
      files.entry(current.clone()).or_insert(Entry::Directory);
      dir = current.parent().map(Path::to_path_buf);
    }

    Ok(())
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    let path = self.canonicalize_impl(path);
    match self.files.read().get(&path) {
      Some(Entry::File { contents, .. }) => Ok(contents.clone()),
      Some(Entry::Directory) => Err(io::Error::new(io::ErrorKind::Other, "is a directory")),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "file not found")),
    }
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    let contents = self.read(path)?;
    String::from_utf8(contents).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
  }

  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
    self.write_file(path, contents.to_vec());
    Ok(())
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    let path = self.canonicalize_impl(path);
    match self.files.write().remove(&path) {
      Some(_) => Ok(()),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "file not found")),
    }
  }

  fn modified(&self, path: &Path) -> io::Result<SystemTime> {
    let path = self.canonicalize_impl(path);
    match self.files.read().get(&path) {
      Some(Entry::File { mtime_tick, .. }) => {
        Ok(SystemTime::UNIX_EPOCH + Duration::from_millis(*mtime_tick))
      }
      _ => Err(io::Error::new(io::ErrorKind::NotFound, "file not found")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonicalizes_relative_paths_against_cwd() {
    let fs = InMemoryFileSystem::default();
    fs.set_current_working_directory(Path::new("/app/src"));

    assert_eq!(
      fs.canonicalize(Path::new("./a/../b.js")).unwrap(),
      PathBuf::from("/app/src/b.js")
    );
    assert_eq!(
      fs.canonicalize(Path::new("../lib/c.js")).unwrap(),
      PathBuf::from("/app/lib/c.js")
    );
  }

  #[test]
  fn writes_create_parent_directories() {
    let fs = InMemoryFileSystem::default();
    fs.write_file(Path::new("/app/src/deep/a.js"), "let x = 1;");

    assert!(fs.is_file(Path::new("/app/src/deep/a.js")));
    assert!(fs.is_dir(Path::new("/app/src/deep")));
    assert!(fs.is_dir(Path::new("/app/src")));
    assert_eq!(
      fs.read_to_string(Path::new("/app/src/deep/a.js")).unwrap(),
      "let x = 1;"
    );
  }

  #[test]
  fn rewrites_bump_the_mtime() {
    let fs = InMemoryFileSystem::default();
    let path = Path::new("/app/a.js");

    fs.write_file(path, "1");
    let first = fs.modified(path).unwrap();
    fs.write_file(path, "2");
    let second = fs.modified(path).unwrap();

    assert!(second > first);
  }
}
