use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

pub type FileSystemRef = Arc<dyn FileSystem + Send + Sync>;

pub trait FileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    unimplemented!()
  }

  fn canonicalize(&self, _path: &Path) -> io::Result<PathBuf> {
    unimplemented!()
  }

  fn exists(&self, _path: &Path) -> bool {
    unimplemented!()
  }

  fn is_file(&self, _path: &Path) -> bool {
    unimplemented!()
  }

  fn is_dir(&self, _path: &Path) -> bool {
    unimplemented!()
  }

  fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
    unimplemented!()
  }

  fn read(&self, _path: &Path) -> io::Result<Vec<u8>> {
    unimplemented!()
  }

  fn read_to_string(&self, _path: &Path) -> io::Result<String> {
    unimplemented!()
  }

  fn write(&self, _path: &Path, _contents: &[u8]) -> io::Result<()> {
    unimplemented!()
  }

  fn remove_file(&self, _path: &Path) -> io::Result<()> {
    unimplemented!()
  }

  fn modified(&self, _path: &Path) -> io::Result<SystemTime> {
    unimplemented!()
  }
}
