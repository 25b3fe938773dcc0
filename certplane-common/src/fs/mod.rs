pub mod checksum;
pub mod dir;

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The filesystem seam used by storages and state persistence. Production
/// code goes through `OsFs`; tests use the in-memory `MemoryFs`.
pub trait FileSystem: Send + Sync {
  fn exists(&self, path: &Path) -> bool;
  fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
  fn write(&self, path: &Path, content: &[u8], mode: u32) -> io::Result<()>;
  fn remove(&self, path: &Path) -> io::Result<()>;
  fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;
  fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
  fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>>;
}

/// The operating system filesystem.
pub struct OsFs;

impl FileSystem for OsFs {
  fn exists(&self, path: &Path) -> bool {
    path.exists()
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
  }

  #[allow(unused_variables)]
  fn write(&self, path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
      use std::os::unix::fs::OpenOptionsExt;
      options.mode(mode);
    }
    let mut file = options.open(path)?;
    file.write_all(content)
  }

  fn remove(&self, path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
  }

  #[allow(unused_variables)]
  fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
      use std::os::unix::fs::DirBuilderExt;
      return std::fs::DirBuilder::new().mode(mode).create(path);
    }
    #[cfg(not(unix))]
    std::fs::create_dir(path)
  }

  #[allow(unused_variables)]
  fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    #[cfg(unix)]
    return std::os::unix::fs::chown(path, Some(uid), Some(gid));
    #[cfg(not(unix))]
    Ok(())
  }

  fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
      .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?
      .filter_map(|entry| entry.ok())
      .collect();
    Ok(paths)
  }
}

#[derive(Default)]
struct MemoryFsInner {
  files: HashMap<PathBuf, Vec<u8>>,
  dirs: HashSet<PathBuf>,
  owners: HashMap<PathBuf, (u32, u32)>,
  writes: Vec<PathBuf>,
}

/// An in-memory filesystem fake. Tracks writes and ownership changes so
/// tests can assert on idempotency and permissions.
#[derive(Default)]
pub struct MemoryFs {
  inner: Mutex<MemoryFsInner>,
}

impl MemoryFs {
  pub fn new() -> Self {
    MemoryFs::default()
  }

  pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
    self.inner.lock().unwrap().files.get(path.as_ref()).cloned()
  }

  pub fn owner(&self, path: impl AsRef<Path>) -> Option<(u32, u32)> {
    self.inner.lock().unwrap().owners.get(path.as_ref()).copied()
  }

  /// Number of times the given path has been written.
  pub fn write_count(&self, path: impl AsRef<Path>) -> usize {
    let path = path.as_ref();
    self
      .inner
      .lock()
      .unwrap()
      .writes
      .iter()
      .filter(|written| written.as_path() == path)
      .count()
  }
}

impl FileSystem for MemoryFs {
  fn exists(&self, path: &Path) -> bool {
    let inner = self.inner.lock().unwrap();
    inner.files.contains_key(path) || inner.dirs.contains(path)
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    self
      .inner
      .lock()
      .unwrap()
      .files
      .get(path)
      .cloned()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display())))
  }

  fn write(&self, path: &Path, content: &[u8], _mode: u32) -> io::Result<()> {
    let mut inner = self.inner.lock().unwrap();
    inner.files.insert(path.to_path_buf(), content.to_vec());
    inner.writes.push(path.to_path_buf());
    Ok(())
  }

  fn remove(&self, path: &Path) -> io::Result<()> {
    self
      .inner
      .lock()
      .unwrap()
      .files
      .remove(path)
      .map(|_| ())
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display())))
  }

  fn mkdir(&self, path: &Path, _mode: u32) -> io::Result<()> {
    self.inner.lock().unwrap().dirs.insert(path.to_path_buf());
    Ok(())
  }

  fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    self
      .inner
      .lock()
      .unwrap()
      .owners
      .insert(path.to_path_buf(), (uid, gid));
    Ok(())
  }

  fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>> {
    let matcher = glob::Pattern::new(pattern)
      .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let inner = self.inner.lock().unwrap();
    let mut paths: Vec<PathBuf> = inner
      .files
      .keys()
      .filter(|path| matcher.matches_path(path))
      .cloned()
      .collect();
    paths.sort();
    Ok(paths)
  }
}
