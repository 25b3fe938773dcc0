use std::io;
use std::path::{Component, Path, PathBuf};

use crate::fs::FileSystem;

/// Creates every missing component of `path`, chowning each directory this
/// call creates. Already-existing components are left untouched.
pub fn mkdir_all_with_chown(
  fs: &dyn FileSystem,
  path: &Path,
  mode: u32,
  uid: u32,
  gid: u32,
) -> io::Result<()> {
  let absolute = if path.is_absolute() {
    path.to_path_buf()
  } else {
    std::env::current_dir()?.join(path)
  };

  let mut current = PathBuf::new();
  for component in absolute.components() {
    current.push(component.as_os_str());
    if matches!(component, Component::RootDir | Component::Prefix(_)) {
      continue;
    }
    if fs.exists(&current) {
      continue;
    }
    fs.mkdir(&current, mode)?;
    fs.chown(&current, uid, gid)?;
  }

  Ok(())
}
