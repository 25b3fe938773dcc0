use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::fs::FileSystem;

/// SHA-256 content comparison against on-disk files, used to make storage
/// writes idempotent. A missing file hashes as empty content.
pub struct Checksum {
  fs: Arc<dyn FileSystem>,
}

impl Checksum {
  pub fn new(fs: Arc<dyn FileSystem>) -> Self {
    Checksum { fs }
  }

  pub fn checksum_by_content(&self, content: &[u8]) -> Vec<u8> {
    Sha256::digest(content).to_vec()
  }

  pub fn checksum_by_path(&self, path: &Path) -> std::io::Result<Vec<u8>> {
    let content = self.fs.read(path)?;
    Ok(self.checksum_by_content(&content))
  }

  pub fn must_checksum_by_path(&self, path: &Path) -> Vec<u8> {
    let content = self.fs.read(path).unwrap_or_default();
    self.checksum_by_content(&content)
  }

  /// True iff the content hash equals the hash of the file at `path`.
  pub fn must_compare_content_with_path(&self, content: &[u8], path: &Path) -> bool {
    self.checksum_by_content(content) == self.must_checksum_by_path(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::MemoryFs;

  #[test]
  fn test_checksum_by_content() {
    let checksum = Checksum::new(Arc::new(MemoryFs::new()));
    assert_eq!(32, checksum.checksum_by_content(b"content").len());
    assert_eq!(
      checksum.checksum_by_content(b"content"),
      checksum.checksum_by_content(b"content")
    );
    assert_ne!(
      checksum.checksum_by_content(b"content"),
      checksum.checksum_by_content(b"other")
    );
  }

  #[test]
  fn test_compare_content_with_path() {
    let fs = Arc::new(MemoryFs::new());
    let path = Path::new("/app/test.txt");
    fs.write(path, b"content", 0o660).unwrap();

    let checksum = Checksum::new(fs);
    assert!(checksum.must_compare_content_with_path(b"content", path));
    assert!(!checksum.must_compare_content_with_path(b"other", path));
  }

  #[test]
  fn test_compare_with_missing_path() {
    let checksum = Checksum::new(Arc::new(MemoryFs::new()));
    let path = Path::new("/app/missing.txt");
    assert!(!checksum.must_compare_content_with_path(b"content", path));
    // Missing files read as empty content.
    assert!(checksum.must_compare_content_with_path(b"", path));
  }

  #[test]
  fn test_checksum_by_path_missing() {
    let checksum = Checksum::new(Arc::new(MemoryFs::new()));
    assert!(checksum.checksum_by_path(Path::new("/app/missing.txt")).is_err());
  }
}
