use anyhow::{Context, Result};

use crate::db::PhotoRecord;

/// Where a worker gets image bytes from. A cloud-drive client implements this
/// to feed remote files into the same pipeline.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, photo: &PhotoRecord) -> Result<Vec<u8>>;
}

/// Reads the photo's `path` from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSource;

impl ImageSource for LocalFileSource {
    fn fetch(&self, photo: &PhotoRecord) -> Result<Vec<u8>> {
        std::fs::read(&photo.path).with_context(|| format!("Failed to read {}", photo.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_local_file_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"bytes").unwrap();

        let photo = PhotoRecord::new("a", "a.jpg", path.to_string_lossy(), 0);
        assert_eq!(LocalFileSource.fetch(&photo).unwrap(), b"bytes");

        let missing = PhotoRecord::new("b", "b.jpg", dir.path().join("b.jpg").to_string_lossy(), 0);
        assert!(LocalFileSource.fetch(&missing).is_err());
    }
}
