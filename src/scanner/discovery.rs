use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Whether `path` has one of `extensions` (case-insensitive, without the dot).
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
}

/// Recursively list image files under `directory`, sorted by path.
/// Unreadable entries are skipped.
pub fn discover_images(directory: &Path, extensions: &[String], follow_links: bool) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(follow_links)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_image_extension(path, extensions))
        .collect();

    images.sort();
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_images() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("photo1.JPG")).unwrap();
        File::create(dir.path().join("photo2.png")).unwrap();
        File::create(dir.path().join("document.txt")).unwrap();
        File::create(dir.path().join("noext")).unwrap();

        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/photo3.jpeg")).unwrap();
        fs::create_dir(dir.path().join("folder.jpg")).unwrap();

        let extensions = vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()];
        let images = discover_images(dir.path(), &extensions, false);

        let names: Vec<_> = images
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["photo1.JPG", "photo2.png", "subdir/photo3.jpeg"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let images = discover_images(&dir.path().join("gone"), &["jpg".to_string()], false);
        assert!(images.is_empty());
    }
}
