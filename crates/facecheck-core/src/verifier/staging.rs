use crate::jpeg::JpegImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Two images written to request-unique files, removed on drop.
///
/// Files are named `<uuid>-1.jpg` / `<uuid>-2.jpg`, so concurrent requests
/// sharing a scratch directory never touch each other's input. Removal
/// happens on every exit path, including a failed write of the second file.
#[derive(Debug)]
pub struct StagedPair {
    paths: [PathBuf; 2],
}

impl StagedPair {
    pub fn write(dir: &Path, first: &JpegImage, second: &JpegImage) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let staged = Self {
            paths: [
                dir.join(format!("{id}-1.jpg")),
                dir.join(format!("{id}-2.jpg")),
            ],
        };
        fs::write(&staged.paths[0], first.as_bytes())?;
        fs::write(&staged.paths[1], second.as_bytes())?;
        tracing::debug!(first = %staged.paths[0].display(), "staged verification inputs");
        Ok(staged)
    }

    pub fn first(&self) -> &Path {
        &self.paths[0]
    }

    pub fn second(&self) -> &Path {
        &self.paths[1]
    }
}

impl Drop for StagedPair {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove staged image")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn tiny_jpeg() -> JpegImage {
        JpegImage::encode(&RgbImage::new(2, 2), 75).unwrap()
    }

    #[test]
    fn test_write_then_drop_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let image = tiny_jpeg();

        let staged = StagedPair::write(dir.path(), &image, &image).unwrap();
        let (a, b) = (staged.first().to_path_buf(), staged.second().to_path_buf());
        assert_eq!(fs::read(&a).unwrap(), image.as_bytes());
        assert!(b.exists());
        assert_ne!(a, b);

        drop(staged);
        assert!(!a.exists() && !b.exists());
    }

    #[test]
    fn test_pairs_get_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let image = tiny_jpeg();
        let one = StagedPair::write(dir.path(), &image, &image).unwrap();
        let two = StagedPair::write(dir.path(), &image, &image).unwrap();
        assert_ne!(one.first(), two.first());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 4);
    }

    #[test]
    fn test_missing_directory_fails_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let image = tiny_jpeg();
        assert!(StagedPair::write(&missing, &image, &image).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn test_drop_tolerates_externally_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        let image = tiny_jpeg();
        let staged = StagedPair::write(dir.path(), &image, &image).unwrap();
        fs::remove_file(staged.first()).unwrap();
        drop(staged);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
