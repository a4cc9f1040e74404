//! Model file discovery.
//!
//! Walks a model directory and returns every file the [`ModelStore`]
//! recognizes as a correction model, in byte-wise sorted path order so that
//! handle assignment is reproducible across runs.

use std::path::{Path, PathBuf};

use geocorr_abstraction::{ModelStore, MODEL_CLASS_NAME};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};

/// File whose presence marks a directory as a model definition bundle.
pub const BUNDLE_DESCRIPTOR: &str = "prediction_model.geotess";

/// Subdirectory of a model definition bundle that holds the correction models.
pub const BUNDLE_MODEL_DIRECTORY: &str = "libcorr3d_delta_ak135";

/// Resolves the directory that should actually be scanned.
///
/// A plain model directory is returned unchanged. A model definition bundle
/// (a directory containing [`BUNDLE_DESCRIPTOR`]) is replaced by its
/// [`BUNDLE_MODEL_DIRECTORY`] subdirectory.
///
/// # Errors
/// Returns an error if `root` does not exist, is not a directory, or is a
/// bundle without a model subdirectory.
pub fn effective_root(root: &Path) -> Result<PathBuf> {
    if !root.exists() {
        return Err(LibraryError::DirectoryNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(LibraryError::NotADirectory(root.to_path_buf()));
    }

    if root.join(BUNDLE_DESCRIPTOR).exists() {
        let models = root.join(BUNDLE_MODEL_DIRECTORY);
        if !models.is_dir() {
            return Err(LibraryError::MissingBundleDirectory {
                root: root.to_path_buf(),
                expected: BUNDLE_MODEL_DIRECTORY,
            });
        }
        debug!(
            root = %root.display(),
            models = %models.display(),
            "Model definition bundle detected"
        );
        return Ok(models);
    }

    Ok(root.to_path_buf())
}

/// Scans a directory tree for correction model files.
pub struct DirectoryScanner<'a, S: ModelStore> {
    store: &'a S,
}

impl<'a, S: ModelStore> DirectoryScanner<'a, S> {
    /// Create a scanner that classifies files with `store`.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Returns every model file under `root`, sorted by full path.
    ///
    /// Unreadable entries and files of any other class are skipped silently;
    /// discovery is best effort, not validation.
    ///
    /// # Errors
    /// Returns an error only if `root` itself is unusable (see [`effective_root`]).
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let root = effective_root(root)?;

        let mut files: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| self.is_model(path))
            .collect();

        files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

        debug!(root = %root.display(), count = files.len(), "Discovered model files");
        Ok(files)
    }

    fn is_model(&self, path: &Path) -> bool {
        match self.store.class_name(path) {
            Some(class) if class == MODEL_CLASS_NAME => true,
            other => {
                debug!(path = %path.display(), class = ?other, "Skipping non-model file");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockModelFile, MockModelStore};
    use geocorr_abstraction::Station;
    use std::fs;
    use tempfile::TempDir;

    fn write_model(dir: &Path, name: &str) {
        MockModelFile::new(Station::new("STA", 0.0, 0.0), &["P"], "TT_DELTA_AK135")
            .write(&dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("b").join("deep");
        fs::create_dir_all(&nested).unwrap();

        write_model(temp.path(), "z.toml");
        write_model(temp.path(), "a.toml");
        write_model(&nested, "m.toml");
        fs::write(temp.path().join("notes.txt"), "not a model").unwrap();
        fs::write(temp.path().join("other.toml"), "class = \"GeoTessModel\"\n").unwrap();

        let store = MockModelStore::new();
        let files = DirectoryScanner::new(&store).scan(temp.path()).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(temp.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.toml", "b/deep/m.toml", "z.toml"]);
    }

    #[test]
    fn test_scan_missing_root() {
        let temp = TempDir::new().unwrap();
        let store = MockModelStore::new();
        let err = DirectoryScanner::new(&store)
            .scan(&temp.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, LibraryError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_scan_root_is_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.toml");
        write_model(temp.path(), "file.toml");

        let store = MockModelStore::new();
        let err = DirectoryScanner::new(&store).scan(&file).unwrap_err();
        assert!(matches!(err, LibraryError::NotADirectory(_)));
    }

    #[test]
    fn test_bundle_root_substitution() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(BUNDLE_DESCRIPTOR), "bundle").unwrap();
        let models = temp.path().join(BUNDLE_MODEL_DIRECTORY);
        fs::create_dir_all(&models).unwrap();
        write_model(&models, "inside.toml");
        write_model(temp.path(), "outside.toml");

        assert_eq!(effective_root(temp.path()).unwrap(), models);

        let store = MockModelStore::new();
        let files = DirectoryScanner::new(&store).scan(temp.path()).unwrap();
        assert_eq!(files, vec![models.join("inside.toml")]);
    }

    #[test]
    fn test_bundle_without_model_directory() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(BUNDLE_DESCRIPTOR), "bundle").unwrap();

        let err = effective_root(temp.path()).unwrap_err();
        assert!(matches!(err, LibraryError::MissingBundleDirectory { .. }));
    }
}
