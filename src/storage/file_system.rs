use std::fs;
use std::path::{Path, PathBuf};

use super::models::{KeysFile, PersistedIndices};
use crate::error::StorageError;

const KEYS_FILE: &str = "keys.json";
const INDICES_FILE: &str = "indices.json";

#[derive(Clone, Debug)]
pub struct Storage {
    base_path: PathBuf,
}

impl Storage {
    /// Create a new storage instance with the default base directory ("./wallet-data")
    pub fn new() -> Self {
        Self {
            base_path: PathBuf::from("./wallet-data"),
        }
    }

    /// Create storage with custom base directory (for testing)
    pub fn new_with_base_dir(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the base directory path for wallet storage
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_path
    }

    /// Create the data directory if it does not exist yet
    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    /// Save the extended public key configuration to disk
    pub fn save_keys(&self, keys: &KeysFile) -> Result<(), StorageError> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(keys)?;
        write_atomically(&self.base_path.join(KEYS_FILE), &json)
    }

    /// Load the extended public key configuration from disk
    pub fn load_keys(&self) -> Result<KeysFile, StorageError> {
        let path = self.base_path.join(KEYS_FILE);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let keys = serde_json::from_str(&contents)?;
        Ok(keys)
    }

    /// Save scan indices (last used indices, far scan cursor) to disk
    pub fn save_indices(&self, indices: &PersistedIndices) -> Result<(), StorageError> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(indices)?;
        write_atomically(&self.base_path.join(INDICES_FILE), &json)
    }

    /// Load scan indices from disk, or return zeroed indices if the file doesn't exist
    pub fn load_indices(&self) -> Result<PersistedIndices, StorageError> {
        let path = self.base_path.join(INDICES_FILE);
        if !path.exists() {
            return Ok(PersistedIndices::default());
        }
        let contents = fs::read_to_string(path)?;
        let indices = serde_json::from_str(&contents)?;
        Ok(indices)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

/// Write through a temp file and rename, so a crash never leaves a torn file.
fn write_atomically(path: &Path, contents: &str) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_indices_load_as_default() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new_with_base_dir(dir.path().join("wallet"));

        assert_eq!(storage.load_indices().unwrap(), PersistedIndices::default());
    }

    #[test]
    fn test_indices_survive_reload() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new_with_base_dir(dir.path().to_path_buf());
        let indices = PersistedIndices {
            last_used_external_index: 5,
            last_used_internal_index: 2,
            far_scan_cursor: 1100,
        };

        storage.save_indices(&indices).unwrap();

        let reopened = Storage::new_with_base_dir(dir.path().to_path_buf());
        assert_eq!(reopened.load_indices().unwrap(), indices);
        assert_eq!(indices.max_used_index(), 5);
    }

    #[test]
    fn test_missing_keys_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new_with_base_dir(dir.path().to_path_buf());

        assert!(matches!(
            storage.load_keys(),
            Err(StorageError::FileNotFound(_))
        ));

        let keys = KeysFile::single_signer("tpubD6NzVbkrYhZ4X");
        storage.save_keys(&keys).unwrap();
        assert_eq!(storage.load_keys().unwrap(), keys);
        assert!(!keys.is_multisig());
    }
}
