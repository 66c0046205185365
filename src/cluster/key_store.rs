//! Directory-backed store of named public keys

use crate::error::{Result, VindError};
use std::path::{Path, PathBuf};

/// Public keys stored one file per name under a base directory
#[derive(Debug, Clone)]
pub struct KeyStore {
    base_path: PathBuf,
}

impl KeyStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Base directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create the store directory if needed
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path)
            .map_err(|e| VindError::KeyStore(format!("init: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.base_path, std::fs::Permissions::from_mode(0o760))
                .map_err(|e| VindError::KeyStore(format!("init: {}", e)))?;
        }
        Ok(())
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn key_exists(&self, name: &str) -> bool {
        self.key_path(name).exists()
    }

    /// Add a key; an existing name is never overwritten
    pub fn store(&self, name: &str, key: &str) -> Result<()> {
        if self.key_exists(name) {
            return Err(VindError::KeyStore(format!(
                "store: key '{}' already exists",
                name
            )));
        }
        std::fs::write(self.key_path(name), key)
            .map_err(|e| VindError::KeyStore(format!("write: {}", e)))
    }

    /// Read a key
    pub fn get(&self, name: &str) -> Result<Vec<u8>> {
        if !self.key_exists(name) {
            return Err(VindError::KeyStore(format!("get: unknown key '{}'", name)));
        }
        Ok(std::fs::read(self.key_path(name))?)
    }

    /// Delete a key
    pub fn remove(&self, name: &str) -> Result<()> {
        if !self.key_exists(name) {
            return Err(VindError::KeyStore(format!(
                "remove: unknown key '{}'",
                name
            )));
        }
        std::fs::remove_file(self.key_path(name))
            .map_err(|e| VindError::KeyStore(format!("remove: {}", e)))
    }
}
