//! MMS persistence layer
//!
//! Saves the MMS context (signers, messages, formation, options) and the
//! local wallet as JSON files in the data directory.

use crate::mms::MmsContext;
use crate::wallet::{LocalWallet, WalletError};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub state_file: String,
    pub wallet_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".mms_data"),
            state_file: "mms.json".to_string(),
            wallet_file: "wallet.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// MMS storage manager
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.state_file)
    }

    fn wallet_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.wallet_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.state_file, index))
    }

    /// Save the MMS state to disk
    pub fn save(&self, context: &MmsContext) -> Result<(), StorageError> {
        let path = self.state_path();

        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        // Write to temporary file first
        let temp_path = self.config.data_dir.join("mms.tmp");
        let file = fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, context)?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;
        log::debug!("Saved MMS state to {:?}", path);
        Ok(())
    }

    /// Load the MMS state from disk
    pub fn load(&self) -> Result<MmsContext, StorageError> {
        let path = self.state_path();
        if !path.exists() {
            return Err(StorageError::InvalidData("MMS state file not found".to_string()));
        }
        load_from_file(&path)
    }

    /// Load the saved state, or a fresh inactive one
    pub fn load_or_default(&self) -> Result<MmsContext, StorageError> {
        if self.exists() {
            self.load()
        } else {
            Ok(MmsContext::new())
        }
    }

    /// Check if a saved state exists
    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    /// Delete the saved state
    pub fn delete(&self) -> Result<(), StorageError> {
        let path = self.state_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rotate_backups(&self) -> Result<(), StorageError> {
        // Delete oldest backup
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        // Shift existing backups
        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    /// Load a backup; 0 is the most recent
    pub fn restore_backup(&self, backup_index: usize) -> Result<MmsContext, StorageError> {
        let backup_path = self.backup_path(backup_index);
        if !backup_path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }
        load_from_file(&backup_path)
    }

    /// List available backups
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }

    pub fn wallet_exists(&self) -> bool {
        self.wallet_path().exists()
    }

    pub fn save_wallet(&self, wallet: &LocalWallet) -> Result<(), StorageError> {
        wallet.save(&self.wallet_path())?;
        Ok(())
    }

    pub fn load_wallet(&self) -> Result<LocalWallet, StorageError> {
        Ok(LocalWallet::load(&self.wallet_path())?)
    }

    /// Write raw message content to `name` in the data directory
    pub fn export(&self, name: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| StorageError::InvalidData(format!("invalid file name {}", name)))?;
        let path = self.config.data_dir.join(file_name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let path = self.state_path();
        let file_size = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };

        Ok(StorageStats {
            file_size,
            backup_count: self.list_backups().len(),
            data_dir: self.config.data_dir.clone(),
        })
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub file_size: u64,
    pub backup_count: usize,
    pub data_dir: PathBuf,
}

/// Load MMS state from a specific file path
pub fn load_from_file(path: &Path) -> Result<MmsContext, StorageError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mms::{MessageDirection, MessageState, MessageType};
    use crate::wallet::MultisigBackend;

    fn storage(dir: &tempfile::TempDir, max_backups: usize) -> Storage {
        Storage::new(StorageConfig {
            data_dir: dir.path().to_path_buf(),
            max_backups,
            ..Default::default()
        })
        .unwrap()
    }

    fn context() -> MmsContext {
        let mut ctx = MmsContext::new();
        ctx.init(2, 3, "Alice", "alice@mem", "1Alice", false).unwrap();
        ctx
    }

    #[test]
    fn test_save_load_context() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = storage(&temp_dir, 5);
        assert!(matches!(storage.load(), Err(StorageError::InvalidData(_))));
        assert!(!storage.load_or_default().unwrap().is_active());

        let mut ctx = context();
        ctx.options.auto_send = true;
        let ids = ctx
            .process_wallet_created_data(crate::mms::WalletOutput::KeySet(vec![0, 1, 255]), 3)
            .unwrap();
        ctx.store_mut().mark_sent(ids[0]).unwrap();
        ctx.store_mut().delete(ids[1]).unwrap();

        storage.save(&ctx).unwrap();
        assert!(storage.exists());

        let loaded = storage.load().unwrap();
        assert_eq!(loaded, ctx);
        let message = loaded.store().get(ids[0]).unwrap();
        assert_eq!(message.state, MessageState::Sent);
        assert_eq!(message.message_type, MessageType::KeySet);
        assert_eq!(message.direction, MessageDirection::Out);
        assert_eq!(message.content, vec![0, 1, 255]);
        // The id counter survives deletion and restart
        assert_eq!(loaded.store().next_id(), ids[1] + 1);
    }

    #[test]
    fn test_corrupt_roster_fails_to_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = storage(&temp_dir, 5);
        storage.save(&context()).unwrap();

        let path = temp_dir.path().join("mms.json");
        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["registry"]["signers"] = serde_json::json!([]);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            storage.load(),
            Err(StorageError::SerializationError(_))
        ));
    }

    #[test]
    fn test_backup_rotation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = storage(&temp_dir, 3);
        let mut ctx = context();

        for i in 0..5 {
            storage.save(&ctx).unwrap();
            ctx.add_note("1", &format!("note {}", i)).unwrap();
        }

        assert_eq!(storage.list_backups(), vec![0, 1, 2]);
        // Backup 0 is the state before the last save: notes 0..3
        assert_eq!(storage.restore_backup(0).unwrap().store().len(), 3);
        assert_eq!(storage.load().unwrap().store().len(), 4);
        assert!(storage.restore_backup(7).is_err());
        assert_eq!(storage.stats().unwrap().backup_count, 3);
    }

    #[test]
    fn test_wallet_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = storage(&temp_dir, 5);
        assert!(!storage.wallet_exists());

        let wallet = LocalWallet::new(Some("alice"));
        storage.save_wallet(&wallet).unwrap();
        let loaded = storage.load_wallet().unwrap();
        assert_eq!(loaded.address(), wallet.address());
        assert_eq!(loaded.label.as_deref(), Some("alice"));
    }

    #[test]
    fn test_export_stays_in_data_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = storage(&temp_dir, 5);
        let path = storage.export("../../escape.bin", b"data").unwrap();
        assert_eq!(path, temp_dir.path().join("escape.bin"));
        assert_eq!(fs::read(path).unwrap(), b"data");
    }
}
