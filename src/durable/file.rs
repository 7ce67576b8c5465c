//! File-backed durable store.

use crate::error::{Result, StoreError};
use crate::types::{KeyHash, PayloadEncoding};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use super::DurableStore;

/// Magic bytes for the store manifest.
const MANIFEST_MAGIC: &[u8; 4] = b"PSM\0";

/// Magic bytes for record files.
const RECORD_MAGIC: &[u8; 4] = b"PST\0";

/// Current on-disk format version (manifest and records).
const FORMAT_VERSION: u8 = 1;

/// Upper bound on a single payload.
const MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Base directory of the store.
    pub path: PathBuf,

    /// Decoded record cache size (number of keys).
    pub cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Encoding used for new writes. Existing records keep their own.
    pub encoding: PayloadEncoding,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./persisted"),
            cache_size: 256,
            create_if_missing: true,
            encoding: PayloadEncoding::Json,
        }
    }
}

/// Durable store keeping one record file per key.
///
/// Writes go to a temporary file that is fsynced and renamed over the
/// target, so a record is either the old or the new document. The store
/// directory is locked exclusively for the lifetime of the value.
pub struct FileStore {
    config: FileStoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    cache: Mutex<LruCache<KeyHash, Value>>,
}

impl FileStore {
    /// Open an existing store or create a new one.
    pub fn open(config: FileStoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::verify_manifest(&config.path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(config.path.join("records"))?;
            Self::write_manifest(&config.path)?;
        } else {
            return Err(StoreError::NotInitialized);
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        tracing::info!(path = %config.path.display(), "opened file store");

        Ok(Self {
            cache: Mutex::new(LruCache::new(cache_size)),
            config,
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(MANIFEST_MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MANIFEST_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }

    fn shard_path(&self, hash: &KeyHash) -> PathBuf {
        self.config.path.join("records").join(hash.shard_prefix())
    }

    fn record_path(&self, hash: &KeyHash) -> PathBuf {
        self.shard_path(hash).join(hash.to_hex())
    }

    fn encode_payload(encoding: PayloadEncoding, value: &Value) -> Result<Vec<u8>> {
        match encoding {
            PayloadEncoding::Json => Ok(serde_json::to_vec(value)?),
            PayloadEncoding::MessagePack => Ok(rmp_serde::to_vec(value)?),
        }
    }

    fn decode_payload(encoding: PayloadEncoding, payload: &[u8]) -> Result<Value> {
        match encoding {
            PayloadEncoding::Json => serde_json::from_slice(payload)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            PayloadEncoding::MessagePack => Ok(rmp_serde::from_slice(payload)?),
        }
    }

    fn key_len(key: &str) -> Result<u16> {
        u16::try_from(key.len())
            .map_err(|_| StoreError::Serialization(format!("key too long: {} bytes", key.len())))
    }

    fn write_record(
        file: &mut File,
        encoding: PayloadEncoding,
        key: &str,
        key_len: u16,
        payload: &[u8],
    ) -> Result<()> {
        file.write_all(RECORD_MAGIC)?;
        file.write_all(&[FORMAT_VERSION, encoding.tag()])?;

        file.write_all(&key_len.to_le_bytes())?;
        file.write_all(key.as_bytes())?;

        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(payload)?;

        let checksum = crc32fast::hash(payload);
        file.write_all(&checksum.to_le_bytes())?;

        file.sync_all()?;
        Ok(())
    }

    /// Read a record file, returning its key and document.
    fn read_record(path: &Path) -> Result<(String, Value)> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != RECORD_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid record magic".into()));
        }

        let mut header = [0u8; 2];
        file.read_exact(&mut header)?;
        if header[0] != FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported record version: {}",
                header[0]
            )));
        }
        let encoding = PayloadEncoding::from_tag(header[1]).ok_or_else(|| {
            StoreError::InvalidFormat(format!("Unknown payload encoding: {}", header[1]))
        })?;

        let mut key_len_bytes = [0u8; 2];
        file.read_exact(&mut key_len_bytes)?;
        let mut key_bytes = vec![0u8; u16::from_le_bytes(key_len_bytes) as usize];
        file.read_exact(&mut key_bytes)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|_| StoreError::InvalidFormat("Record key is not UTF-8".into()))?;

        let mut payload_len_bytes = [0u8; 8];
        file.read_exact(&mut payload_len_bytes)?;
        let payload_len = u64::from_le_bytes(payload_len_bytes);
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(StoreError::InvalidFormat("Record payload too large".into()));
        }

        let mut payload = vec![0u8; payload_len as usize];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let value = Self::decode_payload(encoding, &payload)?;
        Ok((key, value))
    }
}

impl DurableStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        let hash = KeyHash::of(key);
        if let Some(cached) = self.cache.lock().get(&hash).cloned() {
            return Ok(Some(cached));
        }

        let path = self.record_path(&hash);
        if !path.exists() {
            return Ok(None);
        }

        let (stored_key, value) = Self::read_record(&path)?;
        if stored_key != key {
            return Err(StoreError::InvalidFormat(format!(
                "Record {} holds key {:?}, expected {:?}",
                hash, stored_key, key
            )));
        }

        self.cache.lock().put(hash, value.clone());
        Ok(Some(value))
    }

    fn set_item(&self, key: &str, value: &Value) -> Result<()> {
        let hash = KeyHash::of(key);
        let key_len = Self::key_len(key)?;
        let payload = Self::encode_payload(self.config.encoding, value)?;

        fs::create_dir_all(self.shard_path(&hash))?;
        let target = self.record_path(&hash);
        let tmp = target.with_extension("tmp");

        let written = File::create(&tmp).map_err(StoreError::from).and_then(|mut file| {
            Self::write_record(&mut file, self.config.encoding, key, key_len, &payload)
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &target).map_err(StoreError::from)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        self.cache.lock().put(hash, value.clone());
        tracing::debug!(key, bytes = payload.len(), "wrote record");
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let hash = KeyHash::of(key);
        self.cache.lock().pop(&hash);

        let path = self.record_path(&hash);
        if path.exists() {
            fs::remove_file(&path)?;
            tracing::debug!(key, "removed record");
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(self.config.path.join("records"))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for record_entry in fs::read_dir(entry.path())? {
                let record_entry = record_entry?;
                let file_name = record_entry.file_name();
                if KeyHash::from_hex(&file_name.to_string_lossy()).is_err() {
                    // Leftover temp files from interrupted writes.
                    continue;
                }
                let (key, _) = Self::read_record(&record_entry.path())?;
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}
