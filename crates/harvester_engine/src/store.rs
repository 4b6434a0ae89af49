use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use harvest_logging::harvest_debug;
use harvester_core::{HarvestRecord, StoredObject};
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Durable home for raw bodies.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredObject, StorageError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Removes `key`; returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Key-value index of harvest metadata records, keyed by harvest id.
pub trait MetadataIndex: Send + Sync {
    fn put(&self, id: &str, record: &HarvestRecord) -> Result<(), StorageError>;
    fn get(&self, id: &str) -> Result<Option<HarvestRecord>, StorageError>;
}

/// Keys are `/`-separated relative paths with no empty, `.` or `..` segments.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Objects as files under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredObject, StorageError> {
        let path = self.path_for(key)?;
        let (Some(dir), Some(filename)) = (path.parent(), path.file_name()) else {
            return Err(StorageError::InvalidKey(key.to_string()));
        };
        let writer = AtomicFileWriter::new(dir.to_path_buf());
        let written = writer.write(&filename.to_string_lossy(), bytes)?;
        harvest_debug!("wrote {} bytes to {}", bytes.len(), written.display());
        Ok(StoredObject {
            storage_key: key.to_string(),
            location: format!("file://{}", written.display()),
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        read_optional(&self.path_for(key)?)
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Records as pretty JSON files, `{root}/{id}.json`.
#[derive(Debug, Clone)]
pub struct FsMetadataIndex {
    root: PathBuf,
}

impl FsMetadataIndex {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn filename_for(id: &str) -> Result<String, StorageError> {
        validate_key(id)?;
        if id.contains('/') {
            return Err(StorageError::InvalidKey(id.to_string()));
        }
        Ok(format!("{id}.json"))
    }
}

impl MetadataIndex for FsMetadataIndex {
    fn put(&self, id: &str, record: &HarvestRecord) -> Result<(), StorageError> {
        let filename = Self::filename_for(id)?;
        let content = serde_json::to_vec_pretty(record)?;
        AtomicFileWriter::new(self.root.clone()).write(&filename, &content)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<HarvestRecord>, StorageError> {
        let path = self.root.join(Self::filename_for(id)?);
        match read_optional(&path)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Process-local object store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Poisoned("object store"))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(StoredObject {
            storage_key: key.to_string(),
            location: format!("memory://{key}"),
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Poisoned("object store"))?;
        Ok(objects.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Poisoned("object store"))?;
        Ok(objects.remove(key).is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMetadataIndex {
    records: Mutex<BTreeMap<String, HarvestRecord>>,
}

impl MemoryMetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HarvestRecord> {
        self.records
            .lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataIndex for MemoryMetadataIndex {
    fn put(&self, id: &str, record: &HarvestRecord) -> Result<(), StorageError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StorageError::Poisoned("metadata index"))?;
        records.insert(id.to_string(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<HarvestRecord>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StorageError::Poisoned("metadata index"))?;
        Ok(records.get(id).cloned())
    }
}
