use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use stow_crypto::hash_reader;
use stow_types::{FileHandle, Health};

use crate::config::Instance;
use crate::error::{StoreError, StoreResult};
use crate::options::{BrowseOptions, DownloadOptions, FetchOptions, RemoveOptions, UploadOptions};
use crate::traits::{Connection, Driver, Stream};

/// Driver for the in-memory backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct InMemoryDriver;

impl Driver for InMemoryDriver {
    fn connect(&self, instance: &Instance) -> StoreResult<Box<dyn Connection>> {
        Ok(Box::new(InMemoryConnection::new(instance.clone())))
    }
}

/// In-memory, HashMap-based backend.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock` and
/// keyed by their relative object path. There is no browsable
/// representation, and downloads need an explicit target.
pub struct InMemoryConnection {
    instance: Instance,
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryConnection {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the backend holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }

    fn get(&self, file: &FileHandle) -> StoreResult<Vec<u8>> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(&file.file())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from(file.file())))
    }
}

impl Connection for InMemoryConnection {
    fn open(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Workload is the number of stored objects.
    fn health(&self) -> Health {
        Health::new(self.len() as i64)
    }

    fn close(&self) -> StoreResult<()> {
        self.objects.write().expect("lock poisoned").clear();
        Ok(())
    }

    fn upload(&self, source: &Path, opts: &UploadOptions) -> StoreResult<FileHandle> {
        let meta = fs::metadata(source).map_err(|e| StoreError::io("stat", source, e))?;
        if meta.is_dir() {
            return Err(StoreError::Unsupported(format!(
                "directory upload: {}",
                source.display()
            )));
        }
        let data = fs::read(source).map_err(|e| StoreError::io("read", source, e))?;

        let mut prefix = opts.prefix().unwrap_or_default().to_string();
        let key = match opts.key() {
            Some(key) => key.to_string(),
            None => {
                let digest = hash_reader(&mut data.as_slice())
                    .map_err(|e| StoreError::io("read", source, e))?;
                if prefix.is_empty() {
                    prefix = digest.fan_out().unwrap_or_default();
                }
                digest.token
            }
        };
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let file = self.instance.new_file(prefix, key, ext, data.len() as u64);
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(file.file(), data);
        Ok(file)
    }

    fn fetch(&self, file: &FileHandle, opts: &FetchOptions) -> StoreResult<Box<dyn Stream>> {
        let mut data = self.get(file)?;
        if let Some(window) = opts.window(data.len() as u64) {
            let end = (window.end as usize).min(data.len());
            let start = (window.start as usize).min(end);
            data = data[start..end].to_vec();
        }
        Ok(Box::new(Cursor::new(data)))
    }

    fn download(&self, file: &FileHandle, opts: &DownloadOptions) -> StoreResult<PathBuf> {
        let target = opts.target.clone().ok_or_else(|| {
            StoreError::Unsupported(format!(
                "in-memory backend {} needs a download target",
                self.instance.name
            ))
        })?;
        let data = self.get(file)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create", parent, e))?;
        }
        fs::write(&target, data).map_err(|e| StoreError::io("write", &target, e))?;
        Ok(target)
    }

    fn remove(&self, file: &FileHandle, _opts: &RemoveOptions) -> StoreResult<()> {
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(&file.file());
        Ok(())
    }

    fn browse(&self, _file: &FileHandle, _opts: &BrowseOptions) -> StoreResult<String> {
        Err(StoreError::Unsupported(format!(
            "browse on in-memory backend {}",
            self.instance.name
        )))
    }
}

impl std::fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConnection")
            .field("backend", &self.instance.name)
            .field("object_count", &self.len())
            .finish()
    }
}
