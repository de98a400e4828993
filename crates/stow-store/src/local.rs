use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use stow_crypto::hash_file;
use stow_types::{FileHandle, Health};
use tracing::debug;

use crate::config::Instance;
use crate::error::{StoreError, StoreResult};
use crate::options::{BrowseOptions, DownloadOptions, FetchOptions, RemoveOptions, UploadOptions};
use crate::range::RangeReader;
use crate::traits::{Connection, Driver, Stream};

/// Storage root used when the backend does not configure one.
pub const DEFAULT_STORAGE_ROOT: &str = "store/storage";

/// Intermediate buffer for upload copies (256 KiB). Tuning knob only.
pub const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Settings of the local filesystem backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Root directory objects are stored under.
    pub storage: PathBuf,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            storage: PathBuf::from(DEFAULT_STORAGE_ROOT),
        }
    }
}

/// Driver for the local filesystem backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalDriver;

impl Driver for LocalDriver {
    fn connect(&self, instance: &Instance) -> StoreResult<Box<dyn Connection>> {
        let mut settings: LocalSettings = instance.settings()?;
        if settings.storage.as_os_str().is_empty() {
            settings.storage = PathBuf::from(DEFAULT_STORAGE_ROOT);
        }
        Ok(Box::new(LocalConnection::new(instance.clone(), settings)))
    }
}

/// Objects stored as files at `root/prefix/key[.ext]`.
pub struct LocalConnection {
    instance: Instance,
    settings: LocalSettings,
    health: RwLock<Health>,
}

impl LocalConnection {
    pub fn new(instance: Instance, settings: LocalSettings) -> Self {
        Self {
            instance,
            settings,
            health: RwLock::new(Health::default()),
        }
    }

    /// Storage root of this backend.
    pub fn root(&self) -> &Path {
        &self.settings.storage
    }

    /// Resolve the on-disk path of an object.
    ///
    /// Handles whose prefix or key would leave the storage root, or that do
    /// not name a file below it, are refused.
    pub fn object_path(&self, file: &FileHandle) -> StoreResult<PathBuf> {
        if file.key().is_empty() || file.key().ends_with('/') {
            return Err(StoreError::InvalidPath(file.file()));
        }
        let relative = Path::new(file.prefix()).join(file_name(file));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StoreError::InvalidPath(file.file()));
        }
        Ok(self.settings.storage.join(relative))
    }

    fn existing_path(&self, file: &FileHandle) -> StoreResult<PathBuf> {
        let path = self.object_path(file)?;
        let meta = fs::metadata(&path).map_err(|e| StoreError::io("stat", &path, e))?;
        if meta.is_dir() {
            return Err(StoreError::NotFound(path));
        }
        Ok(path)
    }

    fn begin(&self) -> InFlight<'_> {
        InFlight::enter(&self.health)
    }
}

impl Connection for LocalConnection {
    fn open(&self) -> StoreResult<()> {
        let root = self.root();
        fs::create_dir_all(root).map_err(|e| StoreError::io("create", root, e))?;
        debug!(backend = %self.instance.name, root = ?root, "local backend opened");
        Ok(())
    }

    fn health(&self) -> Health {
        *self.health.read().expect("health lock poisoned")
    }

    fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn upload(&self, source: &Path, opts: &UploadOptions) -> StoreResult<FileHandle> {
        let _busy = self.begin();

        let meta = fs::metadata(source).map_err(|e| StoreError::io("stat", source, e))?;
        if meta.is_dir() {
            return Err(StoreError::Unsupported(format!(
                "directory upload: {}",
                source.display()
            )));
        }

        let mut prefix = opts.prefix().unwrap_or_default().to_string();
        let key = match opts.key() {
            Some(key) => key.to_string(),
            None => {
                let digest = hash_file(source)?;
                if prefix.is_empty() {
                    prefix = digest.fan_out().unwrap_or_default();
                }
                digest.token
            }
        };

        let staged = self.instance.new_file(prefix, key, extension(source), meta.len());
        let target = self.object_path(&staged)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create", parent, e))?;
        }

        let copied = copy_file(source, &target)?;
        debug!(
            backend = %self.instance.name,
            source = ?source,
            target = ?target,
            bytes = copied,
            "stored object"
        );

        if copied == staged.size() {
            Ok(staged)
        } else {
            Ok(self.instance.new_file(
                staged.prefix(),
                staged.key(),
                staged.ext(),
                copied,
            ))
        }
    }

    fn fetch(&self, file: &FileHandle, opts: &FetchOptions) -> StoreResult<Box<dyn Stream>> {
        let _busy = self.begin();
        let path = self.existing_path(file)?;
        let f = File::open(&path).map_err(|e| StoreError::io("open", &path, e))?;

        if !opts.is_ranged() {
            return Ok(Box::new(f));
        }
        let size = f
            .metadata()
            .map_err(|e| StoreError::io("stat", &path, e))?
            .len();
        let window = opts.window(size).unwrap_or(0..size);
        debug!(path = ?path, start = window.start, end = window.end, "ranged fetch");
        Ok(Box::new(RangeReader::new(
            f,
            window.start,
            window.end - window.start,
        )))
    }

    fn download(&self, file: &FileHandle, opts: &DownloadOptions) -> StoreResult<PathBuf> {
        let _busy = self.begin();
        // Objects are already local: hand out the stored path, not a copy.
        let path = self.existing_path(file)?;
        if let Some(target) = &opts.target {
            debug!(path = ?path, target = ?target, "download served from storage root");
        }
        Ok(path)
    }

    fn remove(&self, file: &FileHandle, _opts: &RemoveOptions) -> StoreResult<()> {
        let _busy = self.begin();
        let path = self.object_path(file)?;
        if path.is_dir() {
            // A directory is fan-out, never an object.
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = ?path, "removed object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", &path, e)),
        }
    }

    fn browse(&self, file: &FileHandle, _opts: &BrowseOptions) -> StoreResult<String> {
        let _busy = self.begin();
        let path = self.existing_path(file)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

impl std::fmt::Debug for LocalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConnection")
            .field("backend", &self.instance.name)
            .field("root", &self.settings.storage)
            .finish()
    }
}

/// Counts an operation as in flight until dropped.
struct InFlight<'a>(&'a RwLock<Health>);

impl<'a> InFlight<'a> {
    fn enter(health: &'a RwLock<Health>) -> Self {
        health.write().expect("health lock poisoned").workload += 1;
        Self(health)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut health) = self.0.write() {
            health.workload -= 1;
        }
    }
}

fn file_name(file: &FileHandle) -> String {
    if file.ext().is_empty() {
        file.key().to_string()
    } else {
        format!("{}.{}", file.key(), file.ext())
    }
}

/// Lowercased extension of `path` without the dot; empty when there is none.
fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn copy_file(source: &Path, target: &Path) -> StoreResult<u64> {
    let mut src = File::open(source).map_err(|e| StoreError::io("open", source, e))?;
    let mut dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)
        .map_err(|e| StoreError::io("create", target, e))?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        let n = src
            .read(&mut buf)
            .map_err(|e| StoreError::io("read", source, e))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .map_err(|e| StoreError::io("write", target, e))?;
        copied += n as u64;
    }
    dst.flush().map_err(|e| StoreError::io("write", target, e))?;
    Ok(copied)
}
