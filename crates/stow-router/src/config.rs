//! Typed parsing of the host configuration tree.
//!
//! The host hands over a TOML document. Two sections matter here:
//!
//! ```toml
//! [file]
//! download = "store/download"
//! thumbnail = "store/thumbnail"   # `thumb` is accepted as an alias
//! preview = "store/preview"
//! salt = "stow"
//!
//! [storage]
//! weight = 2                      # loose keys configure the default backend
//! [storage.setting]
//! storage = "/srv/stow"
//!
//! [storage.archive]               # every other sub-table names a backend
//! driver = "default"
//! weight = 0
//! prefix = "cold"
//! [storage.archive.setting]
//! storage = "/mnt/archive"
//! ```
//!
//! Parsing validates types up front; nothing is applied until the whole tree
//! has parsed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stow_ring::MAX_WEIGHT;
use stow_store::BackendConfig;
use stow_types::DEFAULT_BACKEND;
use tracing::warn;

use crate::error::{RouterError, RouterResult};

pub const DEFAULT_DOWNLOAD_ROOT: &str = "store/download";
pub const DEFAULT_THUMBNAIL_ROOT: &str = "store/thumbnail";
pub const DEFAULT_PREVIEW_ROOT: &str = "store/preview";
pub const DEFAULT_SALT: &str = "stow";

/// Module-wide file locations and salt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    /// Cache root for downloads the caller did not pin to a target.
    pub download: PathBuf,
    pub thumbnail: PathBuf,
    pub preview: PathBuf,
    pub salt: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            download: PathBuf::from(DEFAULT_DOWNLOAD_ROOT),
            thumbnail: PathBuf::from(DEFAULT_THUMBNAIL_ROOT),
            preview: PathBuf::from(DEFAULT_PREVIEW_ROOT),
            salt: DEFAULT_SALT.to_string(),
        }
    }
}

/// Parsed `[file]` section. Absent keys leave settings untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilePatch {
    pub download: Option<PathBuf>,
    pub thumbnail: Option<PathBuf>,
    pub preview: Option<PathBuf>,
    pub salt: Option<String>,
}

impl FilePatch {
    pub fn parse(table: &toml::Table) -> RouterResult<Self> {
        let section = "file";
        let mut patch = Self {
            download: opt_str(section, table, "download")?.map(PathBuf::from),
            thumbnail: opt_str(section, table, "thumbnail")?.map(PathBuf::from),
            preview: opt_str(section, table, "preview")?.map(PathBuf::from),
            salt: opt_str(section, table, "salt")?.map(str::to_string),
        };
        if let Some(thumb) = opt_str(section, table, "thumb")? {
            patch.thumbnail = Some(PathBuf::from(thumb));
        }
        Ok(patch)
    }

    pub fn apply(self, settings: &mut FileSettings) {
        if let Some(v) = self.download {
            settings.download = v;
        }
        if let Some(v) = self.thumbnail {
            settings.thumbnail = v;
        }
        if let Some(v) = self.preview {
            settings.preview = v;
        }
        if let Some(v) = self.salt {
            settings.salt = v;
        }
    }
}

/// Parsed configuration of one backend. Absent keys keep the value of the
/// config it is merged over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendPatch {
    pub driver: Option<String>,
    pub weight: Option<i64>,
    pub prefix: Option<String>,
    pub proxy: Option<bool>,
    pub remote: Option<bool>,
    pub settings: Option<toml::Table>,
}

impl BackendPatch {
    pub fn parse(name: &str, table: &toml::Table) -> RouterResult<Self> {
        let mut patch = Self::default();
        for (key, value) in table {
            match key.as_str() {
                "driver" => {
                    let driver = expect_str(name, key, value)?;
                    if !driver.is_empty() {
                        patch.driver = Some(driver.to_string());
                    }
                }
                "weight" => patch.weight = Some(parse_weight(name, value)?),
                "prefix" => patch.prefix = Some(expect_str(name, key, value)?.to_string()),
                "proxy" => patch.proxy = Some(expect_bool(name, key, value)?),
                "remote" => patch.remote = Some(expect_bool(name, key, value)?),
                "setting" => match value {
                    toml::Value::Table(t) => patch.settings = Some(t.clone()),
                    other => return Err(type_error(name, key, "table", other)),
                },
                other => warn!(backend = name, key = other, "ignoring unknown storage key"),
            }
        }
        Ok(patch)
    }

    /// Merge over `base`.
    pub fn apply(self, mut base: BackendConfig) -> BackendConfig {
        if let Some(v) = self.driver {
            base.driver = v;
        }
        if let Some(v) = self.weight {
            base.weight = v;
        }
        if let Some(v) = self.prefix {
            base.prefix = v;
        }
        if let Some(v) = self.proxy {
            base.proxy = v;
        }
        if let Some(v) = self.remote {
            base.remote = v;
        }
        if let Some(v) = self.settings {
            base.settings = v;
        }
        base
    }
}

/// Everything this crate reads from the host configuration tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostConfig {
    pub files: FilePatch,
    /// Backend patches in application order.
    pub backends: Vec<(String, BackendPatch)>,
}

impl HostConfig {
    pub fn parse(root: &toml::Table) -> RouterResult<Self> {
        let mut config = Self::default();

        match root.get("file") {
            Some(toml::Value::Table(file)) => config.files = FilePatch::parse(file)?,
            Some(other) => return Err(type_error("file", "file", "table", other)),
            None => {}
        }

        let storage = match root.get("storage") {
            Some(toml::Value::Table(storage)) => storage,
            Some(other) => return Err(type_error("storage", "storage", "table", other)),
            None => return Ok(config),
        };

        // Named sub-tables first; loose keys then configure the default backend.
        let mut loose = toml::Table::new();
        for (key, value) in storage {
            match value {
                toml::Value::Table(table) if key != "setting" => {
                    config
                        .backends
                        .push((key.clone(), BackendPatch::parse(key, table)?));
                }
                _ => {
                    loose.insert(key.clone(), value.clone());
                }
            }
        }
        if !loose.is_empty() {
            config.backends.push((
                DEFAULT_BACKEND.to_string(),
                BackendPatch::parse(DEFAULT_BACKEND, &loose)?,
            ));
        }
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> RouterResult<Self> {
        let root: toml::Table = s
            .parse()
            .map_err(|e: toml::de::Error| RouterError::Config(e.to_string()))?;
        Self::parse(&root)
    }
}

/// Collapse integer and float weights to an integer; anything else is an error.
fn parse_weight(name: &str, value: &toml::Value) -> RouterResult<i64> {
    let weight = match value {
        toml::Value::Integer(i) => *i,
        toml::Value::Float(f) if f.is_finite() => f.trunc() as i64,
        other => return Err(type_error(name, "weight", "number", other)),
    };
    check_weight(name, weight)?;
    Ok(weight)
}

/// Placement weights above [`MAX_WEIGHT`] are refused.
pub fn check_weight(name: &str, weight: i64) -> RouterResult<()> {
    if weight > MAX_WEIGHT {
        return Err(RouterError::Config(format!(
            "{name}.weight: {weight} exceeds the maximum of {MAX_WEIGHT}"
        )));
    }
    Ok(())
}

fn expect_str<'a>(name: &str, key: &str, value: &'a toml::Value) -> RouterResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| type_error(name, key, "string", value))
}

fn expect_bool(name: &str, key: &str, value: &toml::Value) -> RouterResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| type_error(name, key, "boolean", value))
}

fn opt_str<'a>(section: &str, table: &'a toml::Table, key: &str) -> RouterResult<Option<&'a str>> {
    table
        .get(key)
        .map(|value| expect_str(section, key, value))
        .transpose()
}

fn type_error(scope: &str, key: &str, expected: &str, got: &toml::Value) -> RouterError {
    RouterError::Config(format!(
        "{scope}.{key}: expected {expected}, got {}",
        got.type_str()
    ))
}
