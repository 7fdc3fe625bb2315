//! The typed key/value store behind the mount.
//!
//! Configuration data lives below a single root key, one key per package /
//! section / option, each carrying an optional string value and string
//! metadata. The [`ConfigStore`] trait is the seam between the filesystem
//! and whatever holds that data; [`MemoryStore`] is the in-process
//! implementation, optionally bound to a JSON file on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The key every configuration package lives beneath.
pub const CONFIG_ROOT: &str = "system:/config";

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error on {path}: {err}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying failure.
        err: std::io::Error,
    },
    /// The backing file exists but does not deserialize.
    #[error("malformed store file {path}: {err}")]
    Malformed {
        /// The file involved.
        path: PathBuf,
        /// The underlying failure.
        err: serde_json::Error,
    },
}

/// A single typed entry: a full `/`-delimited name, an optional string
/// value, and string-to-string metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Full name, e.g. `system:/config/network/lan/ipaddr`.
    pub name: String,
    /// The value, if this key carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Metadata, e.g. `type` -> `ipv4addr`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Key {
    /// A key with no value and no metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            meta: BTreeMap::new(),
        }
    }

    /// Attach a value, builder style.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach one metadata entry, builder style.
    pub fn with_meta(mut self, name: &str, value: impl Into<String>) -> Self {
        self.meta.insert(name.to_owned(), value.into());
        self
    }

    /// The metadata value for `name`, if present.
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.meta.get(name).map(String::as_str)
    }

    /// The final segment of the key name.
    pub fn base_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// An ordered set of keys, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    keys: BTreeMap<String, Key>,
}

impl KeySet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`, replacing any previous key of the same name.
    pub fn insert(&mut self, key: Key) {
        self.keys.insert(key.name.clone(), key);
    }

    /// Move every key of `other` into `self`, replacing same-named keys.
    pub fn merge(&mut self, other: KeySet) {
        self.keys.extend(other.keys);
    }

    /// The key named exactly `name`.
    pub fn lookup(&self, name: &str) -> Option<&Key> {
        self.keys.get(name)
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All keys in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    /// Keys strictly below `parent`, in name order.
    pub fn below<'a>(&'a self, parent: &str) -> impl Iterator<Item = &'a Key> {
        let prefix = format!("{parent}/");
        self.keys
            .range(prefix.clone()..)
            .take_while(move |(name, _)| name.starts_with(&prefix))
            .map(|(_, key)| key)
    }

    /// Remove every key strictly below `parent`; returns how many went.
    pub fn remove_below(&mut self, parent: &str) -> usize {
        let prefix = format!("{parent}/");
        let before = self.keys.len();
        self.keys.retain(|name, _| !name.starts_with(&prefix));
        before - self.keys.len()
    }
}

/// The persistence seam between the filesystem and its configuration
/// data.
///
/// The write contract mirrors a transactional database handle: callers
/// must [`get`](ConfigStore::get) the current contents, apply their
/// changes to the returned set, and hand the whole thing back to a single
/// [`set`](ConfigStore::set) call.
pub trait ConfigStore: std::fmt::Debug {
    /// The current contents at and below `parent`.
    fn get(&self, parent: &str) -> KeySet;

    /// Commit `keys` as the new contents of the store.
    fn set(&mut self, keys: &KeySet) -> Result<(), StoreError>;

    /// The `index`th package name (in stable order, no leading slash), or
    /// None once `index` runs past the end. This is the enumerator the
    /// root directory is rebuilt from.
    fn package_name(&self, index: usize) -> Option<String>;
}

/// An in-memory store, optionally bound to a JSON file that is loaded on
/// open and rewritten after every successful commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: KeySet,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// A store bound to `path`. The file is loaded when it exists;
    /// otherwise the store starts empty and the file is created on the
    /// first commit.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let keys = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| StoreError::Malformed {
                path: path.to_owned(),
                err,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => KeySet::new(),
            Err(err) => {
                return Err(StoreError::Io {
                    path: path.to_owned(),
                    err,
                })
            }
        };
        debug!("loaded {} keys from {}", keys.len(), path.display());
        Ok(Self {
            keys,
            path: Some(path.to_owned()),
        })
    }

    /// A store pre-filled with `keys`, not bound to any file.
    pub fn from_keys(keys: KeySet) -> Self {
        Self { keys, path: None }
    }

    /// True when the store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.keys).map_err(|err| StoreError::Malformed {
            path: path.clone(),
            err,
        })?;
        std::fs::write(path, bytes).map_err(|err| StoreError::Io {
            path: path.clone(),
            err,
        })
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, parent: &str) -> KeySet {
        let mut result = KeySet::new();
        if let Some(key) = self.keys.lookup(parent) {
            result.insert(key.clone());
        }
        for key in self.keys.below(parent) {
            result.insert(key.clone());
        }
        result
    }

    fn set(&mut self, keys: &KeySet) -> Result<(), StoreError> {
        self.keys = keys.clone();
        self.save()
    }

    fn package_name(&self, index: usize) -> Option<String> {
        self.keys
            .below(CONFIG_ROOT)
            .filter_map(|key| {
                let rel = key.name.strip_prefix(CONFIG_ROOT)?.strip_prefix('/')?;
                (!rel.contains('/')).then(|| rel.to_owned())
            })
            .nth(index)
    }
}
