//! Per-package virtual file entries.
//!
//! Every package visible in the mount root is backed by one [`FileEntry`]:
//! stat-like attributes plus an optional content buffer. The buffer is
//! populated on demand from the store, mutated by writes, and — when
//! dirty — parsed and committed back on release.

use std::time::SystemTime;

use tracing::{debug, error};

use crate::conf::Package;
use crate::store::{ConfigStore, CONFIG_ROOT};
use crate::translate;
use crate::{Error, Result};

/// Mode bits for a new virtual file when the caller passes none:
/// regular | 0644.
pub const DEFAULT_FILE_MODE: u32 = libc::S_IFREG | 0o644;

/// The advertised size of an entry that has never been populated.
pub(crate) const INITIAL_SIZE: u64 = 1024;

/// Cheap string digest used to shortcut path comparisons during lookup.
pub(crate) fn path_digest(path: &str) -> u64 {
    let mut hash: u64 = 0xDEAD_BEEF;
    for byte in path.bytes() {
        hash = hash.wrapping_mul(43) ^ u64::from(byte);
    }
    hash
}

/// Stat-like attributes of an entry or of the root directory.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct Attrs {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

/// One virtual file: a configuration package visible in the mount root.
#[derive(Debug)]
pub struct FileEntry {
    path: String,
    path_digest: u64,
    pub(crate) attrs: Attrs,
    buffer: Option<Vec<u8>>,
    dirty: bool,
    pub(crate) build_stamp: u64,
}

impl FileEntry {
    /// A new entry for `path`, owned by `uid`/`gid`. A `mode` of zero
    /// selects [`DEFAULT_FILE_MODE`].
    pub(crate) fn new(path: &str, mode: u32, ino: u64, uid: u32, gid: u32) -> Result<Self> {
        if path.is_empty() || !path.starts_with('/') {
            return Err(Error::InvalidArgument(format!("bad entry path {path:?}")));
        }
        debug!("new entry for '{path}'");
        let mode = if mode == 0 { DEFAULT_FILE_MODE } else { mode };
        let now = SystemTime::now();
        Ok(Self {
            path: path.to_owned(),
            path_digest: path_digest(path),
            attrs: Attrs {
                ino,
                mode,
                nlink: 1,
                size: INITIAL_SIZE,
                uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
            },
            buffer: None,
            dirty: false,
            build_stamp: 0,
        })
    }

    /// The absolute path of the entry within the mount (`/<package>`).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn digest(&self) -> u64 {
        self.path_digest
    }

    /// The package this entry renders: the path without its leading `/`.
    pub fn package_name(&self) -> &str {
        &self.path[1..]
    }

    /// A copy of the entry's current attributes.
    pub fn attrs(&self) -> Attrs {
        self.attrs
    }

    /// True when the buffer holds edits not yet committed to the store.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The bytes at `offset`, at most `size` of them. Empty at or past
    /// the end of the content.
    pub fn read(&self, offset: u64, size: u32) -> &[u8] {
        let Some(buffer) = &self.buffer else {
            return &[];
        };
        let len = buffer.len() as u64;
        if offset >= len {
            return &[];
        }
        let end = len.min(offset.saturating_add(u64::from(size)));
        &buffer[offset as usize..end as usize]
    }

    /// Write `data` at `offset`, growing the buffer if the write reaches
    /// past its end; any gap below `offset` reads back as zeroes. Returns
    /// the number of bytes written.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let offset = usize::try_from(offset)
            .map_err(|_| Error::InvalidArgument(format!("write offset {offset}")))?;
        let end = offset + data.len();
        let buffer = self.buffer.get_or_insert_with(Vec::new);
        if end > buffer.len() {
            if buffer.try_reserve_exact(end - buffer.len()).is_err() {
                return Err(Error::OutOfMemory);
            }
            buffer.resize(end, 0);
            self.attrs.size = end as u64;
        }
        buffer[offset..end].copy_from_slice(data);
        self.attrs.mtime = SystemTime::now();
        self.dirty = true;
        Ok(data.len())
    }

    /// Resize the content to exactly `new_size` bytes, zero-filling
    /// growth. A length of zero discards the buffer (and any uncommitted
    /// edits); a negative length is invalid.
    pub fn truncate(&mut self, new_size: i64) -> Result<()> {
        self.attrs.mtime = SystemTime::now();
        if new_size == 0 {
            self.buffer = None;
            self.attrs.size = 0;
            self.dirty = false;
        } else if new_size > 0 {
            let new_len = new_size as usize;
            let buffer = self.buffer.get_or_insert_with(Vec::new);
            if new_len > buffer.len() && buffer.try_reserve_exact(new_len - buffer.len()).is_err()
            {
                return Err(Error::OutOfMemory);
            }
            buffer.resize(new_len, 0);
            self.attrs.size = new_size as u64;
        } else {
            return Err(Error::InvalidArgument(format!(
                "negative truncate length {new_size}"
            )));
        }
        Ok(())
    }

    /// Refresh the buffer with a fresh rendering of the package from the
    /// store and clear the dirty flag. A dirty buffer holds edits that
    /// have not reached the store yet, so it is left untouched.
    pub fn populate(&mut self, store: &dyn ConfigStore) {
        if self.dirty {
            debug!("'{}' has uncommitted edits, keeping buffer", self.path);
            return;
        }
        let keys = store.get(CONFIG_ROOT);
        let package = translate::package_from_keys(self.package_name(), &keys);
        let text = package.render();
        self.attrs.size = text.len() as u64;
        self.buffer = Some(text.into_bytes());
    }

    /// Parse a dirty buffer and commit the resulting tree to the store.
    /// A clean or unpopulated entry is a no-op. On a parse failure the
    /// buffer is retained and stays dirty, so the next release retries;
    /// a store failure after a good parse is only logged.
    pub fn parse_and_commit(&mut self, store: &mut dyn ConfigStore) -> Result<()> {
        let Some(buffer) = &self.buffer else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let text = String::from_utf8_lossy(buffer);
        let package = Package::parse(self.package_name(), &text)?;
        if let Err(err) = translate::commit_package(store, &package) {
            error!("committing '{}': {err}", self.package_name());
        }
        self.dirty = false;
        Ok(())
    }
}
