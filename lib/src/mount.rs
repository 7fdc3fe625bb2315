//! Mount state and the root-directory reconciler.
//!
//! One [`MountState`] exists per mount. It owns every [`FileEntry`] and
//! keeps the set aligned with the store's package enumeration through a
//! mark-and-sweep rebuild, coalesced so that bursts of directory access
//! rebuild at most once per window.

use std::time::{Duration, SystemTime};

use tracing::{debug, error};

use crate::handle::{path_digest, Attrs, FileEntry};
use crate::store::ConfigStore;
use crate::{Error, Result};

/// The inode number of the mount root.
pub const ROOT_INO: u64 = 1;

/// Rebuilds of the root entry set are coalesced within this window.
pub(crate) const REFRESH_WINDOW: Duration = Duration::from_secs(5);

const ROOT_DIR_MODE: u32 = libc::S_IFDIR | 0o644;
const ROOT_DIR_SIZE: u64 = 1024;

/// Singleton state for one mount: the owner identity, the root directory
/// attributes, and the cached set of package entries.
///
/// Inode numbers are handed out from a counter that never goes backwards,
/// so an inode swept away by [`reconcile`](Self::reconcile) simply stops
/// resolving instead of aliasing a newer entry.
#[derive(Debug)]
pub struct MountState {
    root_attrs: Attrs,
    entries: Vec<FileEntry>,
    last_refresh: Option<SystemTime>,
    build_epoch: u64,
    next_ino: u64,
}

impl MountState {
    /// Fresh state owned by the mounting user.
    pub fn new(uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Self {
            root_attrs: Attrs {
                ino: ROOT_INO,
                mode: ROOT_DIR_MODE,
                nlink: 2,
                size: ROOT_DIR_SIZE,
                uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
            },
            entries: Vec::new(),
            last_refresh: None,
            build_epoch: 0,
            next_ino: ROOT_INO + 1,
        }
    }

    /// The entries currently visible in the root, in stable order.
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    fn position_of(&self, path: &str) -> Option<usize> {
        let digest = path_digest(path);
        self.entries
            .iter()
            .position(|entry| entry.digest() == digest && entry.path() == path)
    }

    /// Append a new entry for `path`. The root directory's mtime and
    /// ctime advance. Creating an already-present path yields the
    /// existing entry.
    pub fn create_entry(&mut self, path: &str, mode: u32) -> Result<&mut FileEntry> {
        if let Some(pos) = self.position_of(path) {
            return Ok(&mut self.entries[pos]);
        }
        let ino = self.next_ino;
        let entry = FileEntry::new(path, mode, ino, self.root_attrs.uid, self.root_attrs.gid)?;
        self.next_ino += 1;
        let now = SystemTime::now();
        self.root_attrs.mtime = now;
        self.root_attrs.ctime = now;
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last])
    }

    /// Resolve `path` to its entry, reconciling first so that a package
    /// added since the last rebuild is found. This is the fallback for
    /// callbacks arriving without an open handle.
    pub fn find(&mut self, store: &dyn ConfigStore, path: &str) -> Result<&mut FileEntry> {
        if path.is_empty() {
            return Err(Error::InvalidArgument("empty path".to_owned()));
        }
        self.reconcile(store)?;
        match self.position_of(path) {
            Some(pos) => Ok(&mut self.entries[pos]),
            None => Err(Error::NotFound(path.to_owned())),
        }
    }

    /// Resolve an inode handed out earlier. Swept entries are gone and
    /// their inodes no longer resolve.
    pub fn find_ino(&mut self, ino: u64) -> Result<&mut FileEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.attrs.ino == ino)
            .ok_or_else(|| Error::NotFound(format!("inode {ino}")))
    }

    /// Root directory attributes, reconciled and with a fresh atime.
    pub fn dir_attrs(&mut self, store: &dyn ConfigStore) -> Result<Attrs> {
        self.reconcile(store)?;
        self.root_attrs.atime = SystemTime::now();
        Ok(self.root_attrs)
    }

    /// Align the entry set with the store's package enumeration.
    ///
    /// Within [`REFRESH_WINDOW`] of the previous rebuild this returns
    /// without doing anything. Otherwise every enumerated package is
    /// marked with a new build epoch — entries not yet present are
    /// created and populated — and whatever still carries an older stamp
    /// afterwards is swept away.
    pub fn reconcile(&mut self, store: &dyn ConfigStore) -> Result<()> {
        let now = SystemTime::now();
        if let Some(last) = self.last_refresh {
            if let Ok(age) = now.duration_since(last) {
                if age < REFRESH_WINDOW {
                    return Ok(());
                }
                debug!("root cache is {}s old, rebuilding", age.as_secs());
            }
        }
        self.last_refresh = Some(now);

        self.root_attrs.mode = ROOT_DIR_MODE;
        self.root_attrs.size = ROOT_DIR_SIZE;
        self.root_attrs.atime = now;
        self.root_attrs.mtime = now;
        self.root_attrs.ctime = now;

        self.build_epoch += 1;
        let epoch = self.build_epoch;

        let mut index = 0;
        while let Some(name) = store.package_name(index) {
            index += 1;
            let path = format!("/{name}");
            if let Some(pos) = self.position_of(&path) {
                self.entries[pos].build_stamp = epoch;
                continue;
            }
            match self.create_entry(&path, 0) {
                Ok(entry) => {
                    entry.populate(store);
                    entry.build_stamp = epoch;
                }
                Err(err) => error!("creating entry for '{path}': {err}"),
            }
        }
        // "." and ".." count towards the directory link count.
        self.root_attrs.nlink = (index + 2) as u32;

        // Sweep: a stale stamp means the enumerator no longer yields the
        // entry, so it disappears from the root.
        self.entries.retain(|entry| {
            if entry.build_stamp != epoch {
                debug!("remove '{}'", entry.path());
                return false;
            }
            true
        });
        Ok(())
    }

    /// Drop every entry; used on unmount.
    pub fn release_all(&mut self) {
        self.entries.clear();
        self.root_attrs.nlink = 0;
    }
}
