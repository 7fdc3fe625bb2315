//! The kernel-facing surface of the mount.
//!
//! [`ConfigFs`] owns the mount state and the store, and translates fuser
//! callbacks into operations on them. The per-open file handle slot
//! carries the entry's inode; paths are only resolved on `lookup` and
//! `create`. Callbacks arrive serialized on the session loop, so no
//! locking happens here.

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
    TimeOrNow,
};
use libc::{EINVAL, ENOENT};
use tracing::{debug, error, warn};

use crate::handle::Attrs;
use crate::mount::{MountState, ROOT_INO};
use crate::store::ConfigStore;
use crate::utils::{mode_to_string, open_flags_to_string};

/// How long the kernel may cache the attributes we hand back.
const TTL: Duration = Duration::from_secs(1);

/// The mounted configuration filesystem.
#[derive(Debug)]
pub struct ConfigFs {
    state: MountState,
    store: Box<dyn ConfigStore>,
}

impl ConfigFs {
    /// A filesystem over `store`, with all entries owned by `uid`/`gid`.
    pub fn new(uid: u32, gid: u32, store: Box<dyn ConfigStore>) -> Self {
        Self {
            state: MountState::new(uid, gid),
            store,
        }
    }
}

fn file_attr(attrs: &Attrs) -> FileAttr {
    let kind = if attrs.mode & libc::S_IFMT == libc::S_IFDIR {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino: attrs.ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime: attrs.atime,
        mtime: attrs.mtime,
        ctime: attrs.ctime,
        crtime: attrs.ctime,
        kind,
        perm: (attrs.mode & 0o7777) as u16,
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

impl Filesystem for ConfigFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        // Warm the root cache so the first listing does not pay for it.
        if let Err(err) = self.state.reconcile(self.store.as_ref()) {
            error!("initial root rebuild: {err}");
        }
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("unmounting, releasing every entry");
        self.state.release_all();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let path = format!("/{name}");
        match self.state.find(self.store.as_ref(), &path) {
            Ok(entry) => reply.entry(&TTL, &file_attr(&entry.attrs()), 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        if ino == ROOT_INO {
            match self.state.dir_attrs(self.store.as_ref()) {
                Ok(attrs) => reply.attr(&TTL, &file_attr(&attrs)),
                Err(err) => reply.error(err.errno()),
            }
            return;
        }
        match self.state.find_ino(ino) {
            Ok(entry) => {
                entry.populate(self.store.as_ref());
                entry.attrs.atime = SystemTime::now();
                reply.attr(&TTL, &file_attr(&entry.attrs()));
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let entry = match self.state.find_ino(ino) {
            Ok(entry) => entry,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        if let Some(size) = size {
            debug!("truncate '{}' to {size}", entry.path());
            let size = match i64::try_from(size) {
                Ok(size) => size,
                Err(_) => {
                    reply.error(EINVAL);
                    return;
                }
            };
            if let Err(err) = entry.truncate(size) {
                reply.error(err.errno());
                return;
            }
        }
        reply.attr(&TTL, &file_attr(&entry.attrs()));
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let entry = match self.state.find_ino(ino) {
            Ok(entry) => entry,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        debug!("open '{}' ({})", entry.path(), open_flags_to_string(flags));
        if flags & libc::O_TRUNC != 0 {
            if let Err(err) = entry.truncate(0) {
                reply.error(err.errno());
                return;
            }
        } else {
            entry.populate(self.store.as_ref());
        }
        // The handle slot carries the inode; every later callback
        // resolves through it without touching paths.
        reply.opened(ino, 0);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if parent != ROOT_INO {
            reply.error(ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };
        let path = format!("/{name}");
        debug!("create '{path}' ({})", mode_to_string(mode));
        match self.state.create_entry(&path, mode) {
            Ok(entry) => {
                let ino = entry.attrs().ino;
                reply.created(&TTL, &file_attr(&entry.attrs()), 0, ino, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self.state.find_ino(ino) {
            Ok(entry) => reply.data(entry.read(offset as u64, size)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self.state.find_ino(ino) {
            Ok(entry) => match entry.write(offset as u64, data) {
                Ok(written) => reply.written(written as u32),
                Err(err) => reply.error(err.errno()),
            },
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Ok(entry) = self.state.find_ino(ino) {
            if let Err(err) = entry.parse_and_commit(self.store.as_mut()) {
                // Nothing to tell the closing process; the edits stay in
                // the buffer for the next attempt.
                warn!("'{}' not committed: {err}", entry.path());
            }
        }
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if ino != ROOT_INO {
            reply.error(ENOENT);
            return;
        }
        if let Err(err) = self.state.reconcile(self.store.as_ref()) {
            reply.error(err.errno());
            return;
        }
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(ENOENT);
            return;
        }
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        if let Err(err) = self.state.reconcile(self.store.as_ref()) {
            reply.error(err.errno());
            return;
        }
        let dots = [
            (ROOT_INO, ".".to_owned()),
            (ROOT_INO, "..".to_owned()),
        ];
        let entries = dots.into_iter().chain(
            self.state
                .entries()
                .map(|entry| (entry.attrs().ino, entry.package_name().to_owned())),
        );
        for (i, (ino, name)) in entries.enumerate().skip(offset as usize) {
            let kind = if ino == ROOT_INO {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            // The offset handed back is the index of the next entry.
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn readdirplus(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectoryPlus,
    ) {
        if ino != ROOT_INO {
            reply.error(ENOENT);
            return;
        }
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let root_attrs = match self.state.dir_attrs(self.store.as_ref()) {
            Ok(attrs) => attrs,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        // Each entry carries its attributes, sparing the kernel one
        // getattr round-trip per name.
        let mut entries = vec![(root_attrs, ".".to_owned()), (root_attrs, "..".to_owned())];
        entries.extend(
            self.state
                .entries()
                .map(|entry| (entry.attrs(), entry.package_name().to_owned())),
        );
        for (i, (attrs, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(attrs.ino, (i + 1) as i64, &name, &TTL, &file_attr(&attrs), 0) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrs_translate_to_kernel_form() {
        let now = SystemTime::now();
        let attrs = Attrs {
            ino: 7,
            mode: libc::S_IFREG | 0o644,
            nlink: 1,
            size: 1200,
            uid: 1000,
            gid: 100,
            atime: now,
            mtime: now,
            ctime: now,
        };
        let converted = file_attr(&attrs);
        assert_eq!(converted.ino, 7);
        assert_eq!(converted.kind, FileType::RegularFile);
        assert_eq!(converted.perm, 0o644);
        assert_eq!(converted.blocks, 3);

        let dir = Attrs {
            mode: libc::S_IFDIR | 0o644,
            ..attrs
        };
        assert_eq!(file_attr(&dir).kind, FileType::Directory);
    }
}
