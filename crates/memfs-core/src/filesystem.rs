// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path- and descriptor-addressed filesystem API

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::FsConfig;
use crate::directory::NodeTable;
use crate::encoding::Encoding;
use crate::error::{FsError, FsResult};
use crate::file::{FileHandle, HandleTarget};
use crate::flags::{AccessMode, OpenFlags, COPYFILE_EXCL};
use crate::id_pool::IdPool;
use crate::node::{Node, NodeKind};
use crate::types::{DirEntry, Fd, NodeId, Stats, TimeValue};

const TEMP_SUFFIX_LEN: usize = 8;
const TEMP_SUFFIX_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Options for [`Filesystem::mkdir`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MkdirOptions {
    /// Create missing parent directories
    pub recursive: bool,
    /// Permission bits; the umask-derived default when unset
    pub mode: Option<u32>,
}

impl MkdirOptions {
    pub fn recursive() -> Self {
        Self { recursive: true, mode: None }
    }

    pub fn with_mode(mode: u32) -> Self {
        Self { recursive: false, mode: Some(mode) }
    }
}

/// Options for [`Filesystem::write_file_with`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteFileOptions {
    pub flags: OpenFlags,
    /// Permission bits for a newly created file
    pub mode: Option<u32>,
}

impl Default for WriteFileOptions {
    fn default() -> Self {
        Self {
            flags: OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC,
            mode: None,
        }
    }
}

/// In-memory filesystem
///
/// Owns the node arena, the descriptor table and any files that lost their
/// last link while still open. All mutators take `&mut self`; hosts that
/// share an instance wrap it in their own lock.
pub struct Filesystem {
    tree: NodeTable,
    handles: IdPool<FileHandle>,
    orphans: HashMap<u64, Node>,
    next_orphan: u64,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self::new(FsConfig::default())
    }
}

impl Filesystem {
    pub fn new(config: FsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: FsConfig, clock: Arc<dyn Clock>) -> Self {
        let tree = NodeTable::new(&config, clock);
        debug!(
            root = %tree.root(),
            uid = config.security.uid,
            gid = config.security.gid,
            "created in-memory filesystem"
        );
        Self {
            tree,
            handles: IdPool::new(config.fd_start),
            orphans: HashMap::new(),
            next_orphan: 0,
        }
    }

    /// Number of live nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    // Keep a released file alive for the handles still pointing at it.
    fn reap(&mut self, released: Option<Node>) {
        let Some(node) = released else {
            return;
        };
        if !node.is_file() {
            return;
        }
        let ino = node.ino;
        let key = self.next_orphan;
        let mut adopted = false;
        for (_, handle) in self.handles.iter_mut() {
            if handle.target == HandleTarget::Linked(ino) {
                handle.target = HandleTarget::Orphan(key);
                adopted = true;
            }
        }
        if adopted {
            debug!(ino = %ino, "file unlinked while open");
            self.tree.hold_ino(ino);
            self.orphans.insert(key, node);
            self.next_orphan += 1;
        }
    }

    // ---- directories ----

    pub fn mkdir(&mut self, path: &str, options: MkdirOptions) -> FsResult<()> {
        let result = self
            .tree
            .find_dir(path)
            .and_then(|parent| self.tree.mkdir(parent.dir, &parent.name, options.mode));
        match result {
            Ok(_) => Ok(()),
            Err(FsError::NotFound) if options.recursive => {
                let parent = parent_path(path).ok_or(FsError::NotFound)?;
                self.mkdir(&parent, options)?;
                self.mkdir(path, MkdirOptions { recursive: false, ..options })
            }
            Err(err) => Err(err),
        }
    }

    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let parent = self.tree.find_dir(path)?;
        if parent.name == "." {
            return Err(FsError::NotPermitted);
        }
        self.tree.rmdir(parent.dir, &parent.name)
    }

    /// Create a directory named `prefix` plus a random suffix and return its
    /// canonical path.
    pub fn mkdtemp(&mut self, prefix: &str) -> FsResult<String> {
        let mut rng = rand::thread_rng();
        self.mkdtemp_with(prefix, || {
            (0..TEMP_SUFFIX_LEN)
                .map(|_| TEMP_SUFFIX_CHARS[rng.gen_range(0..TEMP_SUFFIX_CHARS.len())] as char)
                .collect()
        })
    }

    // Draws suffixes until one names a free entry.
    fn mkdtemp_with(
        &mut self,
        prefix: &str,
        mut next_suffix: impl FnMut() -> String,
    ) -> FsResult<String> {
        loop {
            let path = format!("{prefix}{}", next_suffix());
            match self.mkdir(&path, MkdirOptions::default()) {
                Ok(()) => return self.realpath(&path),
                Err(FsError::AlreadyExists) => {
                    trace!(path = %path, "temporary name taken, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let dir = self.find_directory(path)?;
        Ok(self.tree.readdir(dir)?.into_iter().map(|(name, _)| name).collect())
    }

    pub fn readdir_encoded(&self, path: &str, encoding: Encoding) -> FsResult<Vec<String>> {
        let dir = self.find_directory(path)?;
        Ok(self
            .tree
            .readdir(dir)?
            .into_iter()
            .map(|(name, _)| encoding.encode(name.as_bytes()))
            .collect())
    }

    /// Entries paired with their stat snapshots.
    pub fn readdir_entries(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let dir = self.find_directory(path)?;
        self.tree
            .readdir(dir)?
            .into_iter()
            .map(|(name, id)| Ok(DirEntry { name, stats: self.tree.stat(id)? }))
            .collect()
    }

    fn find_directory(&self, path: &str) -> FsResult<NodeId> {
        let dir = self.tree.find(path)?.node;
        if !self.tree.node(dir)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(dir)
    }

    // ---- links ----

    /// Create a symlink at `path` pointing at `target`.
    pub fn symlink(&mut self, target: &str, path: &str) -> FsResult<()> {
        let parent = self.tree.find_dir(path)?;
        self.tree.symlink(parent.dir, &parent.name, target)?;
        Ok(())
    }

    /// Hard link `existing` as `new_path`.
    pub fn link(&mut self, existing: &str, new_path: &str) -> FsResult<()> {
        let node = self.tree.lfind(existing)?.node;
        let parent = self.tree.find_dir(new_path)?;
        self.tree.link(parent.dir, &parent.name, node)
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let parent = self.tree.find_dir(path)?;
        let released = self.tree.unlink(parent.dir, &parent.name)?;
        self.reap(released);
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let src = self.tree.find_dir(from)?;
        let dst = self.tree.find_dir(to)?;
        let replaced = self.tree.move_entry(src.dir, &src.name, dst.dir, &dst.name)?;
        debug!(from, to, "renamed");
        self.reap(replaced);
        Ok(())
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        let node = self.tree.lfind(path)?.node;
        match &self.tree.node(node)?.kind {
            NodeKind::Symlink(target) => Ok(target.readlink()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    pub fn readlink_encoded(&self, path: &str, encoding: Encoding) -> FsResult<String> {
        Ok(encoding.encode(self.readlink(path)?.as_bytes()))
    }

    /// Canonical absolute path with every symlink resolved.
    pub fn realpath(&self, path: &str) -> FsResult<String> {
        Ok(self.tree.find(path)?.path)
    }

    pub fn realpath_encoded(&self, path: &str, encoding: Encoding) -> FsResult<String> {
        Ok(encoding.encode(self.realpath(path)?.as_bytes()))
    }

    // ---- metadata ----

    pub fn stat(&self, path: &str) -> FsResult<Stats> {
        self.tree.stat(self.tree.find(path)?.node)
    }

    pub fn lstat(&self, path: &str) -> FsResult<Stats> {
        self.tree.stat(self.tree.lfind(path)?.node)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let node = self.tree.find(path)?.node;
        self.tree.chmod(node, mode)
    }

    pub fn lchmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        let node = self.tree.lfind(path)?.node;
        self.tree.chmod(node, mode)
    }

    /// Ownership is fixed; always fails with `ENOSYS` once the path resolves.
    pub fn chown(&mut self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let node = self.tree.find(path)?.node;
        self.tree.node_mut(node)?.chown(uid, gid)
    }

    pub fn lchown(&mut self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let node = self.tree.lfind(path)?.node;
        self.tree.node_mut(node)?.chown(uid, gid)
    }

    pub fn truncate(&mut self, path: &str, len: u64) -> FsResult<()> {
        let node = self.tree.find(path)?.node;
        let now = self.tree.now();
        let file = self.tree.node_mut(node)?;
        if !file.is_file() {
            return Err(FsError::IsADirectory);
        }
        file.truncate(len, now)
    }

    pub fn utimes(&mut self, path: &str, atime: &TimeValue, mtime: &TimeValue) -> FsResult<()> {
        let node = self.tree.find(path)?.node;
        self.tree.utimes(node, atime, mtime)
    }

    pub fn lutimes(&mut self, path: &str, atime: &TimeValue, mtime: &TimeValue) -> FsResult<()> {
        let node = self.tree.lfind(path)?.node;
        self.tree.utimes(node, atime, mtime)
    }

    /// Whether `path` resolves and grants `mode`. Never fails.
    pub fn access(&self, path: &str, mode: AccessMode) -> bool {
        self.tree
            .find(path)
            .and_then(|resolved| self.tree.access(resolved.node, mode))
            .unwrap_or(false)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    // ---- descriptors ----

    /// Open `path`, creating it when `flags` contain `CREAT`. `mode` sets the
    /// permission bits of a newly created file.
    pub fn open(&mut self, path: &str, flags: OpenFlags, mode: Option<u32>) -> FsResult<Fd> {
        if !flags.contains(OpenFlags::CREAT) {
            let node = self.tree.find(path)?.node;
            return self.open_existing(node, flags);
        }

        let parent = self.tree.find_dir(path)?;
        if !self.tree.has(parent.dir, &parent.name)? {
            // The file stays behind even when its own mode refuses the open.
            let node = self.tree.mkfile(parent.dir, &parent.name, mode)?;
            return self.open_existing(node, flags);
        }
        let existing = self.tree.get(parent.dir, &parent.name)?;
        if self.tree.node(existing)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if flags.contains(OpenFlags::EXCL) {
            return Err(FsError::AlreadyExists);
        }
        let node = self.tree.find(path)?.node;
        self.open_existing(node, flags)
    }

    fn open_existing(&mut self, node: NodeId, flags: OpenFlags) -> FsResult<Fd> {
        let file = self.tree.node(node)?;
        if !file.is_file() {
            return Err(FsError::IsADirectory);
        }
        file.ensure_open_access(self.tree.caller(), flags)?;
        self.open_node(node, flags)
    }

    fn open_node(&mut self, node: NodeId, flags: OpenFlags) -> FsResult<Fd> {
        let now = self.tree.now();
        let handle = FileHandle::open(node, self.tree.node_mut(node)?, flags, now)?;
        let fd = Fd(self.handles.allocate(handle));
        debug!(%fd, ino = %node, ?flags, "opened");
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let handle = self.handles.release(fd.0).ok_or(FsError::BadFileDescriptor)?;
        if let HandleTarget::Orphan(key) = handle.target {
            let still_open = self.handles.iter().any(|(_, other)| other.target == handle.target);
            if !still_open {
                if let Some(orphan) = self.orphans.remove(&key) {
                    self.tree.unhold_ino(orphan.ino);
                    trace!(%fd, ino = %orphan.ino, "dropped unlinked file");
                }
            }
        }
        debug!(%fd, "closed");
        Ok(())
    }

    fn handle_parts(&mut self, fd: Fd) -> FsResult<(&mut FileHandle, &mut Node, i64)> {
        let now = self.tree.now();
        let Self { tree, handles, orphans, .. } = self;
        let handle = handles.get_mut(fd.0).ok_or(FsError::BadFileDescriptor)?;
        let node = match handle.target {
            HandleTarget::Linked(id) => tree.node_mut(id)?,
            HandleTarget::Orphan(key) => orphans.get_mut(&key).ok_or(FsError::BadFileDescriptor)?,
        };
        Ok((handle, node, now))
    }

    fn handle_node(&self, fd: Fd) -> FsResult<&Node> {
        let handle = self.handles.get(fd.0).ok_or(FsError::BadFileDescriptor)?;
        match handle.target {
            HandleTarget::Linked(id) => self.tree.node(id),
            HandleTarget::Orphan(key) => self.orphans.get(&key).ok_or(FsError::BadFileDescriptor),
        }
    }

    /// Read up to `length` bytes into `buf[offset..]` from the cursor, or from
    /// `position` without moving the cursor.
    pub fn read(
        &mut self,
        fd: Fd,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        let (handle, node, now) = self.handle_parts(fd)?;
        handle.read(node, buf, offset, length, position, now)
    }

    /// Write `buf[offset..offset + length]` (the rest of `buf` when `length`
    /// is unset) at the cursor, or at `position` which moves the cursor first.
    pub fn write(
        &mut self,
        fd: Fd,
        buf: &[u8],
        offset: usize,
        length: Option<usize>,
        position: Option<u64>,
    ) -> FsResult<usize> {
        let (handle, node, now) = self.handle_parts(fd)?;
        handle.write(node, buf, offset, length, position, now)
    }

    /// Write `text` decoded with `encoding`.
    pub fn write_str(
        &mut self,
        fd: Fd,
        text: &str,
        position: Option<u64>,
        encoding: Encoding,
    ) -> FsResult<usize> {
        let bytes = encoding.decode(text)?;
        self.write(fd, &bytes, 0, None, position)
    }

    pub fn fstat(&self, fd: Fd) -> FsResult<Stats> {
        self.tree.stat_node(self.handle_node(fd)?)
    }

    pub fn fchmod(&mut self, fd: Fd, mode: u32) -> FsResult<()> {
        let caller = *self.tree.caller();
        let (_, node, now) = self.handle_parts(fd)?;
        node.chmod(&caller, mode, now)
    }

    pub fn fchown(&mut self, fd: Fd, uid: u32, gid: u32) -> FsResult<()> {
        let (_, node, _) = self.handle_parts(fd)?;
        node.chown(uid, gid)
    }

    pub fn ftruncate(&mut self, fd: Fd, len: u64) -> FsResult<()> {
        let (handle, node, now) = self.handle_parts(fd)?;
        handle.truncate(node, len, now)
    }

    pub fn futimes(&mut self, fd: Fd, atime: &TimeValue, mtime: &TimeValue) -> FsResult<()> {
        let caller = *self.tree.caller();
        let (_, node, now) = self.handle_parts(fd)?;
        node.utimes(&caller, atime, mtime, now)
    }

    /// Nothing to flush; validates the descriptor.
    pub fn fsync(&self, fd: Fd) -> FsResult<()> {
        self.handle_node(fd).map(|_| ())
    }

    pub fn fdatasync(&self, fd: Fd) -> FsResult<()> {
        self.fsync(fd)
    }

    // ---- whole files ----

    pub fn read_file(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let fd = self.open(path, OpenFlags::RDONLY, None)?;
        let result = self.read_file_fd(fd);
        self.close(fd)?;
        result
    }

    pub fn read_file_to_string(&mut self, path: &str, encoding: Encoding) -> FsResult<String> {
        Ok(encoding.encode(&self.read_file(path)?))
    }

    pub fn write_file(&mut self, path: &str, data: &[u8]) -> FsResult<()> {
        self.write_file_with(path, data, &WriteFileOptions::default())
    }

    pub fn write_file_with(
        &mut self,
        path: &str,
        data: &[u8],
        options: &WriteFileOptions,
    ) -> FsResult<()> {
        let fd = self.open(path, options.flags, options.mode)?;
        let result = self.write_file_fd(fd, data);
        self.close(fd)?;
        result
    }

    pub fn append_file(&mut self, path: &str, data: &[u8]) -> FsResult<()> {
        let flags = OpenFlags::WRONLY | OpenFlags::APPEND | OpenFlags::CREAT;
        let fd = self.open(path, flags, None)?;
        let result = self.append_file_fd(fd, data);
        self.close(fd)?;
        result
    }

    /// Whole contents of an open file; the cursor does not move.
    pub fn read_file_fd(&mut self, fd: Fd) -> FsResult<Vec<u8>> {
        let (handle, node, now) = self.handle_parts(fd)?;
        handle.read_all(node, now)
    }

    /// Replace the contents of an open file.
    pub fn write_file_fd(&mut self, fd: Fd, data: &[u8]) -> FsResult<()> {
        let (handle, node, now) = self.handle_parts(fd)?;
        handle.replace(node, data, now)
    }

    pub fn append_file_fd(&mut self, fd: Fd, data: &[u8]) -> FsResult<()> {
        let (handle, node, now) = self.handle_parts(fd)?;
        handle.append(node, data, now)
    }

    /// Copy `src` to `dst`. With [`COPYFILE_EXCL`] in `flags` an existing
    /// destination fails with `EEXIST`.
    pub fn copy_file(&mut self, src: &str, dst: &str, flags: u32) -> FsResult<()> {
        let data = self.read_file(src)?;
        let mut options = WriteFileOptions::default();
        if flags & COPYFILE_EXCL != 0 {
            options.flags |= OpenFlags::EXCL;
        }
        self.write_file_with(dst, &data, &options)
    }

    #[cfg(test)]
    pub(crate) fn set_owner(&mut self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let node = self.tree.lfind(path)?.node;
        self.tree.set_owner(node, uid, gid)
    }
}

/// Lexical parent of `path`; `None` for the root.
fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => Some("/".to_string()),
    }
}
