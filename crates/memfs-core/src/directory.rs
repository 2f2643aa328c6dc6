// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node arena and directory entry operations
//!
//! Every node lives in the inode pool and refers to other nodes only by
//! [`NodeId`]. Directory entries (including `.` and `..`) are the only links;
//! a node's `nlink` always equals the number of entries naming it, and the
//! node is released from the pool when that count reaches zero.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::{FsConfig, SecurityPolicy};
use crate::error::{FsError, FsResult};
use crate::flags::AccessMode;
use crate::id_pool::IdPool;
use crate::node::{Node, NodeKind};
use crate::symlink::SymlinkTarget;
use crate::types::{NodeId, Stats, TimeValue};

pub(crate) struct NodeTable {
    nodes: IdPool<Node>,
    root: NodeId,
    caller: SecurityPolicy,
    clock: Arc<dyn Clock>,
    dir_mode: u32,
    file_mode: u32,
    block_size: u64,
    pub(crate) max_resolve_steps: u32,
}

fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(FsError::InvalidArgument);
    }
    Ok(())
}

fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}

impl NodeTable {
    /// Build a table holding only the self-parented root directory.
    pub(crate) fn new(config: &FsConfig, clock: Arc<dyn Clock>) -> Self {
        let mut nodes = IdPool::new(config.inode_start);
        let now = clock.now_ms();
        let caller = config.security;
        let dir_mode = config.default_dir_mode();
        let root = NodeId(nodes.allocate_with(|id| {
            Node::new(NodeId(id), NodeKind::Directory { entries: HashMap::new() }, dir_mode, &caller, now)
        }));

        let mut table = Self {
            nodes,
            root,
            caller,
            clock,
            dir_mode,
            file_mode: config.default_file_mode(),
            block_size: config.block_size,
            max_resolve_steps: config.max_resolve_steps,
        };
        table.insert_entry(root, ".", root, now);
        table.insert_entry(root, "..", root, now);
        table
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn caller(&self) -> &SecurityPolicy {
        &self.caller
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Reserve the inode number of a node released while still open.
    pub(crate) fn hold_ino(&mut self, id: NodeId) {
        self.nodes.hold(id.0);
    }

    pub(crate) fn unhold_ino(&mut self, id: NodeId) {
        self.nodes.unhold(id.0);
    }

    pub(crate) fn node(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(id.0).ok_or(FsError::NotFound)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(FsError::NotFound)
    }

    fn entries(&self, dir: NodeId) -> FsResult<&HashMap<String, NodeId>> {
        match &self.node(dir)?.kind {
            NodeKind::Directory { entries } => Ok(entries),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn dir_node(&self, dir: NodeId) -> FsResult<&Node> {
        let node = self.node(dir)?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(node)
    }

    // Raw entry insertion; callers have already checked permissions and
    // name collisions.
    fn insert_entry(&mut self, dir: NodeId, name: &str, child: NodeId, now: i64) {
        if let Some(dir_node) = self.nodes.get_mut(dir.0) {
            if let NodeKind::Directory { entries } = &mut dir_node.kind {
                entries.insert(name.to_string(), child);
            }
            dir_node.mtouch(now);
        }
        if let Some(child_node) = self.nodes.get_mut(child.0) {
            child_node.add_ref();
            child_node.ctouch(now);
        }
    }

    // Raw entry removal. Returns the child node when this was its last link.
    fn remove_entry(&mut self, dir: NodeId, name: &str, now: i64) -> Option<Node> {
        let dir_node = self.nodes.get_mut(dir.0)?;
        let child = match &mut dir_node.kind {
            NodeKind::Directory { entries } => entries.remove(name)?,
            _ => return None,
        };
        dir_node.mtouch(now);

        let child_node = self.nodes.get_mut(child.0)?;
        child_node.ctouch(now);
        if child_node.drop_ref() > 0 {
            return None;
        }
        trace!(ino = %child, "releasing node");
        self.nodes.release(child.0)
    }

    fn allocate(&mut self, kind: NodeKind, perms: u32, now: i64) -> NodeId {
        let caller = self.caller;
        NodeId(self.nodes.allocate_with(|id| Node::new(NodeId(id), kind, perms, &caller, now)))
    }

    /// Look up `name` in `dir`; requires execute permission on `dir`.
    pub(crate) fn get(&self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        self.dir_node(dir)?.ensure_execute_access(&self.caller)?;
        self.entries(dir)?.get(name).copied().ok_or(FsError::NotFound)
    }

    /// Test for an entry; requires read permission on `dir`.
    pub(crate) fn has(&self, dir: NodeId, name: &str) -> FsResult<bool> {
        self.dir_node(dir)?.ensure_read_access(&self.caller)?;
        Ok(self.entries(dir)?.contains_key(name))
    }

    pub(crate) fn is_empty(&self, dir: NodeId) -> FsResult<bool> {
        Ok(self.entries(dir)?.keys().all(|name| is_dot_entry(name)))
    }

    /// Link an existing node under `name`.
    pub(crate) fn set(&mut self, dir: NodeId, name: &str, child: NodeId) -> FsResult<()> {
        validate_name(name)?;
        self.dir_node(dir)?.ensure_write_access(&self.caller)?;
        self.node(child)?;
        if self.entries(dir)?.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let now = self.now();
        self.insert_entry(dir, name, child, now);
        Ok(())
    }

    /// Remove the entry `name`, destroying the node if it was the last link.
    pub(crate) fn delete(&mut self, dir: NodeId, name: &str) -> FsResult<Option<Node>> {
        self.get(dir, name)?;
        self.dir_node(dir)?.ensure_write_access(&self.caller)?;
        let now = self.now();
        Ok(self.remove_entry(dir, name, now))
    }

    pub(crate) fn mkdir(&mut self, dir: NodeId, name: &str, mode: Option<u32>) -> FsResult<NodeId> {
        let now = self.now();
        let perms = mode.unwrap_or(self.dir_mode);
        let subdir = self.allocate(NodeKind::Directory { entries: HashMap::new() }, perms, now);
        if let Err(err) = self.set(dir, name, subdir) {
            self.nodes.release(subdir.0);
            return Err(err);
        }
        self.insert_entry(subdir, ".", subdir, now);
        self.insert_entry(subdir, "..", dir, now);
        debug!(ino = %subdir, name, "created directory");
        Ok(subdir)
    }

    pub(crate) fn mkfile(&mut self, dir: NodeId, name: &str, mode: Option<u32>) -> FsResult<NodeId> {
        let now = self.now();
        let perms = mode.unwrap_or(self.file_mode);
        let file = self.allocate(NodeKind::File { data: Vec::new() }, perms, now);
        if let Err(err) = self.set(dir, name, file) {
            self.nodes.release(file.0);
            return Err(err);
        }
        debug!(ino = %file, name, "created file");
        Ok(file)
    }

    pub(crate) fn symlink(&mut self, dir: NodeId, name: &str, target: &str) -> FsResult<NodeId> {
        if target.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let now = self.now();
        let link = self.allocate(NodeKind::Symlink(SymlinkTarget::parse(target)), self.file_mode, now);
        if let Err(err) = self.set(dir, name, link) {
            self.nodes.release(link.0);
            return Err(err);
        }
        debug!(ino = %link, name, target, "created symlink");
        Ok(link)
    }

    /// Add a hard link; directories cannot be hard linked.
    pub(crate) fn link(&mut self, dir: NodeId, name: &str, node: NodeId) -> FsResult<()> {
        if self.node(node)?.is_dir() {
            return Err(FsError::NotPermitted);
        }
        self.set(dir, name, node)
    }

    pub(crate) fn unlink(&mut self, dir: NodeId, name: &str) -> FsResult<Option<Node>> {
        let node = self.get(dir, name)?;
        if self.node(node)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        self.delete(dir, name)
    }

    fn check_removable_dir(&self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        if is_dot_entry(name) {
            return Err(FsError::InvalidArgument);
        }
        let subdir = self.get(dir, name)?;
        if !self.node(subdir)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !self.is_empty(subdir)? {
            return Err(FsError::NotEmpty);
        }
        self.dir_node(dir)?.ensure_write_access(&self.caller)?;
        Ok(subdir)
    }

    // Drops the subdirectory's own `.`/`..` links before the parent entry so
    // the final removal is the one that releases it.
    fn remove_dir(&mut self, dir: NodeId, name: &str, subdir: NodeId, now: i64) -> Option<Node> {
        self.remove_entry(subdir, "..", now);
        self.remove_entry(subdir, ".", now);
        self.remove_entry(dir, name, now)
    }

    pub(crate) fn rmdir(&mut self, dir: NodeId, name: &str) -> FsResult<()> {
        let subdir = self.check_removable_dir(dir, name)?;
        let now = self.now();
        self.remove_dir(dir, name, subdir, now);
        debug!(ino = %subdir, name, "removed directory");
        Ok(())
    }

    /// True when `node` is `dir` or one of its ancestors.
    fn is_ancestor(&self, node: NodeId, dir: NodeId) -> FsResult<bool> {
        let mut current = dir;
        loop {
            if current == node {
                return Ok(true);
            }
            let parent = self.entries(current)?.get("..").copied().ok_or(FsError::NotFound)?;
            if parent == current {
                return Ok(false);
            }
            current = parent;
        }
    }

    /// Move the entry `name` of `src` to `new_name` in `dst`.
    ///
    /// An existing destination is replaced: an empty directory by a
    /// directory, a file or symlink by a file or symlink. The new entry is
    /// linked before the old one is removed so the moved node never drops to
    /// zero links. Returns the replaced node if that released it.
    pub(crate) fn move_entry(
        &mut self,
        src: NodeId,
        name: &str,
        dst: NodeId,
        new_name: &str,
    ) -> FsResult<Option<Node>> {
        if is_dot_entry(name) || is_dot_entry(new_name) {
            return Err(FsError::NotPermitted);
        }
        validate_name(new_name)?;
        self.dir_node(src)?.ensure_write_access(&self.caller)?;
        self.dir_node(dst)?.ensure_write_access(&self.caller)?;

        let node = self.get(src, name)?;
        if src == dst && name == new_name {
            return Ok(None);
        }
        let moving_dir = self.node(node)?.is_dir();
        if moving_dir && self.is_ancestor(node, dst)? {
            return Err(FsError::InvalidArgument);
        }

        let now = self.now();
        let mut replaced = None;
        if self.has(dst, new_name)? {
            let existing = self.get(dst, new_name)?;
            if existing == node {
                return Ok(None);
            }
            if moving_dir {
                let existing = self.check_removable_dir(dst, new_name)?;
                replaced = self.remove_dir(dst, new_name, existing, now);
            } else {
                if self.node(existing)?.is_dir() {
                    return Err(FsError::IsADirectory);
                }
                replaced = self.remove_entry(dst, new_name, now);
            }
        }

        self.insert_entry(dst, new_name, node, now);
        self.remove_entry(src, name, now);
        if moving_dir && src != dst {
            self.remove_entry(node, "..", now);
            self.insert_entry(node, "..", dst, now);
        }
        debug!(ino = %node, from = name, to = new_name, "moved entry");
        Ok(replaced)
    }

    /// Sorted entry names without `.` and `..`; requires read permission.
    pub(crate) fn readdir(&self, dir: NodeId) -> FsResult<Vec<(String, NodeId)>> {
        self.dir_node(dir)?.ensure_read_access(&self.caller)?;
        let mut names: Vec<(String, NodeId)> = self
            .entries(dir)?
            .iter()
            .filter(|(name, _)| !is_dot_entry(name))
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        names.sort();
        Ok(names)
    }

    pub(crate) fn stat(&self, id: NodeId) -> FsResult<Stats> {
        self.node(id)?.stat(&self.caller, self.block_size)
    }

    pub(crate) fn stat_node(&self, node: &Node) -> FsResult<Stats> {
        node.stat(&self.caller, self.block_size)
    }

    pub(crate) fn chmod(&mut self, id: NodeId, mode: u32) -> FsResult<()> {
        let now = self.now();
        let caller = self.caller;
        self.node_mut(id)?.chmod(&caller, mode, now)
    }

    pub(crate) fn utimes(&mut self, id: NodeId, atime: &TimeValue, mtime: &TimeValue) -> FsResult<()> {
        let now = self.now();
        let caller = self.caller;
        self.node_mut(id)?.utimes(&caller, atime, mtime, now)
    }

    pub(crate) fn access(&self, id: NodeId, mode: AccessMode) -> FsResult<bool> {
        Ok(self.node(id)?.access(&self.caller, mode))
    }

    #[cfg(test)]
    pub(crate) fn set_owner(&mut self, id: NodeId, uid: u32, gid: u32) -> FsResult<()> {
        let node = self.node_mut(id)?;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MockClock, SystemClock};

    fn create_test_table() -> NodeTable {
        let config = FsConfig {
            security: SecurityPolicy { uid: 1000, gid: 1000 },
            ..FsConfig::default()
        };
        NodeTable::new(&config, Arc::new(SystemClock))
    }

    fn nlink(table: &NodeTable, id: NodeId) -> u32 {
        table.node(id).expect("node should exist").nlink
    }

    #[test]
    fn test_root_is_self_parented() {
        let table = create_test_table();
        let root = table.root();
        assert_eq!(root, NodeId(10001));
        assert_eq!(table.get(root, ".").unwrap(), root);
        assert_eq!(table.get(root, "..").unwrap(), root);
        assert_eq!(nlink(&table, root), 2);
        assert!(table.is_empty(root).unwrap());
    }

    #[test]
    fn test_mkdir_links() {
        let mut table = create_test_table();
        let root = table.root();
        let dir = table.mkdir(root, "foo", None).unwrap();

        assert_eq!(table.get(dir, ".").unwrap(), dir);
        assert_eq!(table.get(dir, "..").unwrap(), root);
        assert_eq!(nlink(&table, dir), 2);
        assert_eq!(nlink(&table, root), 3);
        assert_eq!(table.node(dir).unwrap().perms(), 0o755);

        assert_eq!(table.mkdir(root, "foo", None), Err(FsError::AlreadyExists));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_rmdir_releases_node() {
        let mut table = create_test_table();
        let root = table.root();
        let dir = table.mkdir(root, "foo", None).unwrap();
        table.mkfile(dir, "bar", None).unwrap();

        assert_eq!(table.rmdir(root, "foo"), Err(FsError::NotEmpty));
        table.unlink(dir, "bar").unwrap();
        table.rmdir(root, "foo").unwrap();

        assert!(table.node(dir).is_err());
        assert_eq!(nlink(&table, root), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rmdir_rejects_files() {
        let mut table = create_test_table();
        let root = table.root();
        table.mkfile(root, "foo", None).unwrap();
        assert_eq!(table.rmdir(root, "foo"), Err(FsError::NotADirectory));
        assert_eq!(table.rmdir(root, "."), Err(FsError::InvalidArgument));
    }

    #[test]
    fn test_hard_links() {
        let mut table = create_test_table();
        let root = table.root();
        let file = table.mkfile(root, "a", None).unwrap();
        table.link(root, "b", file).unwrap();
        assert_eq!(nlink(&table, file), 2);

        assert!(table.unlink(root, "a").unwrap().is_none());
        assert_eq!(nlink(&table, file), 1);
        let released = table.unlink(root, "b").unwrap().expect("last link releases the node");
        assert_eq!(released.ino, file);
        assert_eq!(released.nlink, 0);
        assert!(table.node(file).is_err());
    }

    #[test]
    fn test_link_and_unlink_directories() {
        let mut table = create_test_table();
        let root = table.root();
        let dir = table.mkdir(root, "d", None).unwrap();
        assert_eq!(table.link(root, "e", dir), Err(FsError::NotPermitted));
        assert_eq!(table.unlink(root, "d").unwrap_err(), FsError::IsADirectory);
    }

    #[test]
    fn test_invalid_names() {
        let mut table = create_test_table();
        let root = table.root();
        assert_eq!(table.mkfile(root, "", None), Err(FsError::InvalidArgument));
        assert_eq!(table.mkfile(root, "a/b", None), Err(FsError::InvalidArgument));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_inode_reuse() {
        let mut table = create_test_table();
        let root = table.root();
        let first = table.mkfile(root, "a", None).unwrap();
        table.unlink(root, "a").unwrap();
        let second = table.mkfile(root, "b", None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_move_between_directories() {
        let mut table = create_test_table();
        let root = table.root();
        let a = table.mkdir(root, "a", None).unwrap();
        let b = table.mkdir(root, "b", None).unwrap();
        let sub = table.mkdir(a, "sub", None).unwrap();

        table.move_entry(a, "sub", b, "moved").unwrap();
        assert_eq!(table.get(b, "moved").unwrap(), sub);
        assert_eq!(table.get(sub, "..").unwrap(), b);
        assert_eq!(table.get(a, "sub"), Err(FsError::NotFound));
        assert_eq!(nlink(&table, a), 2);
        assert_eq!(nlink(&table, b), 3);
        assert_eq!(nlink(&table, sub), 2);
    }

    #[test]
    fn test_move_replaces_file() {
        let mut table = create_test_table();
        let root = table.root();
        let a = table.mkfile(root, "a", None).unwrap();
        let b = table.mkfile(root, "b", None).unwrap();

        let replaced = table.move_entry(root, "a", root, "b").unwrap();
        assert_eq!(replaced.map(|node| node.ino), Some(b));
        assert_eq!(table.get(root, "b").unwrap(), a);
        assert_eq!(nlink(&table, a), 1);
    }

    #[test]
    fn test_move_type_conflicts() {
        let mut table = create_test_table();
        let root = table.root();
        let dir = table.mkdir(root, "dir", None).unwrap();
        table.mkdir(root, "full", None).unwrap();
        table.mkfile(root, "file", None).unwrap();
        let full = table.get(root, "full").unwrap();
        table.mkfile(full, "x", None).unwrap();

        assert_eq!(table.move_entry(root, "file", root, "dir").unwrap_err(), FsError::IsADirectory);
        assert_eq!(table.move_entry(root, "dir", root, "file").unwrap_err(), FsError::NotADirectory);
        assert_eq!(table.move_entry(root, "dir", root, "full").unwrap_err(), FsError::NotEmpty);
        assert_eq!(table.move_entry(root, "dir", dir, "inner").unwrap_err(), FsError::InvalidArgument);
        assert_eq!(table.move_entry(root, ".", root, "x").unwrap_err(), FsError::NotPermitted);
        assert_eq!(nlink(&table, dir), 2);
    }

    #[test]
    fn test_move_onto_self_is_noop() {
        let mut table = create_test_table();
        let root = table.root();
        let file = table.mkfile(root, "a", None).unwrap();
        table.link(root, "b", file).unwrap();
        assert!(table.move_entry(root, "a", root, "a").unwrap().is_none());
        assert!(table.move_entry(root, "a", root, "b").unwrap().is_none());
        assert_eq!(nlink(&table, file), 2);
    }

    #[test]
    fn test_readdir_sorted() {
        let mut table = create_test_table();
        let root = table.root();
        table.mkfile(root, "b", None).unwrap();
        table.mkdir(root, "a", None).unwrap();
        table.symlink(root, "c", "/a").unwrap();
        let names: Vec<String> = table.readdir(root).unwrap().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_directory_permissions() {
        let mut table = create_test_table();
        let root = table.root();
        let dir = table.mkdir(root, "d", None).unwrap();
        table.mkfile(dir, "f", None).unwrap();

        table.chmod(dir, 0o666).unwrap();
        assert_eq!(table.get(dir, "f"), Err(FsError::AccessDenied));
        table.chmod(dir, 0o333).unwrap();
        assert_eq!(table.has(dir, "f"), Err(FsError::AccessDenied));
        assert_eq!(table.readdir(dir).unwrap_err(), FsError::AccessDenied);
        table.chmod(dir, 0o555).unwrap();
        assert_eq!(table.mkfile(dir, "g", None), Err(FsError::AccessDenied));
        assert_eq!(table.unlink(dir, "f").unwrap_err(), FsError::AccessDenied);
    }

    #[test]
    fn test_foreign_owner_falls_back_to_other_bits() {
        let mut table = create_test_table();
        let root = table.root();
        let dir = table.mkdir(root, "d", Some(0o750)).unwrap();
        table.set_owner(dir, 0, 0).unwrap();
        assert_eq!(table.readdir(dir).unwrap_err(), FsError::AccessDenied);
        table.set_owner(dir, 0, 1000).unwrap();
        assert!(table.readdir(dir).unwrap().is_empty());
    }

    #[test]
    fn test_timestamps_follow_clock() {
        let mut clock = MockClock::new();
        let mut now = 1_000;
        clock.expect_now_ms().returning(move || {
            now += 1_000;
            now
        });
        let config = FsConfig {
            security: SecurityPolicy { uid: 1000, gid: 1000 },
            ..FsConfig::default()
        };
        let mut table = NodeTable::new(&config, Arc::new(clock));
        let root = table.root();
        let created = table.node(root).unwrap().times;
        assert_eq!(created.birthtime, 2_000);

        let file = table.mkfile(root, "f", None).unwrap();
        let root_times = table.node(root).unwrap().times;
        let file_times = table.node(file).unwrap().times;
        assert!(root_times.mtime > created.mtime);
        assert_eq!(root_times.ctime, created.ctime);
        assert!(file_times.ctime >= file_times.birthtime);

        table.chmod(file, 0o600).unwrap();
        let chmodded = table.node(file).unwrap().times;
        assert!(chmodded.ctime > file_times.ctime);
        assert_eq!(chmodded.mtime, file_times.mtime);
    }
}
