// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem nodes: identity, permission bits, ownership, timestamps and
//! link counting shared by every node variant

use std::collections::HashMap;

use crate::config::SecurityPolicy;
use crate::error::{FsError, FsResult};
use crate::flags::AccessMode;
use crate::symlink::SymlinkTarget;
use crate::types::{FileTimes, NodeId, Stats, TimeValue};

/// Reported size of directories and symlinks
pub(crate) const NON_FILE_SIZE: u64 = 512;

/// Node variants
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    File { data: Vec<u8> },
    Directory { entries: HashMap<String, NodeId> },
    Symlink(SymlinkTarget),
}

impl NodeKind {
    fn type_bits(&self) -> u32 {
        match self {
            NodeKind::File { .. } => libc::S_IFREG as u32,
            NodeKind::Directory { .. } => libc::S_IFDIR as u32,
            NodeKind::Symlink(_) => libc::S_IFLNK as u32,
        }
    }
}

/// Filesystem node
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) ino: NodeId,
    pub(crate) mode: u32,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) times: FileTimes,
    pub(crate) nlink: u32,
    pub(crate) kind: NodeKind,
}

#[derive(Clone, Copy)]
enum Perm {
    Read,
    Write,
    Execute,
}

impl Perm {
    /// (owner, group, other) bits for this permission
    fn bits(self) -> (u32, u32, u32) {
        match self {
            Perm::Read => (0o400, 0o040, 0o004),
            Perm::Write => (0o200, 0o020, 0o002),
            Perm::Execute => (0o100, 0o010, 0o001),
        }
    }
}

impl Node {
    /// A fresh, unlinked node. `nlink` starts at zero; linking it into a
    /// directory is what brings it to life.
    pub(crate) fn new(
        ino: NodeId,
        kind: NodeKind,
        perms: u32,
        owner: &SecurityPolicy,
        now: i64,
    ) -> Self {
        Self {
            ino,
            mode: (perms & 0o777) | kind.type_bits(),
            uid: owner.uid,
            gid: owner.gid,
            times: FileTimes::at(now),
            nlink: 0,
            kind,
        }
    }

    pub(crate) fn perms(&self) -> u32 {
        self.mode & 0o777
    }

    pub(crate) fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { data } => data.len() as u64,
            NodeKind::Directory { .. } | NodeKind::Symlink(_) => NON_FILE_SIZE,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub(crate) fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub(crate) fn stat(&self, caller: &SecurityPolicy, block_size: u64) -> FsResult<Stats> {
        self.ensure_read_access(caller)?;
        let size = self.size();
        Ok(Stats {
            dev: 0,
            mode: self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: block_size,
            ino: self.ino.0,
            size,
            blocks: size.div_ceil(block_size.max(1)),
            atime_ms: self.times.atime,
            mtime_ms: self.times.mtime,
            ctime_ms: self.times.ctime,
            birthtime_ms: self.times.birthtime,
        })
    }

    /// Replace the permission bits, keeping the type bits.
    pub(crate) fn set_perms(&mut self, perms: u32) {
        self.mode = (self.mode & !0o777) | (perms & 0o777);
    }

    pub(crate) fn atouch(&mut self, now: i64) {
        self.times.atime = now;
    }

    pub(crate) fn ctouch(&mut self, now: i64) {
        self.times.atime = now;
        self.times.ctime = now;
    }

    pub(crate) fn mtouch(&mut self, now: i64) {
        self.times.atime = now;
        self.times.mtime = now;
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn touch(&mut self, now: i64) {
        self.times.atime = now;
        self.times.mtime = now;
        self.times.ctime = now;
    }

    pub(crate) fn add_ref(&mut self) {
        self.nlink += 1;
    }

    /// Drop one link; returns the remaining count.
    pub(crate) fn drop_ref(&mut self) -> u32 {
        self.nlink = self.nlink.saturating_sub(1);
        self.nlink
    }

    fn check(&self, caller: &SecurityPolicy, perm: Perm) -> bool {
        let (user_bit, group_bit, other_bit) = perm.bits();
        let perms = self.perms();
        if perms & user_bit != 0 && caller.uid == self.uid {
            return true;
        }
        if perms & group_bit != 0 && caller.gid == self.gid {
            return true;
        }
        perms & other_bit != 0
    }

    pub(crate) fn check_read_access(&self, caller: &SecurityPolicy) -> bool {
        self.check(caller, Perm::Read)
    }

    pub(crate) fn check_write_access(&self, caller: &SecurityPolicy) -> bool {
        self.check(caller, Perm::Write)
    }

    pub(crate) fn check_execute_access(&self, caller: &SecurityPolicy) -> bool {
        self.check(caller, Perm::Execute)
    }

    pub(crate) fn ensure_read_access(&self, caller: &SecurityPolicy) -> FsResult<()> {
        if self.check_read_access(caller) {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    pub(crate) fn ensure_write_access(&self, caller: &SecurityPolicy) -> FsResult<()> {
        if self.check_write_access(caller) {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    pub(crate) fn ensure_execute_access(&self, caller: &SecurityPolicy) -> FsResult<()> {
        if self.check_execute_access(caller) {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    // Nodes are always owned by the configured identity and ownership cannot
    // change, so the caller is always the owner.
    fn ensure_owner(&self, _caller: &SecurityPolicy) -> FsResult<()> {
        Ok(())
    }

    pub(crate) fn chmod(&mut self, caller: &SecurityPolicy, mode: u32, now: i64) -> FsResult<()> {
        self.ensure_owner(caller)?;
        self.set_perms(mode);
        self.ctouch(now);
        Ok(())
    }

    pub(crate) fn chown(&mut self, _uid: u32, _gid: u32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    pub(crate) fn utimes(
        &mut self,
        caller: &SecurityPolicy,
        atime: &TimeValue,
        mtime: &TimeValue,
        now: i64,
    ) -> FsResult<()> {
        let atime = atime.to_millis()?;
        let mtime = mtime.to_millis()?;
        self.ensure_owner(caller)?;
        self.times.atime = atime;
        self.times.mtime = mtime;
        self.times.ctime = now;
        Ok(())
    }

    pub(crate) fn access(&self, caller: &SecurityPolicy, mode: AccessMode) -> bool {
        if mode.contains(AccessMode::READ) && !self.check_read_access(caller) {
            return false;
        }
        if mode.contains(AccessMode::WRITE) && !self.check_write_access(caller) {
            return false;
        }
        if mode.contains(AccessMode::EXECUTE) && !self.check_execute_access(caller) {
            return false;
        }
        true
    }
}
