// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Regular file contents and open file handles

use crate::config::SecurityPolicy;
use crate::error::{FsError, FsResult};
use crate::flags::{AccessIntent, OpenFlags};
use crate::node::{Node, NodeKind};
use crate::types::NodeId;

impl Node {
    pub(crate) fn data(&self) -> FsResult<&[u8]> {
        match &self.kind {
            NodeKind::File { data } => Ok(data),
            _ => Err(FsError::IsADirectory),
        }
    }

    fn data_mut(&mut self) -> FsResult<&mut Vec<u8>> {
        match &mut self.kind {
            NodeKind::File { data } => Ok(data),
            _ => Err(FsError::IsADirectory),
        }
    }

    /// Shrink or zero-extend the file to `size` bytes.
    pub(crate) fn truncate(&mut self, size: u64, now: i64) -> FsResult<()> {
        let size = usize::try_from(size).map_err(|_| FsError::InvalidArgument)?;
        self.data_mut()?.resize(size, 0);
        self.mtouch(now);
        Ok(())
    }

    /// Check the permissions an open with `flags` needs.
    pub(crate) fn ensure_open_access(&self, caller: &SecurityPolicy, flags: OpenFlags) -> FsResult<()> {
        let intent = flags.access_intent();
        if intent.can_read() {
            self.ensure_read_access(caller)?;
        }
        if intent.can_write() {
            self.ensure_write_access(caller)?;
        }
        Ok(())
    }
}

/// What an open handle points at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandleTarget {
    /// A file still reachable through the directory tree
    Linked(NodeId),
    /// A file whose last link was removed while handles were open
    Orphan(u64),
}

/// An open file session: target, access flags and cursor
#[derive(Debug)]
pub(crate) struct FileHandle {
    pub(crate) target: HandleTarget,
    flags: OpenFlags,
    pos: u64,
}

fn checked_range(buf_len: usize, offset: usize, length: usize) -> FsResult<std::ops::Range<usize>> {
    let end = offset.checked_add(length).ok_or(FsError::InvalidArgument)?;
    if end > buf_len {
        return Err(FsError::InvalidArgument);
    }
    Ok(offset..end)
}

impl FileHandle {
    /// Open `file`. Truncation happens before the cursor is placed, so an
    /// append-mode cursor lands at the post-truncation end.
    pub(crate) fn open(target: NodeId, file: &mut Node, flags: OpenFlags, now: i64) -> FsResult<Self> {
        if !file.is_file() {
            return Err(FsError::IsADirectory);
        }
        if flags.contains(OpenFlags::TRUNC) {
            file.truncate(0, now)?;
        }
        let pos = if flags.contains(OpenFlags::APPEND) { file.size() } else { 0 };
        Ok(Self { target: HandleTarget::Linked(target), flags, pos })
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    fn intent(&self) -> AccessIntent {
        self.flags.access_intent()
    }

    fn ensure_readable(&self) -> FsResult<()> {
        if self.intent().can_read() {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    fn ensure_writable(&self) -> FsResult<()> {
        if self.intent().can_write() {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    /// Splice `buf[offset..offset + length]` into the file at the cursor (or
    /// at `position`, which moves the cursor first). `length` defaults to the
    /// rest of the buffer. Returns the number of bytes written.
    pub(crate) fn write(
        &mut self,
        file: &mut Node,
        buf: &[u8],
        offset: usize,
        length: Option<usize>,
        position: Option<u64>,
        now: i64,
    ) -> FsResult<usize> {
        let length = match length {
            Some(length) => length,
            None => buf.len().checked_sub(offset).ok_or(FsError::InvalidArgument)?,
        };
        let range = checked_range(buf.len(), offset, length)?;
        self.ensure_writable()?;

        // The file may have shrunk underneath the cursor.
        self.pos = position.unwrap_or(self.pos).min(file.size());
        let start = usize::try_from(self.pos).map_err(|_| FsError::InvalidArgument)?;
        let data = file.data_mut()?;
        let end = (start + length).min(data.len());
        data.splice(start..end, buf[range].iter().copied());
        file.mtouch(now);
        self.pos = (start + length) as u64;
        Ok(length)
    }

    /// Copy up to `length` bytes from the cursor (or a clamped `position`)
    /// into `buf[offset..]`. Only a cursor read advances the cursor.
    pub(crate) fn read(
        &mut self,
        file: &mut Node,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
        now: i64,
    ) -> FsResult<usize> {
        checked_range(buf.len(), offset, length)?;
        self.ensure_readable()?;

        let data = file.data()?;
        let size = data.len() as u64;
        let start = position.unwrap_or(self.pos).min(size);
        let end = start.saturating_add(length as u64).min(size);
        let count = (end - start) as usize;
        let start = start as usize;
        buf[offset..offset + count].copy_from_slice(&data[start..start + count]);
        file.atouch(now);
        if position.is_none() {
            self.pos = self.pos.saturating_add(length as u64).min(size);
        }
        Ok(count)
    }

    /// The whole file, read from offset zero without moving the cursor.
    pub(crate) fn read_all(&mut self, file: &mut Node, now: i64) -> FsResult<Vec<u8>> {
        let size = usize::try_from(file.size()).map_err(|_| FsError::InvalidArgument)?;
        let mut buf = vec![0; size];
        let count = self.read(file, &mut buf, 0, size, Some(0), now)?;
        buf.truncate(count);
        Ok(buf)
    }

    pub(crate) fn append(&mut self, file: &mut Node, data: &[u8], now: i64) -> FsResult<()> {
        let size = file.size();
        self.write(file, data, 0, Some(data.len()), Some(size), now)?;
        Ok(())
    }

    /// Replace the whole contents with `data`.
    pub(crate) fn replace(&mut self, file: &mut Node, data: &[u8], now: i64) -> FsResult<()> {
        self.truncate(file, 0, now)?;
        self.append(file, data, now)
    }

    pub(crate) fn truncate(&mut self, file: &mut Node, size: u64, now: i64) -> FsResult<()> {
        self.ensure_writable()?;
        file.truncate(size, now)?;
        self.pos = self.pos.min(size);
        Ok(())
    }
}
