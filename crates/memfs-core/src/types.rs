// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the in-memory filesystem

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{FsError, FsResult};

/// Inode number of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open file descriptor number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u64);

impl Fd {
    pub fn new(fd: u64) -> Self {
        Self(fd)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// File timestamps, in milliseconds since the Unix epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

impl FileTimes {
    pub(crate) fn at(now: i64) -> Self {
        Self { atime: now, mtime: now, ctime: now, birthtime: now }
    }
}

/// Raw stat snapshot of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub dev: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub blksize: u64,
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
}

impl Stats {
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT as u32
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == libc::S_IFREG as u32
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }
}

/// Directory listing entry paired with the entry's stat snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stats: Stats,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.stats.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.stats.is_directory()
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.stats.is_symbolic_link()
    }
}

/// A timestamp argument accepted by `utimes`
#[derive(Clone, Debug, PartialEq)]
pub enum TimeValue {
    /// Milliseconds since the epoch
    Millis(i64),
    /// Seconds since the epoch, possibly fractional
    Seconds(f64),
    /// Seconds since the epoch written as a decimal string, e.g. `"1700000000.5"`
    SecondsStr(String),
    Date(DateTime<Utc>),
}

impl TimeValue {
    pub(crate) fn to_millis(&self) -> FsResult<i64> {
        match self {
            TimeValue::Millis(ms) => Ok(*ms),
            TimeValue::Seconds(secs) => seconds_to_millis(*secs),
            TimeValue::SecondsStr(text) => {
                if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || c == '.') {
                    return Err(FsError::InvalidArgument);
                }
                let secs: f64 = text.parse().map_err(|_| FsError::InvalidArgument)?;
                seconds_to_millis(secs)
            }
            TimeValue::Date(date) => Ok(date.timestamp_millis()),
        }
    }
}

fn seconds_to_millis(secs: f64) -> FsResult<i64> {
    if !secs.is_finite() {
        return Err(FsError::InvalidArgument);
    }
    Ok((secs * 1000.0).round() as i64)
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(date: DateTime<Utc>) -> Self {
        TimeValue::Date(date)
    }
}
