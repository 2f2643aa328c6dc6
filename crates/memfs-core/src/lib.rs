// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! MemFS Core - an in-memory virtual filesystem
//!
//! Models inodes, directories, regular files, symbolic links and file
//! descriptors entirely in memory with POSIX-like path resolution,
//! permission and timestamp semantics. [`Filesystem`] is the entry point;
//! it exposes a path-addressed API (`mkdir`, `rename`, `stat`, ...) and a
//! descriptor-addressed API (`open`, `read`, `write`, `close`, ...).

pub mod clock;
pub mod config;
pub mod encoding;
pub mod error;
pub mod filesystem;
pub mod flags;
pub mod types;

mod directory;
mod file;
mod id_pool;
mod node;
mod resolve;
mod symlink;

// Re-export the main API surface
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, FsConfig, SecurityPolicy};
pub use encoding::Encoding;
pub use error::{FsError, FsResult};
pub use filesystem::{Filesystem, MkdirOptions, WriteFileOptions};
pub use flags::{AccessIntent, AccessMode, COPYFILE_EXCL, OpenFlags};
pub use types::{DirEntry, Fd, FileTimes, NodeId, Stats, TimeValue};
