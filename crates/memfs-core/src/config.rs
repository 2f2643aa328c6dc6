// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for the in-memory filesystem

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Identity that owns every node and performs every permission check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub uid: u32,
    pub gid: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self { uid, gid }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Bits cleared from the default directory (0o777) and file (0o666) modes
    pub umask: u32,
    /// First inode number handed out by the inode pool
    pub inode_start: u64,
    /// First descriptor number handed out by the descriptor pool
    pub fd_start: u64,
    /// Path-resolution step budget before a lookup fails with ELOOP
    pub max_resolve_steps: u32,
    /// Block size reported by stat and used for the block count
    pub block_size: u64,
    pub security: SecurityPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            umask: 0o022,
            inode_start: 10001,
            fd_start: 1001,
            max_resolve_steps: 100,
            block_size: 2048,
            security: SecurityPolicy::default(),
        }
    }
}

/// Failure to read or parse a configuration file
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl FsConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub(crate) fn default_dir_mode(&self) -> u32 {
        0o777 & !self.umask
    }

    pub(crate) fn default_file_mode(&self) -> u32 {
        0o666 & !self.umask
    }
}
