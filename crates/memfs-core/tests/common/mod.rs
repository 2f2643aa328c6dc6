// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

#![allow(dead_code)]

use memfs_core::{Filesystem, FsConfig, OpenFlags, SecurityPolicy};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> FsConfig {
    FsConfig {
        security: SecurityPolicy { uid: 1000, gid: 1000 },
        ..FsConfig::default()
    }
}

pub fn create_test_fs() -> Filesystem {
    init_tracing();
    Filesystem::new(test_config())
}

pub fn flags(mnemonic: &str) -> OpenFlags {
    mnemonic.parse().expect("known open mnemonic")
}
