// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Symbolic link targets

/// Parsed symlink target: the non-empty components plus whether the
/// target text was relative
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SymlinkTarget {
    relative: bool,
    steps: Vec<String>,
}

impl SymlinkTarget {
    pub(crate) fn parse(target: &str) -> Self {
        Self {
            relative: !target.starts_with('/'),
            steps: target.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect(),
        }
    }

    pub(crate) fn is_relative(&self) -> bool {
        self.relative
    }

    pub(crate) fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Target text as stored, with redundant slashes dropped.
    pub(crate) fn readlink(&self) -> String {
        let joined = self.steps.join("/");
        if self.relative {
            joined
        } else {
            format!("/{joined}")
        }
    }
}
