// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path resolution with symlink expansion and loop detection

use std::collections::VecDeque;

use tracing::trace;

use crate::directory::NodeTable;
use crate::error::{FsError, FsResult};
use crate::node::NodeKind;
use crate::types::NodeId;

/// A fully resolved path
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Resolved {
    /// Canonical absolute path of the node
    pub(crate) path: String,
    pub(crate) node: NodeId,
}

/// The directory that holds (or would hold) the last path component
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ParentRef {
    pub(crate) dir: NodeId,
    pub(crate) name: String,
}

#[derive(Clone, Copy)]
struct WalkOptions {
    stop_before_last: bool,
    follow_final_symlink: bool,
}

/// Split a path into absolute, lexically collapsed components. Relative
/// paths are taken relative to the root.
pub(crate) fn normalize(path: &str) -> Vec<String> {
    let mut steps: Vec<String> = Vec::new();
    for step in path.split('/') {
        match step {
            "" | "." => {}
            ".." => {
                steps.pop();
            }
            _ => steps.push(step.to_string()),
        }
    }
    steps
}

fn push_canonical(taken: &mut Vec<String>, step: String) {
    match step.as_str() {
        "." => {}
        ".." => {
            taken.pop();
        }
        _ => taken.push(step),
    }
}

impl NodeTable {
    /// Resolve `path`, following every symlink.
    pub(crate) fn find(&self, path: &str) -> FsResult<Resolved> {
        let walk = self.walk(
            path,
            WalkOptions { stop_before_last: false, follow_final_symlink: true },
        )?;
        Ok(walk.0)
    }

    /// Resolve `path`, following intermediate symlinks but not a final one.
    pub(crate) fn lfind(&self, path: &str) -> FsResult<Resolved> {
        let walk = self.walk(
            path,
            WalkOptions { stop_before_last: false, follow_final_symlink: false },
        )?;
        Ok(walk.0)
    }

    /// Resolve the parent directory of `path` plus the leaf name. The root
    /// resolves to itself with the name `"."`.
    pub(crate) fn find_dir(&self, path: &str) -> FsResult<ParentRef> {
        let (resolved, leaf) = self.walk(
            path,
            WalkOptions { stop_before_last: true, follow_final_symlink: true },
        )?;
        Ok(ParentRef {
            dir: resolved.node,
            name: leaf.unwrap_or_else(|| ".".to_string()),
        })
    }

    fn walk(&self, path: &str, options: WalkOptions) -> FsResult<(Resolved, Option<String>)> {
        let root = self.root();
        let mut node = root;
        let mut taken: Vec<String> = Vec::new();
        let mut left: VecDeque<String> = normalize(path).into();
        let mut budget = self.max_resolve_steps;

        while !left.is_empty() {
            budget = budget.saturating_sub(1);
            if budget == 0 {
                trace!(path, "symlink budget exhausted");
                return Err(FsError::TooManyLinks);
            }
            if left.len() == 1 && options.stop_before_last {
                break;
            }
            let Some(step) = left.pop_front() else {
                break;
            };

            let next = self.get(node, &step)?;
            let next_node = self.node(next)?;
            match &next_node.kind {
                NodeKind::Symlink(target) if options.follow_final_symlink || !left.is_empty() => {
                    next_node.ensure_read_access(self.caller())?;
                    if !target.is_relative() {
                        node = root;
                        taken.clear();
                    }
                    for target_step in target.steps().iter().rev() {
                        left.push_front(target_step.clone());
                    }
                }
                NodeKind::Directory { .. } => {
                    push_canonical(&mut taken, step);
                    node = next;
                }
                _ => {
                    if !left.is_empty() {
                        return Err(FsError::NotADirectory);
                    }
                    push_canonical(&mut taken, step);
                    node = next;
                }
            }
        }

        let resolved = Resolved { path: format!("/{}", taken.join("/")), node };
        Ok((resolved, left.pop_front()))
    }
}
