// rust/bsp-core/src/coordinator/paths.rs

//! Canonical node paths for coordination state.
//!
//! Layout under the root node:
//!
//! ```text
//! /{root}/{app}/master/{iteration}
//! /{root}/{app}/master/split/{iteration}/{chunk}
//! /{root}/{app}/workers/{iteration}/{container}
//! /{root}/{app}/workers/split/{iteration}/{container}/{chunk}
//! /{root}/{app}/election/{session}
//! ```
//!
//! Builders are pure. Segments are joined with [`SEPARATOR`], which must not
//! appear inside an app id or container id; check untrusted ids with
//! [`validate_segment`] first.

use std::fmt;

use crate::error::{CoordinationError, Result};

pub const SEPARATOR: char = '/';

/// Root node name used when none is configured.
pub const DEFAULT_ROOT: &str = "_bsp";

const MASTER_NODE: &str = "master";
const WORKERS_NODE: &str = "workers";
const SPLIT_NODE: &str = "split";
const ELECTION_NODE: &str = "election";

/// An absolute node path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(String);

impl NodePath {
    fn under_root(name: &str) -> Self {
        Self(format!("{SEPARATOR}{name}"))
    }

    /// Appends one segment.
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        Self(format!("{}{SEPARATOR}{segment}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

/// Checks that `segment` can be used as a single path segment.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains(SEPARATOR) {
        return Err(CoordinationError::invalid_segment(segment));
    }
    Ok(())
}

/// Path builders rooted at one root node name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScheme {
    root: String,
}

impl Default for PathScheme {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl PathScheme {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root_node(&self) -> NodePath {
        NodePath::under_root(&self.root)
    }

    pub fn app_node(&self, app_id: &str) -> NodePath {
        self.root_node().child(app_id)
    }

    pub fn master_base_node(&self, app_id: &str) -> NodePath {
        self.app_node(app_id).child(MASTER_NODE)
    }

    pub fn master_node(&self, app_id: &str, iteration: u32) -> NodePath {
        self.master_base_node(app_id).child(iteration)
    }

    pub fn master_split_node(&self, app_id: &str, iteration: u32) -> NodePath {
        self.master_base_node(app_id).child(SPLIT_NODE).child(iteration)
    }

    /// Master node of `iteration - 1`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::InvalidIteration`] for iteration 0.
    pub fn previous_master_node(&self, app_id: &str, iteration: u32) -> Result<NodePath> {
        let previous = previous_iteration(iteration)?;
        Ok(self.master_node(app_id, previous))
    }

    pub fn worker_base_node(&self, app_id: &str) -> NodePath {
        self.app_node(app_id).child(WORKERS_NODE)
    }

    /// Parent of every worker node of one iteration.
    pub fn worker_iteration_node(&self, app_id: &str, iteration: u32) -> NodePath {
        self.worker_base_node(app_id).child(iteration)
    }

    pub fn worker_node(&self, app_id: &str, container_id: &str, iteration: u32) -> NodePath {
        self.worker_iteration_node(app_id, iteration).child(container_id)
    }

    pub fn worker_split_node(&self, app_id: &str, container_id: &str, iteration: u32) -> NodePath {
        self.worker_base_node(app_id)
            .child(SPLIT_NODE)
            .child(iteration)
            .child(container_id)
    }

    /// Worker node of `iteration - 1`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::InvalidIteration`] for iteration 0.
    pub fn previous_worker_node(
        &self,
        app_id: &str,
        container_id: &str,
        iteration: u32,
    ) -> Result<NodePath> {
        let previous = previous_iteration(iteration)?;
        Ok(self.worker_node(app_id, container_id, previous))
    }

    pub fn election_base_node(&self, app_id: &str) -> NodePath {
        self.app_node(app_id).child(ELECTION_NODE)
    }

    pub fn election_node(&self, app_id: &str, session_id: u64) -> NodePath {
        self.election_base_node(app_id).child(session_id)
    }
}

fn previous_iteration(iteration: u32) -> Result<u32> {
    iteration
        .checked_sub(1)
        .ok_or_else(|| CoordinationError::invalid_iteration(iteration))
}
