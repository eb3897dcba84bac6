// rust/bsp-core/src/error.rs

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CoordinationError {

    #[error("Coordination service '{servers}' unavailable after {attempts} attempt(s)")]
    Unavailable {
        servers: String,
        attempts: u32,
        #[source]
        source: Option<StoreError>,
    },

    #[error("Coordination session expired: {context}")]
    SessionExpired {
        context: String,
    },

    #[error("Store operation '{op}' failed at '{path}'")]
    Store {
        op: &'static str,
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("Child '{name}' under '{parent}' is not a chunk index")]
    MalformedChildName {
        parent: String,
        name: String,
    },

    #[error("Iteration {iteration} has no previous iteration")]
    InvalidIteration {
        iteration: u32,
    },

    #[error("Path segment '{segment}' is empty or contains '/'")]
    InvalidSegment {
        segment: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Coordinator command failed: {message}")]
    Command {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Chunk {index} task failed: {message}")]
    ChunkTask {
        index: usize,
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

// Convenience constructors
impl CoordinationError {

    pub fn unavailable(
        servers: impl Into<String>,
        attempts: u32,
        source: Option<StoreError>,
    ) -> Self {
        Self::Unavailable {
            servers: servers.into(),
            attempts,
            source,
        }
    }

    pub fn session_expired(context: impl Into<String>) -> Self {
        Self::SessionExpired {
            context: context.into(),
        }
    }

    /// Wraps a store failure. An expired session is promoted to
    /// [`CoordinationError::SessionExpired`] so it is never mistaken for a
    /// transient failure.
    pub fn store(op: &'static str, path: impl Into<String>, source: StoreError) -> Self {
        let path = path.into();
        match source {
            StoreError::SessionExpired => Self::SessionExpired {
                context: format!("{op} on '{path}'"),
            },
            source => Self::Store { op, path, source },
        }
    }

    pub fn malformed_child(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MalformedChildName {
            parent: parent.into(),
            name: name.into(),
        }
    }

    pub fn invalid_iteration(iteration: u32) -> Self {
        Self::InvalidIteration { iteration }
    }

    pub fn invalid_segment(segment: impl Into<String>) -> Self {
        Self::InvalidSegment {
            segment: segment.into(),
        }
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
            source: None,
        }
    }

    pub fn command_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Command {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn chunk_task(index: usize, message: impl Into<String>) -> Self {
        Self::ChunkTask {
            index,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for errors the process must not continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired { .. } | Self::Cancelled)
    }
}
