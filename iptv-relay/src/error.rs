//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use iptv_playlist::{ParseError, ResolveError};
use thiserror::Error;

use crate::pipeline::Stage;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Usage errors carry the message shown verbatim to the user who ran the
/// command.
#[derive(Error, Debug)]
pub enum Error {
    #[error("You must be in a voice channel to {action} a stream.")]
    NoVoiceChannel { action: &'static str },

    #[error("A stream is already active. Stop it before starting a new one.")]
    AlreadyActive,

    #[error("A stream is already starting. Please wait.")]
    AlreadyStarting,

    #[error("The previous stream in this channel is still being cleaned up.")]
    CleanupInProgress,

    #[error("Invalid {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("No playlist configured. Set the playlist setting first.")]
    PlaylistEmpty,

    #[error("Invalid playlist: {0}")]
    PlaylistParse(#[from] ParseError),

    #[error("No channel matching \"{0}\" in the playlist.")]
    ChannelNotFound(String),

    #[error("Failed to spawn {stage} process: {source}")]
    Spawn {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} process exited before the pipeline was running")]
    StageExited { stage: Stage },

    #[error("{} did not list {min_segments} segments within {timeout:?}", .artifact.display())]
    ReadinessTimeout {
        artifact: PathBuf,
        min_segments: usize,
        timeout: Duration,
    },

    #[error("Failed to acquire {resource}: {reason}")]
    ResourceAcquisition {
        resource: &'static str,
        reason: String,
    },

    #[error("Stream start aborted: the session was torn down while starting")]
    StartAborted,

    #[error("IO error while {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by callers to decide how to report an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse or bad input; shown to the user as-is.
    Usage,
    Spawn,
    /// A supervised process died on its own.
    Exited,
    Timeout,
    ResourceAcquisition,
    Parse,
    Io,
    Internal,
}

impl Error {
    pub fn resource(resource: &'static str, reason: impl Into<String>) -> Self {
        Self::ResourceAcquisition {
            resource,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoVoiceChannel { .. }
            | Self::AlreadyActive
            | Self::AlreadyStarting
            | Self::CleanupInProgress
            | Self::InvalidArgument { .. }
            | Self::UnknownCommand(_)
            | Self::PlaylistEmpty
            | Self::ChannelNotFound(_) => ErrorKind::Usage,
            Self::PlaylistParse(_) => ErrorKind::Parse,
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::StageExited { .. } => ErrorKind::Exited,
            Self::ReadinessTimeout { .. } => ErrorKind::Timeout,
            Self::ResourceAcquisition { .. } => ErrorKind::ResourceAcquisition,
            Self::Io { .. } => ErrorKind::Io,
            Self::StartAborted | Self::Configuration(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self.kind(), ErrorKind::Usage | ErrorKind::Parse)
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Empty => Self::PlaylistEmpty,
            ResolveError::Parse(e) => Self::PlaylistParse(e),
            ResolveError::NotFound(query) => Self::ChannelNotFound(query),
        }
    }
}
