//! The frame's poll → rebuild → play loop.

use media_io::{DecodeError, EncodeError};
use playback::ProcessError;
use sync::SyncError;
use thiserror::Error;

mod orchestrator;
mod source;

pub use orchestrator::{Orchestrator, RebuildPlan};
pub use source::{ChangeSource, CloudSource, UploadSource};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),
    #[error("normalization failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("video build failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("playback failed: {0}")]
    Process(#[from] ProcessError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where the loop is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Syncing,
    Rebuilding,
    Playing,
    /// The last cycle failed and the default image is up.
    Degraded,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleState::Idle => "idle",
            CycleState::Syncing => "syncing",
            CycleState::Rebuilding => "rebuilding",
            CycleState::Playing => "playing",
            CycleState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}
