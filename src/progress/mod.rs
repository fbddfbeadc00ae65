//! Rollout progress
//!
//! Turns repeated orchestrator snapshots into an ordered stream of progress
//! events and decides when a rollout has converged.
//!
//! - [`states`] - Task state ranking
//! - [`reducer`] - Canonical task per slot or node
//! - [`updater`] - Replicated and global progress strategies
//! - [`poller`] - The polling loop and update-status handling
//! - [`sink`] - Where progress events go

pub mod poller;
pub mod reducer;
pub mod sink;
pub mod states;
pub mod updater;

use crate::client::ClientError;
use thiserror::Error;

pub use poller::{service_progress, ConvergencePoller, PollOptions};
pub use sink::{
    ChannelSink, DiscardSink, JsonLinesSink, ProgressEvent, ProgressSink, RecordingSink,
    TerminalSink,
};
pub use updater::{initialize_updater, GlobalUpdater, ProgressUpdater, ReplicatedUpdater};

/// Errors that end a progress session
#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("unrecognized service mode")]
    UnrecognizedMode,

    #[error("no replica count")]
    NoReplicaCount,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("service update paused: {0}")]
    UpdatePaused(String),

    #[error("service rollback paused: {0}")]
    RollbackPaused(String),

    #[error("service rolled back: {0}")]
    RolledBack(String),

    #[error("failed to write progress: {0}")]
    Sink(#[from] std::io::Error),
}
