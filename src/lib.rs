//! converge - live rollout progress for orchestrated services
//!
//! Follows a rolling update (or rollback) of a replicated or global service
//! by polling the orchestrator, and turns each snapshot of tasks into
//! per-task progress bars plus an overall counter. The session ends once the
//! service has held a converged state for its monitor window, when the
//! update is paused or rolled back, or when the operator detaches.
//!
//! # Modules
//!
//! - [`model`] - Service, task and node snapshots
//! - [`client`] - Orchestrator query interface and the engine REST client
//! - [`progress`] - Reduction, progress updaters, the poller and sinks
//! - [`config`] - Configuration file and environment overrides
//! - [`logging`] - File logging while the terminal shows progress
//!
//! # Example
//!
//! ```rust,no_run
//! use converge::client::EngineClient;
//! use converge::progress::{service_progress, PollOptions, TerminalSink};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = EngineClient::new("tcp://127.0.0.1:2375", Duration::from_secs(30))?;
//! let mut sink = TerminalSink::new(std::io::stdout(), true);
//! let cancel = CancellationToken::new();
//! service_progress(&client, "web", &mut sink, &cancel, PollOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod logging;
pub mod model;
pub mod progress;

pub use client::{ClientError, EngineClient, OrchestratorClient};
pub use config::AppConfig;
pub use progress::{service_progress, PollOptions, ProgressError};
