//! Convergence poller
//!
//! Drives one progress session: polls the service, its up-to-date tasks and
//! the node list, feeds them to the updater for the service's mode, and
//! follows the update status until the rollout is stable, fails, or the
//! operator detaches.

use super::sink::{ProgressEvent, ProgressSink};
use super::states::LabelWidth;
use super::updater::{initialize_updater, ProgressUpdater};
use super::ProgressError;
use crate::client::{OrchestratorClient, TaskFilter};
use crate::model::{Node, UpdateState};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Id used for stabilization notices.
const VERIFY: &str = "verify";

/// Id used for the rollback notice.
const ROLLBACK: &str = "rollback";

/// Timing knobs for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between ticks.
    pub poll_interval: Duration,
    /// Stabilization window used when the service does not configure one.
    pub default_monitor: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            default_monitor: Duration::from_secs(5),
        }
    }
}

/// What a tick decided.
enum Tick {
    Continue,
    Finished,
}

/// Poll-session state. Everything here lives for exactly one session.
pub struct ConvergencePoller<'a, C: ?Sized> {
    client: &'a C,
    service_id: String,
    options: PollOptions,
    label_width: LabelWidth,
    updater: Option<Box<dyn ProgressUpdater>>,
    converged: bool,
    /// First tick of the current converged stretch.
    converged_at: Option<Instant>,
    monitor: Duration,
    rollback: bool,
}

impl<'a, C: OrchestratorClient + ?Sized> ConvergencePoller<'a, C> {
    pub fn new(client: &'a C, service_id: impl Into<String>, options: PollOptions) -> Self {
        Self {
            client,
            service_id: service_id.into(),
            options,
            label_width: LabelWidth::from_rank_table(),
            updater: None,
            converged: false,
            converged_at: None,
            monitor: options.default_monitor,
            rollback: false,
        }
    }

    /// Poll until the rollout settles, fails, or `cancel` fires.
    ///
    /// Cancellation only detaches this observer; the rollout itself keeps
    /// going on the orchestrator, so it is reported as `Ok`.
    pub async fn run(
        &mut self,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ProgressError> {
        tracing::info!(service = %self.service_id, "watching service rollout");
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                step = self.step(sink) => Some(step?),
            };

            match step {
                Some(Tick::Continue) => {}
                Some(Tick::Finished) => return Ok(()),
                None => return self.detach(sink).await,
            }
        }
    }

    /// One tick followed by the poll interval.
    async fn step(&mut self, sink: &mut dyn ProgressSink) -> Result<Tick, ProgressError> {
        let tick = self.tick(sink).await?;
        if let Tick::Continue = tick {
            tokio::time::sleep(self.options.poll_interval).await;
        }
        Ok(tick)
    }

    async fn tick(&mut self, sink: &mut dyn ProgressSink) -> Result<Tick, ProgressError> {
        let service = self.client.get_service(&self.service_id).await?;

        if let Some(monitor) = service.monitor() {
            self.monitor = monitor;
        }

        if self.updater.is_none() {
            self.updater = Some(initialize_updater(&service, self.label_width)?);
        }

        if let Some(status) = &service.update_status {
            match status.state {
                UpdateState::Updating => self.rollback = false,
                UpdateState::Completed => {
                    // The orchestrator may call it done before the tasks
                    // were seen running here; keep watching until they are.
                    if self.converged {
                        tracing::info!(service = %self.service_id, "update completed");
                        return Ok(Tick::Finished);
                    }
                }
                UpdateState::Paused => {
                    return Err(ProgressError::UpdatePaused(status.message.clone()));
                }
                UpdateState::RollbackStarted => {
                    if !self.rollback && !status.message.is_empty() {
                        sink.emit(ProgressEvent::action(ROLLBACK, status.message.clone()))
                            .await?;
                    }
                    self.rollback = true;
                }
                UpdateState::RollbackPaused => {
                    return Err(ProgressError::RollbackPaused(status.message.clone()));
                }
                UpdateState::RollbackCompleted => {
                    if !self.converged {
                        return Err(ProgressError::RolledBack(status.message.clone()));
                    }
                    return Ok(Tick::Finished);
                }
                UpdateState::Unknown => {}
            }
        }

        if let Some(since) = self.converged_at {
            if self.converged && since.elapsed() >= self.monitor {
                sink.emit(ProgressEvent::action(VERIFY, "Service converged"))
                    .await?;
                tracing::info!(service = %self.service_id, "service converged");
                return Ok(Tick::Finished);
            }
        }

        let tasks = self
            .client
            .list_tasks(&TaskFilter::up_to_date(&self.service_id))
            .await?;
        let nodes = self.client.list_nodes().await?;
        let active = active_nodes(&nodes);

        tracing::debug!(
            tasks = tasks.len(),
            active_nodes = active.len(),
            rollback = self.rollback,
            "polled snapshot"
        );

        let updater = match self.updater.as_mut() {
            Some(updater) => updater,
            None => return Err(ProgressError::UnrecognizedMode),
        };
        self.converged = updater
            .update(&service, &tasks, &active, self.rollback, sink)
            .await?;

        if self.converged {
            let since = *self.converged_at.get_or_insert_with(Instant::now);
            if let Some(wait) = self.monitor.checked_sub(since.elapsed()) {
                sink.emit(ProgressEvent::action(
                    VERIFY,
                    format!(
                        "Waiting {} seconds to verify that tasks are stable...",
                        wait.as_secs() + 1
                    ),
                ))
                .await?;
            }
        } else {
            if self.converged_at.is_some() {
                tracing::warn!(service = %self.service_id, "task left running state after convergence");
                sink.emit(ProgressEvent::action(VERIFY, "Detected task failure"))
                    .await?;
            }
            self.converged_at = None;
        }

        Ok(Tick::Continue)
    }

    async fn detach(&self, sink: &mut dyn ProgressSink) -> Result<(), ProgressError> {
        tracing::info!(service = %self.service_id, converged = self.converged, "detached from rollout");
        if !self.converged {
            sink.emit(ProgressEvent::message("Operation continuing in background."))
                .await?;
            sink.emit(ProgressEvent::message(format!(
                "Use `docker service ps {}` to check progress.",
                self.service_id
            )))
            .await?;
        }
        Ok(())
    }
}

/// Ids of every node that is not down.
pub fn active_nodes(nodes: &[Node]) -> HashSet<String> {
    nodes
        .iter()
        .filter(|n| n.is_active())
        .map(|n| n.id.clone())
        .collect()
}

/// Report progress for `service_id` until its rollout converges.
///
/// The sink is closed exactly once before returning, on every path. An
/// error from the session takes precedence over an error while closing.
pub async fn service_progress<C>(
    client: &C,
    service_id: &str,
    sink: &mut dyn ProgressSink,
    cancel: &CancellationToken,
    options: PollOptions,
) -> Result<(), ProgressError>
where
    C: OrchestratorClient + ?Sized,
{
    let mut poller = ConvergencePoller::new(client, service_id, options);
    let result = poller.run(sink, cancel).await;
    let closed = sink.close().await;
    result?;
    closed.map_err(ProgressError::from)
}
