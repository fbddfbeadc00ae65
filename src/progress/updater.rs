//! Progress updaters
//!
//! One updater lives for a whole poll session. Each tick it receives the
//! current snapshot, emits a line per visible unit plus the overall counter,
//! and reports whether every unit is running.

use super::reducer;
use super::sink::{ProgressEvent, ProgressSink};
use super::states::{is_terminal, progress_value, LabelWidth, MAX_PROGRESS, MAX_PROGRESS_BARS};
use super::ProgressError;
use crate::model::{Service, Task, TaskState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;

/// Id of the aggregate counter line.
pub const OVERALL_PROGRESS: &str = "overall progress";

/// Longest error text shown for a unit, so narrow terminals do not wrap.
const MAX_ERROR_LEN: usize = 75;

/// Length node ids are shortened to.
const SHORT_ID_LEN: usize = 12;

/// Progress strategy for one service mode.
#[async_trait]
pub trait ProgressUpdater: Send {
    /// Consume one snapshot and emit its progress. Returns `true` when every
    /// unit is running.
    async fn update(
        &mut self,
        service: &Service,
        tasks: &[Task],
        active_nodes: &HashSet<String>,
        rollback: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<bool, ProgressError>;
}

/// Pick the updater for the service's mode. Called once per session.
pub fn initialize_updater(
    service: &Service,
    label_width: LabelWidth,
) -> Result<Box<dyn ProgressUpdater>, ProgressError> {
    if service.spec.mode.replicas().is_some() {
        return Ok(Box::new(ReplicatedUpdater::new(label_width)));
    }
    if service.spec.mode.global.is_some() {
        return Ok(Box::new(GlobalUpdater::new(label_width)));
    }
    Err(ProgressError::UnrecognizedMode)
}

/// Counts a task only when it is meant to keep running and it is.
fn is_running(task: &Task) -> bool {
    !is_terminal(&task.desired_state) && task.status.state == TaskState::Running
}

async fn write_overall_progress(
    sink: &mut dyn ProgressSink,
    numerator: u64,
    denominator: u64,
    rollback: bool,
) -> io::Result<()> {
    let action = if rollback {
        format!("rolling back update: {numerator} out of {denominator} tasks")
    } else {
        format!("{numerator} out of {denominator} tasks")
    };
    sink.emit(ProgressEvent::action(OVERALL_PROGRESS, action)).await
}

async fn write_unit_progress(
    sink: &mut dyn ProgressSink,
    id: String,
    task: &Task,
    label_width: LabelWidth,
    rollback: bool,
) -> io::Result<()> {
    if !task.status.err.is_empty() {
        return sink
            .emit(ProgressEvent::action(id, truncate_error(&task.status.err)))
            .await;
    }

    let observed = &task.status.state;
    if !is_terminal(&task.desired_state) && !is_terminal(observed) {
        sink.emit(ProgressEvent::bar(
            id,
            label_width.pad(observed.as_str()),
            progress_value(observed, rollback),
            MAX_PROGRESS,
        ))
        .await?;
    }
    Ok(())
}

/// Flatten an error onto one line and cap its length.
pub fn truncate_error(message: &str) -> String {
    let flat = message.replace('\n', " ");
    if flat.len() <= MAX_ERROR_LEN {
        return flat;
    }
    let mut cut = MAX_ERROR_LEN - 1;
    while !flat.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &flat[..cut])
}

/// Short form of an object id, as the CLI displays it.
pub fn truncate_id(id: &str) -> &str {
    let id = id.split_once(':').map_or(id, |(_, rest)| rest);
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Progress for a service with a fixed replica count, keyed by slot.
pub struct ReplicatedUpdater {
    label_width: LabelWidth,
    /// Slot number to display ordinal. Ordinals are handed out in the order
    /// slots are first seen and never reassigned, so a unit keeps its row.
    slot_map: HashMap<u64, usize>,
    initialized: bool,
    done: bool,
}

impl ReplicatedUpdater {
    pub fn new(label_width: LabelWidth) -> Self {
        Self {
            label_width,
            slot_map: HashMap::new(),
            initialized: false,
            done: false,
        }
    }

    async fn write_task_progress(
        &self,
        sink: &mut dyn ProgressSink,
        task: &Task,
        ordinal: usize,
        replicas: u64,
        rollback: bool,
    ) -> io::Result<()> {
        if self.done || replicas > MAX_PROGRESS_BARS as u64 || ordinal as u64 > replicas {
            return Ok(());
        }
        let id = format!("{ordinal}/{replicas}");
        write_unit_progress(sink, id, task, self.label_width, rollback).await
    }
}

#[async_trait]
impl ProgressUpdater for ReplicatedUpdater {
    async fn update(
        &mut self,
        service: &Service,
        tasks: &[Task],
        active_nodes: &HashSet<String>,
        rollback: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<bool, ProgressError> {
        let replicas = service
            .spec
            .mode
            .replicas()
            .ok_or(ProgressError::NoReplicaCount)?;

        if !self.initialized {
            self.slot_map.clear();
            write_overall_progress(sink, 0, replicas, rollback).await?;

            // Claim one row per replica up front so bars appear in order.
            if replicas <= MAX_PROGRESS_BARS as u64 {
                for i in 1..=replicas {
                    sink.emit(ProgressEvent::action(format!("{i}/{replicas}"), " "))
                        .await?;
                }
            }
            self.initialized = true;
        }

        let tasks_by_slot = reducer::tasks_by_slot(tasks, active_nodes);

        if self.done && tasks_by_slot.values().any(|t| t.status.state != TaskState::Running) {
            self.done = false;
        }

        let mut running = 0u64;
        for (slot, task) in &tasks_by_slot {
            let next = self.slot_map.len() + 1;
            let ordinal = *self.slot_map.entry(*slot).or_insert(next);

            if is_running(task) {
                running += 1;
            }

            self.write_task_progress(sink, task, ordinal, replicas, rollback)
                .await?;
        }

        if !self.done {
            write_overall_progress(sink, running, replicas, rollback).await?;
            if running == replicas {
                self.done = true;
            }
        }

        tracing::debug!(running, replicas, slots = tasks_by_slot.len(), "replicated tick");
        Ok(running == replicas)
    }
}

/// Progress for a global service, one unit per node.
///
/// The orchestrator creates the tasks for every eligible node at once, so the
/// nodes seen among the up-to-date tasks are taken as the target.
pub struct GlobalUpdater {
    label_width: LabelWidth,
    initialized: bool,
    done: bool,
}

impl GlobalUpdater {
    pub fn new(label_width: LabelWidth) -> Self {
        Self {
            label_width,
            initialized: false,
            done: false,
        }
    }

    async fn write_task_progress(
        &self,
        sink: &mut dyn ProgressSink,
        task: &Task,
        node_count: u64,
        rollback: bool,
    ) -> io::Result<()> {
        if self.done || node_count > MAX_PROGRESS_BARS as u64 {
            return Ok(());
        }
        let id = truncate_id(&task.node_id).to_string();
        write_unit_progress(sink, id, task, self.label_width, rollback).await
    }
}

#[async_trait]
impl ProgressUpdater for GlobalUpdater {
    async fn update(
        &mut self,
        _service: &Service,
        tasks: &[Task],
        active_nodes: &HashSet<String>,
        rollback: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<bool, ProgressError> {
        let tasks_by_node = reducer::tasks_by_node(tasks, active_nodes);
        let node_count = tasks_by_node.len() as u64;

        if !self.initialized {
            if node_count == 0 {
                // Either the tasks are not created yet or no node satisfies
                // the constraints. Both look the same from here.
                sink.emit(ProgressEvent::action(OVERALL_PROGRESS, "waiting for new tasks"))
                    .await?;
                return Ok(false);
            }
            write_overall_progress(sink, 0, node_count, rollback).await?;
            self.initialized = true;
        }

        if self.done && tasks_by_node.values().any(|t| t.status.state != TaskState::Running) {
            self.done = false;
        }

        let mut running = 0u64;
        for task in tasks_by_node.values() {
            if is_running(task) {
                running += 1;
            }
            self.write_task_progress(sink, task, node_count, rollback)
                .await?;
        }

        if !self.done {
            write_overall_progress(sink, running, node_count, rollback).await?;
            if running == node_count {
                self.done = true;
            }
        }

        tracing::debug!(running, nodes = node_count, "global tick");
        Ok(running == node_count)
    }
}
