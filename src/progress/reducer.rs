//! Snapshot reduction
//!
//! The orchestrator hands back every up-to-date task, including the
//! duplicates left behind by restarts and start-first updates. These helpers
//! fold that list into one canonical task per slot or per node.

use super::states::{is_recognized, rank};
use crate::model::Task;
use std::collections::{BTreeMap, HashSet};

/// Whether `challenger` should replace `existing` under the same key.
///
/// The task with the lower desired state wins. With equal desired states the
/// one with the lower or equal observed state wins, so an existing entry is
/// kept on a full tie. This keeps a unit that is being replaced from showing
/// up twice.
pub fn supersedes(existing: &Task, challenger: &Task) -> bool {
    let existing_desired = rank(&existing.desired_state).unwrap_or(0);
    let challenger_desired = rank(&challenger.desired_state).unwrap_or(0);
    if existing_desired < challenger_desired {
        return false;
    }
    if existing_desired == challenger_desired
        && rank(&existing.status.state).unwrap_or(0) <= rank(&challenger.status.state).unwrap_or(0)
    {
        return false;
    }
    true
}

/// Canonical task per replica slot.
///
/// Tasks that are not yet assigned to a node are kept; assigned tasks on a
/// node outside `active_nodes` are dropped.
pub fn tasks_by_slot<'a>(tasks: &'a [Task], active_nodes: &HashSet<String>) -> BTreeMap<u64, &'a Task> {
    fold(tasks, |task| {
        if task.node_id.is_empty() || active_nodes.contains(&task.node_id) {
            Some(task.slot)
        } else {
            None
        }
    })
}

/// Canonical task per node. Only active nodes are counted.
pub fn tasks_by_node<'a>(
    tasks: &'a [Task],
    active_nodes: &HashSet<String>,
) -> BTreeMap<String, &'a Task> {
    fold(tasks, |task| {
        active_nodes
            .contains(&task.node_id)
            .then(|| task.node_id.clone())
    })
}

fn fold<'a, K, F>(tasks: &'a [Task], key_of: F) -> BTreeMap<K, &'a Task>
where
    K: Ord,
    F: Fn(&Task) -> Option<K>,
{
    let mut canonical: BTreeMap<K, &'a Task> = BTreeMap::new();
    for task in tasks {
        if !is_recognized(&task.desired_state) || !is_recognized(&task.status.state) {
            continue;
        }
        let Some(key) = key_of(task) else {
            continue;
        };
        let replace = canonical
            .get(&key)
            .map_or(true, |existing| supersedes(existing, task));
        if replace {
            canonical.insert(key, task);
        }
    }
    canonical
}
