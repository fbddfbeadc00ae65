//! Task state ranking
//!
//! Every recognized lifecycle state maps to a fixed rank. Ranks up to
//! `running` are the visible progression; the ranks above it are terminal and
//! only matter for ordering and filtering.

use crate::model::TaskState;

/// Rank of the `running` state, also the length of the progress bar.
pub const RUNNING_RANK: i64 = 9;

/// Bars are drawn out of this many steps.
pub const MAX_PROGRESS: i64 = RUNNING_RANK;

/// Above this many units, per-unit bars are not drawn.
pub const MAX_PROGRESS_BARS: usize = 20;

/// Rank of a state, or `None` for a state outside the lifecycle table.
pub fn rank(state: &TaskState) -> Option<i64> {
    let rank = match state {
        TaskState::New => 1,
        TaskState::Allocated => 2,
        TaskState::Pending => 3,
        TaskState::Assigned => 4,
        TaskState::Accepted => 5,
        TaskState::Preparing => 6,
        TaskState::Ready => 7,
        TaskState::Starting => 8,
        TaskState::Running => 9,
        TaskState::Complete => 10,
        TaskState::Shutdown => 11,
        TaskState::Failed => 12,
        TaskState::Rejected => 13,
        TaskState::Unrecognized(_) => return None,
    };
    Some(rank)
}

pub fn is_recognized(state: &TaskState) -> bool {
    rank(state).is_some()
}

/// True for states past `running`. Unrecognized states are not terminal.
pub fn is_terminal(state: &TaskState) -> bool {
    rank(state).is_some_and(|r| r > RUNNING_RANK)
}

/// Position of a state on the progress bar. A rollback walks the bar
/// backwards, so a running task reads as empty.
pub fn progress_value(state: &TaskState, rollback: bool) -> i64 {
    let rank = rank(state).unwrap_or(0);
    if rollback {
        RUNNING_RANK - rank
    } else {
        rank
    }
}

/// Column width that fits every live state label, so bars line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelWidth(usize);

impl LabelWidth {
    /// Measure the longest non-terminal label in the rank table.
    pub fn from_rank_table() -> Self {
        let width = TaskState::RECOGNIZED
            .iter()
            .filter(|state| !is_terminal(state))
            .map(|state| state.as_str().len())
            .max()
            .unwrap_or(0);
        Self(width)
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// Left-align a label in the column.
    pub fn pad(self, label: &str) -> String {
        format!("{:<width$}", label, width = self.0)
    }
}

impl Default for LabelWidth {
    fn default() -> Self {
        Self::from_rank_table()
    }
}
