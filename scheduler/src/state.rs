//! Lifecycle of a single monitor task.

use std::fmt;

/// CREATED → RUNNING → CANCELLING → STOPPED. STOPPED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Created,
    Running,
    Cancelling,
    Stopped,
}

impl TaskState {
    pub fn is_live(self) -> bool {
        matches!(self, TaskState::Created | TaskState::Running)
    }

    /// Moves forward only; a late write from the loop cannot undo a
    /// cancellation already observed by the scheduler.
    pub(crate) fn advance(&mut self, next: TaskState) {
        if next > *self {
            *self = next;
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Running => "RUNNING",
            TaskState::Cancelling => "CANCELLING",
            TaskState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}
