use std::fmt;

use crate::sync::TaskState;

/// What the last task recorded by a readiness check is doing.
///
/// Sampled without the session lock: the task may change state the moment
/// after it was read. Good enough for a diagnostic line, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterStatus {
    NoWaitingTask,
    Sleeping,
    Running,
}

impl From<TaskState> for WaiterStatus {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Sleeping => Self::Sleeping,
            TaskState::Running => Self::Running,
        }
    }
}

impl fmt::Display for WaiterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoWaitingTask => "no waiting task",
            Self::Sleeping => "sleeping",
            Self::Running => "running",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        assert_eq!(WaiterStatus::NoWaitingTask.to_string(), "no waiting task");
        assert_eq!(WaiterStatus::Sleeping.to_string(), "sleeping");
        assert_eq!(WaiterStatus::Running.to_string(), "running");
        assert_eq!(WaiterStatus::from(TaskState::Sleeping), WaiterStatus::Sleeping);
    }
}
