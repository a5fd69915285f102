//! Task lifecycle classification.
//!
//! The core owns no transition table. It only answers two questions about
//! a task handed in by the hosting protocol:
//!
//! - *resumable*: the task is paused waiting for input and the next turn
//!   may continue it mechanically.
//! - *interrupted*: the task was stopped abnormally and needs an operator
//!   before anything else happens to it.
//!
//! Both answers come from a [`StatusMapping`], a pair of state sets
//! supplied by the hosting protocol. [`StatusMapping::A2A`] is the mapping
//! for the A2A task states.

use std::any::Any;

use serde_json::Value;

use crate::task::{Task, TaskState};

/// Which task states a hosting protocol treats as resumable or interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMapping {
    pub resumable: &'static [TaskState],
    pub interrupted: &'static [TaskState],
}

impl StatusMapping {
    /// Mapping for A2A task states.
    ///
    /// The two sets are disjoint: a task waiting for input or credentials
    /// can be continued, while a rejected task or one whose state is
    /// unknown has to be looked at by an operator.
    pub const A2A: StatusMapping = StatusMapping {
        resumable: &[TaskState::InputRequired, TaskState::AuthRequired],
        interrupted: &[TaskState::Rejected, TaskState::Unknown],
    };

    pub fn is_resumable(&self, state: TaskState) -> bool {
        self.resumable.contains(&state)
    }

    pub fn is_interrupted(&self, state: TaskState) -> bool {
        self.interrupted.contains(&state)
    }

    /// States that are both resumable and interrupted under this mapping.
    ///
    /// A non-empty result makes the mapping ambiguous; [`TaskClassifier`]
    /// resolves such states as interrupted.
    pub fn overlaps(&self) -> Vec<TaskState> {
        self.resumable
            .iter()
            .copied()
            .filter(|state| self.interrupted.contains(state))
            .collect()
    }
}

impl Default for StatusMapping {
    fn default() -> Self {
        Self::A2A
    }
}

/// Classification of one task under a [`StatusMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Continue the paused task with the caller's input.
    Resume,
    /// Refuse to touch the task until an operator intervenes.
    OperatorRequired,
    /// Start a new task for the caller's input.
    StartNew,
}

/// Stateless classifier over task snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskClassifier {
    mapping: StatusMapping,
}

impl TaskClassifier {
    pub fn new(mapping: StatusMapping) -> Self {
        if !mapping.overlaps().is_empty() {
            tracing::warn!(
                overlapping = ?mapping.overlaps(),
                "status mapping overlaps; overlapping states classify as interrupted"
            );
        }
        Self { mapping }
    }

    pub fn mapping(&self) -> StatusMapping {
        self.mapping
    }

    pub fn is_resumable(&self, task: &Task) -> bool {
        self.mapping.is_resumable(task.state())
    }

    pub fn is_interrupted(&self, task: &Task) -> bool {
        self.mapping.is_interrupted(task.state())
    }

    /// Decide what the next turn does with `task`.
    pub fn disposition(&self, task: Option<&Task>) -> Disposition {
        match task {
            Some(task) if self.is_interrupted(task) => Disposition::OperatorRequired,
            Some(task) if self.is_resumable(task) => Disposition::Resume,
            _ => Disposition::StartNew,
        }
    }
}

impl TaskState {
    /// Resumable under the A2A mapping.
    pub fn is_resumable(self) -> bool {
        StatusMapping::A2A.is_resumable(self)
    }

    /// Interrupted under the A2A mapping.
    pub fn is_interrupted(self) -> bool {
        StatusMapping::A2A.is_interrupted(self)
    }
}

impl Task {
    pub fn is_resumable(&self) -> bool {
        self.state().is_resumable()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state().is_interrupted()
    }
}

/// Is `candidate` a task whose state is resumable?
///
/// Accepts a [`Task`] or a JSON [`Value`] that parses as one. Anything
/// else, including `None`-like values, strings and empty objects, is not
/// a task and yields `false`.
pub fn is_resumable(candidate: &dyn Any) -> bool {
    as_task(candidate).is_some_and(|task| task.is_resumable())
}

/// Is `candidate` a task whose state is interrupted?
///
/// Same input rules as [`is_resumable`].
pub fn is_interrupted(candidate: &dyn Any) -> bool {
    as_task(candidate).is_some_and(|task| task.is_interrupted())
}

fn as_task(candidate: &dyn Any) -> Option<Task> {
    if let Some(task) = candidate.downcast_ref::<Task>() {
        return Some(task.clone());
    }
    if let Some(Some(task)) = candidate.downcast_ref::<Option<Task>>() {
        return Some(task.clone());
    }
    candidate
        .downcast_ref::<Value>()
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ContextId;
    use serde_json::json;

    fn task_in(state: TaskState) -> Task {
        let mut task = Task::submitted(ContextId::from("ctx"));
        task.set_status(state, None);
        task
    }

    #[test]
    fn resumable_membership_for_every_state() {
        for state in TaskState::ALL {
            let expected = matches!(state, TaskState::InputRequired | TaskState::AuthRequired);
            assert_eq!(state.is_resumable(), expected, "{state}");
            assert_eq!(is_resumable(&task_in(state)), expected, "{state}");
        }
    }

    #[test]
    fn interrupted_membership_for_every_state() {
        for state in TaskState::ALL {
            let expected = matches!(state, TaskState::Rejected | TaskState::Unknown);
            assert_eq!(state.is_interrupted(), expected, "{state}");
            assert_eq!(is_interrupted(&task_in(state)), expected, "{state}");
        }
    }

    #[test]
    fn a2a_mapping_is_disjoint() {
        assert!(StatusMapping::A2A.overlaps().is_empty());
    }

    #[test]
    fn input_required_is_resumable_not_interrupted() {
        let task = task_in(TaskState::InputRequired);
        assert!(is_resumable(&task));
        assert!(!is_interrupted(&task));
    }

    #[test]
    fn non_task_inputs_classify_false() {
        let none: Option<Task> = None;
        let candidates: Vec<Box<dyn Any>> = vec![
            Box::new(none),
            Box::new(()),
            Box::new("input-required"),
            Box::new(String::from("input-required")),
            Box::new(3_i32),
            Box::new(json!({})),
            Box::new(Value::Null),
            Box::new(json!({"status": {"state": "input-required"}})),
        ];
        for candidate in &candidates {
            assert!(!is_resumable(candidate.as_ref()));
            assert!(!is_interrupted(candidate.as_ref()));
        }
    }

    #[test]
    fn json_task_is_classified() {
        let value = serde_json::to_value(task_in(TaskState::AuthRequired)).unwrap();
        assert!(is_resumable(&value));

        let value = serde_json::to_value(task_in(TaskState::Unknown)).unwrap();
        assert!(is_interrupted(&value));
    }

    #[test]
    fn wrapped_task_is_classified() {
        let task = Some(task_in(TaskState::Rejected));
        assert!(is_interrupted(&task));
    }

    #[test]
    fn disposition_follows_mapping() {
        let classifier = TaskClassifier::default();
        assert_eq!(classifier.disposition(None), Disposition::StartNew);
        assert_eq!(
            classifier.disposition(Some(&task_in(TaskState::InputRequired))),
            Disposition::Resume
        );
        assert_eq!(
            classifier.disposition(Some(&task_in(TaskState::Unknown))),
            Disposition::OperatorRequired
        );
        assert_eq!(
            classifier.disposition(Some(&task_in(TaskState::Completed))),
            Disposition::StartNew
        );
    }

    #[test]
    fn overlapping_mapping_prefers_interrupted() {
        const ODD: StatusMapping = StatusMapping {
            resumable: &[TaskState::InputRequired],
            interrupted: &[TaskState::InputRequired],
        };
        assert_eq!(ODD.overlaps(), vec![TaskState::InputRequired]);

        let classifier = TaskClassifier::new(ODD);
        assert_eq!(
            classifier.disposition(Some(&task_in(TaskState::InputRequired))),
            Disposition::OperatorRequired
        );
    }
}
