//! Lifecycle states and transition events for case executions.
//!
//! Every node in the execution tree obeys the same finite state machine.
//! The two suspending and three terminating variants record *why* the node
//! is being suspended or terminated, so that the correct previous state can
//! be restored if the operation is later reversed (see
//! [`CaseExecution::set_current_state`](crate::engine::tree::CaseExecution)).
//!
//! # Examples
//!
//! ```rust
//! use caseweave::engine::state::CaseExecutionState;
//!
//! let state = CaseExecutionState::Active;
//! assert!(!state.is_terminal());
//!
//! // Persistence round-trip
//! let encoded = state.encode();
//! assert_eq!(encoded, "active");
//! assert_eq!(CaseExecutionState::decode(encoded), Some(state));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single case execution.
///
/// `New` is the initial state. `Completed`, `Terminated`, `Failed` and
/// `Closed` are terminal for ordinary purposes; a case instance may still be
/// closed after completing or terminating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaseExecutionState {
    /// Just instantiated by the parent; create listeners not yet notified.
    #[default]
    New,
    /// Waiting for an entry criterion (or for an occurrence, for milestones).
    Available,
    /// Entry criterion satisfied, waiting for a manual start.
    Enabled,
    /// Manually disabled; can be re-enabled.
    Disabled,
    /// Running.
    Active,
    /// Mid-suspension, initiated on this execution itself.
    SuspendingOnSuspension,
    /// Mid-suspension, propagated from the parent.
    SuspendingOnParentSuspension,
    /// Suspended; `previous_state` holds the state to restore on resume.
    Suspended,
    /// Mid-termination, initiated on this execution itself.
    TerminatingOnTermination,
    /// Mid-termination, propagated from the parent.
    TerminatingOnParentTermination,
    /// Mid-termination, driven by a satisfied exit criterion.
    TerminatingOnExit,
    /// Terminated.
    Terminated,
    /// Completed or occurred.
    Completed,
    /// Failed.
    Failed,
    /// Closed case instance.
    Closed,
}

impl CaseExecutionState {
    /// Encode a state into its persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Available => "available",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Active => "active",
            Self::SuspendingOnSuspension => "suspending_on_suspension",
            Self::SuspendingOnParentSuspension => "suspending_on_parent_suspension",
            Self::Suspended => "suspended",
            Self::TerminatingOnTermination => "terminating_on_termination",
            Self::TerminatingOnParentTermination => "terminating_on_parent_termination",
            Self::TerminatingOnExit => "terminating_on_exit",
            Self::Terminated => "terminated",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Decode a persisted string form back into a state.
    pub fn decode(s: &str) -> Option<Self> {
        Some(match s {
            "new" => Self::New,
            "available" => Self::Available,
            "enabled" => Self::Enabled,
            "disabled" => Self::Disabled,
            "active" => Self::Active,
            "suspending_on_suspension" => Self::SuspendingOnSuspension,
            "suspending_on_parent_suspension" => Self::SuspendingOnParentSuspension,
            "suspended" => Self::Suspended,
            "terminating_on_termination" => Self::TerminatingOnTermination,
            "terminating_on_parent_termination" => Self::TerminatingOnParentTermination,
            "terminating_on_exit" => Self::TerminatingOnExit,
            "terminated" => Self::Terminated,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "closed" => Self::Closed,
            _ => return None,
        })
    }

    /// Returns `true` while a suspension is in flight (either variant).
    #[must_use]
    pub fn is_suspending(&self) -> bool {
        matches!(
            self,
            Self::SuspendingOnSuspension | Self::SuspendingOnParentSuspension
        )
    }

    /// Returns `true` while a termination is in flight (any variant).
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        matches!(
            self,
            Self::TerminatingOnTermination
                | Self::TerminatingOnParentTermination
                | Self::TerminatingOnExit
        )
    }

    /// Returns `true` for states no ordinary operation leaves again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Terminated | Self::Failed | Self::Closed
        )
    }
}

impl fmt::Display for CaseExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Standard transition events a case execution can go through.
///
/// These are the event names sentry on-parts are declared against: an
/// on-part `(source: "c1", event: Complete)` is satisfied when the
/// execution for activity `c1` performs its `complete` transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionEvent {
    Create,
    Enable,
    Disable,
    Reenable,
    Start,
    ManualStart,
    Complete,
    ParentComplete,
    Occur,
    Terminate,
    ParentTerminate,
    Exit,
    Suspend,
    ParentSuspend,
    Resume,
    ParentResume,
    Close,
}

impl TransitionEvent {
    /// The event name as it appears in sentry on-part declarations.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Reenable => "reenable",
            Self::Start => "start",
            Self::ManualStart => "manualStart",
            Self::Complete => "complete",
            Self::ParentComplete => "parentComplete",
            Self::Occur => "occur",
            Self::Terminate => "terminate",
            Self::ParentTerminate => "parentTerminate",
            Self::Exit => "exit",
            Self::Suspend => "suspend",
            Self::ParentSuspend => "parentSuspend",
            Self::Resume => "resume",
            Self::ParentResume => "parentResume",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
