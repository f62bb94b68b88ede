//! Error taxonomy for the case engine.
//!
//! Three families matter to callers:
//!
//! 1. **Configuration errors**: the plan model and the running tree
//!    disagree (missing activity, dangling sentry reference, non-boolean
//!    guard). Fatal for the command, never retried.
//! 2. **Concurrency conflicts**: a persisted write lost the optimistic
//!    revision race ([`StoreError::RevisionConflict`]). Retryable; the
//!    surrounding command should be re-run from scratch. Use
//!    [`CaseEngineError::is_retryable`] to branch.
//! 3. **Unsupported operations**: a collaborator the operation needs is
//!    not configured in this context.
//!
//! Errors from guard evaluation and listener invocation propagate upward
//! uncaught through a firing pass. Atomicity is the job of the transaction
//! wrapping the command, not of this engine.

use miette::Diagnostic;
use thiserror::Error;

use crate::engine::state::CaseExecutionState;
use crate::engine::tree::ExecutionId;
use crate::services::{EvalError, FactoryError};
use crate::store::StoreError;
use crate::variables::ListenerError;

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CaseEngineError {
    /// The given execution id is not part of this case-instance tree.
    #[error("unknown case execution {execution}")]
    #[diagnostic(
        code(caseweave::engine::unknown_execution),
        help("The execution may already have been removed from the tree.")
    )]
    UnknownExecution { execution: ExecutionId },

    /// An execution references an activity id the case definition does not declare.
    #[error("case execution {execution}: no activity '{activity}' in the case definition")]
    #[diagnostic(code(caseweave::engine::missing_activity))]
    MissingActivity {
        execution: ExecutionId,
        activity: String,
    },

    /// A criterion references a sentry id with no matching declaration.
    #[error("case execution {execution}: no declaration for sentry '{sentry}'")]
    #[diagnostic(
        code(caseweave::engine::unknown_sentry),
        help("Every entry/exit criterion must reference a sentry declared in the enclosing stage.")
    )]
    UnknownSentry {
        execution: ExecutionId,
        sentry: String,
    },

    /// A sentry holds an if-part record but its declaration defines none.
    #[error("sentry '{sentry}' has no if-part declaration, but an if-part record exists")]
    #[diagnostic(code(caseweave::engine::missing_if_part))]
    MissingIfPart { sentry: String },

    /// A guard expression evaluated to something other than a boolean.
    #[error("guard of sentry '{sentry}' returned non-boolean value: {value}")]
    #[diagnostic(
        code(caseweave::engine::non_boolean_guard),
        help("If-part conditions must evaluate to true or false.")
    )]
    NonBooleanGuard {
        sentry: String,
        value: serde_json::Value,
    },

    /// The requested transition is not legal from the execution's current state.
    #[error("case execution {execution}: cannot perform '{transition}' in state {from}")]
    #[diagnostic(code(caseweave::engine::illegal_transition))]
    IllegalTransition {
        execution: ExecutionId,
        from: CaseExecutionState,
        transition: &'static str,
    },

    /// A stage cannot complete while a child is still in the given state.
    #[error("case execution {execution}: cannot complete, child {child} is {state}")]
    #[diagnostic(
        code(caseweave::engine::remaining_child),
        help("Complete, terminate, or disable the child first.")
    )]
    RemainingChild {
        execution: ExecutionId,
        child: ExecutionId,
        state: CaseExecutionState,
    },

    /// A collaborator required by the operation is not configured.
    #[error("'{operation}' is not supported in this context")]
    #[diagnostic(
        code(caseweave::engine::unsupported),
        help("Configure the missing collaborator on the engine builder.")
    )]
    Unsupported { operation: &'static str },

    /// Persistence failure, including lost optimistic-revision races.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// Guard expression evaluation failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    /// Task or sub-process factory failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Factory(#[from] FactoryError),

    /// A variable listener failed; the remainder of the dispatch is aborted.
    #[error("variable listener failed for '{variable}'")]
    #[diagnostic(code(caseweave::engine::listener))]
    Listener {
        variable: String,
        #[source]
        source: ListenerError,
    },
}

impl CaseEngineError {
    /// Whether the whole command can be retried from scratch.
    ///
    /// Only lost optimistic-revision races are retryable; everything else
    /// is a configuration or usage error that retrying cannot fix.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaseEngineError::Store(StoreError::RevisionConflict { .. })
        )
    }
}
