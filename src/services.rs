//! Collaborator interfaces consumed by the engine.
//!
//! The engine performs no I/O of its own. Guard expressions go through a
//! [`GuardEvaluator`]; user tasks and sub-process/sub-case instances are
//! produced by a [`TaskFactory`] and stored on the execution as opaque
//! handles. Both are trait objects supplied at engine construction; an
//! engine built without one answers the operations that need it with
//! [`CaseEngineError::Unsupported`](crate::errors::CaseEngineError).

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::engine::tree::ExecutionId;
use crate::variables::VariableView;

/// Guard expression evaluation failure.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to evaluate guard '{expression}': {message}")]
#[diagnostic(code(caseweave::services::eval))]
pub struct EvalError {
    pub expression: String,
    pub message: String,
}

impl EvalError {
    pub fn new<E: Into<String>, M: Into<String>>(expression: E, message: M) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Evaluates boolean guard expressions against a variable scope.
///
/// The engine calls [`evaluate`](Self::evaluate) for the if-part of a
/// sentry, in the context of the if-part's owning execution. The result
/// must be a JSON boolean; anything else is rejected by the engine as a
/// configuration error.
///
/// A blanket implementation lets plain closures act as evaluators:
///
/// ```rust
/// use caseweave::services::{EvalError, GuardEvaluator};
/// use caseweave::variables::VariableView;
/// use serde_json::{json, Value};
///
/// let evaluator = |expr: &str, scope: &VariableView| -> Result<Value, EvalError> {
///     match expr {
///         "always" => Ok(json!(true)),
///         _ => Err(EvalError::new(expr, "unknown expression")),
///     }
/// };
/// let scope = VariableView::default();
/// assert_eq!(evaluator.evaluate("always", &scope).unwrap(), json!(true));
/// ```
pub trait GuardEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, scope: &VariableView) -> Result<Value, EvalError>;
}

impl<F> GuardEvaluator for F
where
    F: Fn(&str, &VariableView) -> Result<Value, EvalError> + Send + Sync,
{
    fn evaluate(&self, expression: &str, scope: &VariableView) -> Result<Value, EvalError> {
        self(expression, scope)
    }
}

/// Task or sub-process factory failure.
#[derive(Debug, Error, Diagnostic)]
#[error("factory failed for execution {execution}: {message}")]
#[diagnostic(code(caseweave::services::factory))]
pub struct FactoryError {
    pub execution: ExecutionId,
    pub message: String,
}

impl FactoryError {
    pub fn new<M: Into<String>>(execution: ExecutionId, message: M) -> Self {
        Self {
            execution,
            message: message.into(),
        }
    }
}

/// Opaque handle to a user task created for a human-task execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
}

/// Opaque handle to a spawned sub-process or sub-case instance.
///
/// `super_execution` is the originating execution in this tree; handle and
/// back-reference form a bidirectional bookkeeping pair and are set and
/// cleared together on the execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubInstanceHandle {
    pub id: String,
    pub super_execution: ExecutionId,
}

/// Produces the side effects of reaching `ACTIVE` on task-like activities.
pub trait TaskFactory: Send + Sync {
    /// Create a user task for a human-task execution.
    fn create_task(
        &self,
        execution: ExecutionId,
        activity_id: &str,
    ) -> Result<TaskHandle, FactoryError>;

    /// Spawn a sub-process instance for a process-task execution.
    fn create_sub_process(
        &self,
        execution: ExecutionId,
        activity_id: &str,
    ) -> Result<SubInstanceHandle, FactoryError>;

    /// Spawn a sub-case instance for a case-task execution.
    fn create_sub_case(
        &self,
        execution: ExecutionId,
        activity_id: &str,
    ) -> Result<SubInstanceHandle, FactoryError>;
}
