//! Variable events, listeners, and the scope view used by guard evaluation.
//!
//! Variables live in node-local stores; a name is resolved by walking from
//! the owning execution up to the case-instance root, with local entries
//! shadowing ancestors. Every write raises a [`VariableEvent`] that is
//! dispatched to listeners (through the per-case-instance queue) and to the
//! sentry engine's variable-triggered path.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::engine::tree::ExecutionId;
use crate::engine::CaseEngine;

/// The kind of change a variable underwent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableEventKind {
    Create,
    Update,
    Delete,
}

impl VariableEventKind {
    /// The event name as it appears in variable-on-part declarations.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for VariableEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A pending variable-change event, queued per case instance.
#[derive(Clone, Debug)]
pub struct VariableEvent {
    /// Execution whose local store changed.
    pub source: ExecutionId,
    /// Variable name.
    pub name: String,
    /// New value; `None` for delete events.
    pub value: Option<Value>,
    /// What happened.
    pub kind: VariableEventKind,
}

/// Read-only view of a variable change handed to listeners.
///
/// `scope` is the execution the listener binding was found on while walking
/// the ancestor chain; `source` is where the variable actually changed.
#[derive(Clone, Debug)]
pub struct DelegateVariable<'a> {
    pub name: &'a str,
    pub value: Option<&'a Value>,
    pub kind: VariableEventKind,
    pub source: ExecutionId,
    pub scope: ExecutionId,
}

/// Error raised by a variable listener; aborts the remainder of the pulse.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn msg<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Listener invoked for variable-change events.
///
/// Listeners run synchronously inside the dispatch drain and may write
/// variables themselves; such writes are appended to the queue and handled
/// in arrival order rather than recursively.
pub trait CaseVariableListener: Send + Sync {
    fn on_event(
        &self,
        variable: &DelegateVariable<'_>,
        engine: &mut CaseEngine,
    ) -> Result<(), ListenerError>;
}

/// A listener bound to an activity for one event kind.
///
/// `custom` listeners can be suppressed globally through
/// [`EngineConfig::invoke_custom_listeners`](crate::config::EngineConfig).
#[derive(Clone)]
pub struct VariableListenerBinding {
    pub listener: std::sync::Arc<dyn CaseVariableListener>,
    pub custom: bool,
}

impl fmt::Debug for VariableListenerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableListenerBinding")
            .field("custom", &self.custom)
            .finish_non_exhaustive()
    }
}

/// Effective variables of one execution, for guard evaluation.
///
/// Built by merging the root's variables down to the owning execution, so
/// local entries shadow ancestors. Keys are unique; no ordering guarantee.
#[derive(Clone, Debug, Default)]
pub struct VariableView {
    variables: FxHashMap<String, Value>,
}

impl VariableView {
    pub(crate) fn from_merged(variables: FxHashMap<String, Value>) -> Self {
        Self { variables }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }
}
