//! The execution-node tree: an arena of case executions keyed by stable ids.
//!
//! Structural links are keys, never owning pointers in both directions:
//! `parent` is an optional key, `children` an ordered key sequence, and the
//! case-instance back-reference a key equal to the root's. The root is the
//! case instance (`parent == None`); there is no separate root node type.
//! Behavior differences hang off [`CaseExecution::is_case_instance`].

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::engine::state::{CaseExecutionState, TransitionEvent};
use crate::services::{SubInstanceHandle, TaskHandle};
use crate::store::{ExecutionRecord, Revision, SentryPartRecord};
use crate::variables::VariableEventKind;

/// Stable identity of one case execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of one sentry part record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentryPartId(Uuid);

impl SentryPartId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SentryPartId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SentryPartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag plus type-specific fields of a sentry part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentryPartKind {
    OnPart {
        source: String,
        standard_event: TransitionEvent,
    },
    VariableOnPart {
        variable_name: String,
        variable_event: VariableEventKind,
    },
    IfPart,
}

impl SentryPartKind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SentryPartKind::OnPart { .. } => "onPart",
            SentryPartKind::VariableOnPart { .. } => "variableOnPart",
            SentryPartKind::IfPart => "ifPart",
        }
    }
}

/// Mutable runtime record of one sentry component.
///
/// Created once when the owning execution's sentries are materialized,
/// reset (`satisfied = false`) whenever its sentry fires, never deleted
/// while the execution exists. The revision counter exists purely to
/// provoke write conflicts across concurrent commands.
#[derive(Clone, Debug)]
pub struct SentryPart {
    pub id: SentryPartId,
    pub sentry_id: String,
    pub execution: ExecutionId,
    pub case_instance: ExecutionId,
    pub kind: SentryPartKind,
    pub satisfied: bool,
    pub revision: Revision,
}

impl SentryPart {
    pub(crate) fn to_record(&self) -> SentryPartRecord {
        let (source, variable_name, variable_event) = match &self.kind {
            SentryPartKind::OnPart { source, .. } => (Some(source.clone()), None, None),
            SentryPartKind::VariableOnPart {
                variable_name,
                variable_event,
            } => (
                None,
                Some(variable_name.clone()),
                Some(variable_event.name().to_string()),
            ),
            SentryPartKind::IfPart => (None, None, None),
        };
        SentryPartRecord {
            id: self.id,
            case_execution_id: self.execution,
            case_instance_id: self.case_instance,
            sentry_id: self.sentry_id.clone(),
            kind: self.kind.type_name().to_string(),
            source,
            variable_name,
            variable_event,
            satisfied: self.satisfied,
            updated_at: Utc::now(),
        }
    }
}

/// One node of the execution tree.
#[derive(Clone, Debug)]
pub struct CaseExecution {
    pub id: ExecutionId,
    /// Reference into the externally-owned plan model.
    pub activity_id: String,
    pub parent: Option<ExecutionId>,
    pub children: Vec<ExecutionId>,
    pub case_instance: ExecutionId,
    pub current_state: CaseExecutionState,
    pub previous_state: CaseExecutionState,
    pub required: bool,
    /// Latched while the execution is still `NEW`: an entry criterion fired
    /// before the create listeners ran, and the creation logic must consult
    /// it instead of waiting again.
    pub entry_criterion_satisfied: bool,
    /// Node-local variables; ancestors are consulted through the scope walk.
    pub variables: FxHashMap<String, Value>,
    /// Sentry parts owned by this execution.
    pub sentry_parts: Vec<SentryPart>,
    /// User task produced when a human task became active.
    pub task: Option<TaskHandle>,
    /// Spawned sub-process instance, paired with its super-execution back-ref.
    pub sub_process_instance: Option<SubInstanceHandle>,
    /// Spawned sub-case instance, paired with its super-execution back-ref.
    pub sub_case_instance: Option<SubInstanceHandle>,
    /// Last revision acknowledged by the store.
    pub revision: Revision,
}

impl CaseExecution {
    fn new(activity_id: String, parent: Option<ExecutionId>, case_instance: Option<ExecutionId>) -> Self {
        let id = ExecutionId::new();
        Self {
            id,
            activity_id,
            parent,
            children: Vec::new(),
            case_instance: case_instance.unwrap_or(id),
            current_state: CaseExecutionState::New,
            previous_state: CaseExecutionState::New,
            required: false,
            entry_criterion_satisfied: false,
            variables: FxHashMap::default(),
            sentry_parts: Vec::new(),
            task: None,
            sub_process_instance: None,
            sub_case_instance: None,
            revision: 0,
        }
    }

    /// Root of the tree iff it has no parent.
    #[must_use]
    pub fn is_case_instance(&self) -> bool {
        self.parent.is_none()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current_state == CaseExecutionState::Active
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.current_state == CaseExecutionState::Available
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.current_state == CaseExecutionState::New
    }

    /// Record the previous state and move to `state`.
    ///
    /// The previous state is left untouched while the execution is
    /// mid-suspension or mid-termination, so nested sequences do not
    /// clobber the state that must be restored afterwards.
    pub fn set_current_state(&mut self, state: CaseExecutionState) {
        if !self.current_state.is_suspending() && !self.current_state.is_terminating() {
            self.previous_state = self.current_state;
        }
        self.current_state = state;
    }

    /// Set or clear the sub-process pair (handle + super-execution back-ref).
    pub fn set_sub_process_instance(&mut self, handle: Option<SubInstanceHandle>) {
        debug_assert!(handle.as_ref().map_or(true, |h| h.super_execution == self.id));
        self.sub_process_instance = handle;
    }

    /// Set or clear the sub-case pair (handle + super-execution back-ref).
    pub fn set_sub_case_instance(&mut self, handle: Option<SubInstanceHandle>) {
        debug_assert!(handle.as_ref().map_or(true, |h| h.super_execution == self.id));
        self.sub_case_instance = handle;
    }

    #[must_use]
    pub fn has_variable_local(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub(crate) fn to_record(&self) -> ExecutionRecord {
        ExecutionRecord {
            id: self.id,
            activity_id: self.activity_id.clone(),
            parent_id: self.parent,
            case_instance_id: self.case_instance,
            state: self.current_state.encode().to_string(),
            previous_state: self.previous_state.encode().to_string(),
            required: self.required,
            variables: Value::Object(
                self.variables
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            updated_at: Utc::now(),
        }
    }
}

/// Arena of case executions forming one case-instance tree.
#[derive(Clone, Debug)]
pub struct ExecutionTree {
    executions: FxHashMap<ExecutionId, CaseExecution>,
    root: ExecutionId,
}

impl ExecutionTree {
    /// Create a tree holding only the case-instance root, in state `NEW`.
    #[must_use]
    pub fn new(root_activity_id: String) -> Self {
        let root = CaseExecution::new(root_activity_id, None, None);
        let root_id = root.id;
        let mut executions = FxHashMap::default();
        executions.insert(root_id, root);
        Self {
            executions,
            root: root_id,
        }
    }

    #[must_use]
    pub fn root(&self) -> ExecutionId {
        self.root
    }

    #[must_use]
    pub fn contains(&self, id: ExecutionId) -> bool {
        self.executions.contains_key(&id)
    }

    #[must_use]
    pub fn get(&self, id: ExecutionId) -> Option<&CaseExecution> {
        self.executions.get(&id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: ExecutionId) -> Option<&mut CaseExecution> {
        self.executions.get_mut(&id)
    }

    /// All executions, in no particular order.
    pub fn executions(&self) -> impl Iterator<Item = &CaseExecution> {
        self.executions.values()
    }

    /// Append a child in state `NEW` under `parent`.
    ///
    /// Links the case-instance back-reference; create-side-effects are the
    /// lifecycle layer's job, not the tree's.
    pub fn create_child(&mut self, parent: ExecutionId, activity_id: &str) -> Option<ExecutionId> {
        let case_instance = self.executions.get(&parent)?.case_instance;
        let child = CaseExecution::new(activity_id.to_string(), Some(parent), Some(case_instance));
        let child_id = child.id;
        self.executions.insert(child_id, child);
        self.executions
            .get_mut(&parent)
            .expect("parent existence checked above")
            .children
            .push(child_id);
        Some(child_id)
    }

    /// Detach `id` from its parent's children. No-op for the root or when
    /// already detached. The execution itself stays addressable.
    pub fn remove(&mut self, id: ExecutionId) {
        let Some(parent) = self.executions.get(&id).and_then(|e| e.parent) else {
            return;
        };
        if let Some(parent) = self.executions.get_mut(&parent) {
            parent.children.retain(|child| *child != id);
        }
    }

    /// Ancestor chain of `id`, nearest first, excluding `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let mut current = self.executions.get(&id).and_then(|e| e.parent);
        while let Some(ancestor) = current {
            out.push(ancestor);
            current = self.executions.get(&ancestor).and_then(|e| e.parent);
        }
        out
    }

    /// Subtree of `id` in depth-first, children-before-ancestor order,
    /// excluding `id` itself.
    #[must_use]
    pub fn collect_subtree(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        self.collect_subtree_into(id, &mut out);
        out
    }

    fn collect_subtree_into(&self, id: ExecutionId, out: &mut Vec<ExecutionId>) {
        let Some(execution) = self.executions.get(&id) else {
            return;
        };
        let children = execution.children.clone();
        for child in &children {
            self.collect_subtree_into(*child, out);
        }
        out.extend(children);
    }

    /// First attached execution for `activity_id`, searching depth-first
    /// from the root.
    #[must_use]
    pub fn find_by_activity(&self, activity_id: &str) -> Option<ExecutionId> {
        self.find_by_activity_from(self.root, activity_id)
    }

    fn find_by_activity_from(&self, id: ExecutionId, activity_id: &str) -> Option<ExecutionId> {
        let execution = self.executions.get(&id)?;
        if execution.activity_id == activity_id {
            return Some(id);
        }
        for child in &execution.children {
            if let Some(found) = self.find_by_activity_from(*child, activity_id) {
                return Some(found);
            }
        }
        None
    }
}
