//! The case execution engine.
//!
//! One [`CaseEngine`] drives one case-instance tree to quiescence per
//! command: an external call (create, complete, set a variable) mutates
//! node state, qualifying transitions feed the sentry engine, and firing
//! sentries re-enters the lifecycle for the gated nodes, all synchronously
//! before the command returns. Cross-command concurrency is delegated
//! entirely to the [`CaseStore`](crate::store::CaseStore) revision
//! protocol.
//!
//! # Examples
//!
//! ```rust
//! use caseweave::engine::CaseEngine;
//! use caseweave::model::{ActivityBuilder, CaseModelBuilder};
//! use std::sync::Arc;
//!
//! let definition = CaseModelBuilder::new("demo")
//!     .plan_model(ActivityBuilder::stage("casePlanModel").child("work"))
//!     .activity(ActivityBuilder::task("work"))
//!     .build()
//!     .unwrap();
//!
//! let mut engine = CaseEngine::builder(Arc::new(definition)).build().unwrap();
//! engine.create_case_instance().unwrap();
//! let work = engine.find_by_activity("work").unwrap();
//! engine.complete(work).unwrap();
//! ```

pub mod state;
pub mod tree;

mod lifecycle;
mod queue;
mod sentries;

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::errors::CaseEngineError;
use crate::model::{Activity, CaseDefinition};
use crate::services::{GuardEvaluator, TaskFactory};
use crate::store::{CaseStore, InMemoryCaseStore};
use crate::variables::{VariableEvent, VariableEventKind, VariableView};

use state::CaseExecutionState;
use tree::{CaseExecution, ExecutionId, ExecutionTree, SentryPartId};

/// Builder for a [`CaseEngine`].
///
/// The store defaults to an [`InMemoryCaseStore`]; evaluator and task
/// factory are optional, and operations that need an absent one fail with
/// [`CaseEngineError::Unsupported`].
pub struct CaseEngineBuilder {
    definition: Arc<CaseDefinition>,
    store: Option<Arc<dyn CaseStore>>,
    evaluator: Option<Arc<dyn GuardEvaluator>>,
    task_factory: Option<Arc<dyn TaskFactory>>,
    config: EngineConfig,
}

impl CaseEngineBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn GuardEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    #[must_use]
    pub fn task_factory(mut self, factory: Arc<dyn TaskFactory>) -> Self {
        self.task_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Materialize the engine with a fresh tree holding only the root in
    /// state `NEW`, and persist the root record.
    pub fn build(self) -> Result<CaseEngine, CaseEngineError> {
        let tree = ExecutionTree::new(self.definition.case_plan_model.clone());
        let mut engine = CaseEngine {
            definition: self.definition,
            tree,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryCaseStore::new())),
            evaluator: self.evaluator,
            task_factory: self.task_factory,
            config: self.config,
            variable_events: VecDeque::new(),
        };
        engine.persist_execution(engine.tree.root())?;
        Ok(engine)
    }
}

/// The engine: one case-instance tree plus its collaborators.
pub struct CaseEngine {
    definition: Arc<CaseDefinition>,
    tree: ExecutionTree,
    store: Arc<dyn CaseStore>,
    evaluator: Option<Arc<dyn GuardEvaluator>>,
    task_factory: Option<Arc<dyn TaskFactory>>,
    config: EngineConfig,
    variable_events: VecDeque<VariableEvent>,
}

impl CaseEngine {
    #[must_use]
    pub fn builder(definition: Arc<CaseDefinition>) -> CaseEngineBuilder {
        CaseEngineBuilder {
            definition,
            store: None,
            evaluator: None,
            task_factory: None,
            config: EngineConfig::default(),
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn definition(&self) -> &CaseDefinition {
        &self.definition
    }

    #[must_use]
    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut ExecutionTree {
        &mut self.tree
    }

    /// Detach an execution from its parent without a state change. The
    /// execution stays addressable for late sentry pulses.
    pub fn remove(&mut self, id: ExecutionId) {
        self.tree.remove(id);
    }

    /// Id of the case-instance root.
    #[must_use]
    pub fn case_instance(&self) -> ExecutionId {
        self.tree.root()
    }

    /// Current state of an execution.
    pub fn state_of(&self, id: ExecutionId) -> Result<CaseExecutionState, CaseEngineError> {
        Ok(self.execution(id)?.current_state)
    }

    /// First attached execution for an activity id.
    #[must_use]
    pub fn find_by_activity(&self, activity_id: &str) -> Option<ExecutionId> {
        self.tree.find_by_activity(activity_id)
    }

    pub(crate) fn execution(&self, id: ExecutionId) -> Result<&CaseExecution, CaseEngineError> {
        self.tree
            .get(id)
            .ok_or(CaseEngineError::UnknownExecution { execution: id })
    }

    pub(crate) fn execution_mut(
        &mut self,
        id: ExecutionId,
    ) -> Result<&mut CaseExecution, CaseEngineError> {
        self.tree
            .get_mut(id)
            .ok_or(CaseEngineError::UnknownExecution { execution: id })
    }

    /// Activity of an execution, cloned out of the shared definition so the
    /// caller can keep mutating the tree.
    pub(crate) fn activity_for(&self, id: ExecutionId) -> Result<Activity, CaseEngineError> {
        let execution = self.execution(id)?;
        self.definition
            .activity(&execution.activity_id)
            .cloned()
            .ok_or_else(|| CaseEngineError::MissingActivity {
                execution: id,
                activity: execution.activity_id.clone(),
            })
    }

    pub(crate) fn require_evaluator(
        &self,
    ) -> Result<Arc<dyn GuardEvaluator>, CaseEngineError> {
        self.evaluator
            .clone()
            .ok_or(CaseEngineError::Unsupported {
                operation: "guard evaluation",
            })
    }

    pub(crate) fn require_task_factory(
        &self,
    ) -> Result<Arc<dyn TaskFactory>, CaseEngineError> {
        self.task_factory
            .clone()
            .ok_or(CaseEngineError::Unsupported {
                operation: "task/sub-process creation",
            })
    }

    pub(crate) fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Effective variables of an execution: root merged down to the node,
    /// locals shadowing ancestors.
    pub fn variable_view(&self, id: ExecutionId) -> Result<VariableView, CaseEngineError> {
        let mut chain = self.tree.ancestors(id);
        chain.reverse();
        chain.push(id);
        let mut merged: FxHashMap<String, Value> = FxHashMap::default();
        for scope in chain {
            if let Some(execution) = self.tree.get(scope) {
                for (name, value) in &execution.variables {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(VariableView::from_merged(merged))
    }

    /// Resolve a variable through the scope chain of `id`.
    pub fn get_variable(
        &self,
        id: ExecutionId,
        name: &str,
    ) -> Result<Option<Value>, CaseEngineError> {
        let mut current = Some(id);
        while let Some(scope) = current {
            let execution = self.execution(scope)?;
            if let Some(value) = execution.variables.get(name) {
                return Ok(Some(value.clone()));
            }
            current = execution.parent;
        }
        Ok(None)
    }

    /// Write a variable through the scope chain: updates the nearest
    /// enclosing scope that already holds `name`, else creates it locally
    /// on `id`. Raises the matching variable event on the owning scope.
    pub fn set_variable(
        &mut self,
        id: ExecutionId,
        name: &str,
        value: Value,
    ) -> Result<(), CaseEngineError> {
        let owner = self.find_variable_owner(id, name)?;
        match owner {
            Some(owner) => self.write_variable(owner, name, value, VariableEventKind::Update),
            None => self.write_variable(id, name, value, VariableEventKind::Create),
        }
    }

    /// Write a variable directly into `id`'s local store, shadowing any
    /// ancestor of the same name.
    pub fn set_variable_local(
        &mut self,
        id: ExecutionId,
        name: &str,
        value: Value,
    ) -> Result<(), CaseEngineError> {
        let kind = if self.execution(id)?.has_variable_local(name) {
            VariableEventKind::Update
        } else {
            VariableEventKind::Create
        };
        self.write_variable(id, name, value, kind)
    }

    /// Delete a variable from the scope chain; no-op if absent.
    pub fn remove_variable(
        &mut self,
        id: ExecutionId,
        name: &str,
    ) -> Result<(), CaseEngineError> {
        let Some(owner) = self.find_variable_owner(id, name)? else {
            return Ok(());
        };
        self.execution_mut(owner)?.variables.remove(name);
        self.persist_execution(owner)?;
        let event = VariableEvent {
            source: owner,
            name: name.to_string(),
            value: None,
            kind: VariableEventKind::Delete,
        };
        self.dispatch_event(&event)
    }

    fn find_variable_owner(
        &self,
        id: ExecutionId,
        name: &str,
    ) -> Result<Option<ExecutionId>, CaseEngineError> {
        let mut current = Some(id);
        while let Some(scope) = current {
            let execution = self.execution(scope)?;
            if execution.has_variable_local(name) {
                return Ok(Some(scope));
            }
            current = execution.parent;
        }
        Ok(None)
    }

    fn write_variable(
        &mut self,
        owner: ExecutionId,
        name: &str,
        value: Value,
        kind: VariableEventKind,
    ) -> Result<(), CaseEngineError> {
        self.execution_mut(owner)?
            .variables
            .insert(name.to_string(), value.clone());
        self.persist_execution(owner)?;
        tracing::trace!(execution = %owner, variable = name, event = %kind, "variable written");
        let event = VariableEvent {
            source: owner,
            name: name.to_string(),
            value: Some(value),
            kind,
        };
        self.dispatch_event(&event)
    }

    // ------------------------------------------------------------------
    // Persistence plumbing
    // ------------------------------------------------------------------

    pub(crate) fn persist_execution(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let record = self.execution(id)?.to_record();
        let expected = self.execution(id)?.revision;
        let revision = self.store.save_execution(&record, expected)?;
        self.execution_mut(id)?.revision = revision;
        Ok(())
    }

    pub(crate) fn persist_part(
        &mut self,
        owner: ExecutionId,
        part_id: SentryPartId,
    ) -> Result<(), CaseEngineError> {
        let (record, expected) = {
            let execution = self.execution(owner)?;
            let part = execution
                .sentry_parts
                .iter()
                .find(|p| p.id == part_id)
                .ok_or(CaseEngineError::UnknownExecution { execution: owner })?;
            (part.to_record(), part.revision)
        };
        let revision = self.store.save_sentry_part(&record, expected)?;
        if let Some(part) = self
            .execution_mut(owner)?
            .sentry_parts
            .iter_mut()
            .find(|p| p.id == part_id)
        {
            part.revision = revision;
        }
        Ok(())
    }

    pub(crate) fn touch_part(
        &mut self,
        owner: ExecutionId,
        part_id: SentryPartId,
    ) -> Result<(), CaseEngineError> {
        let expected = {
            let execution = self.execution(owner)?;
            execution
                .sentry_parts
                .iter()
                .find(|p| p.id == part_id)
                .map(|p| p.revision)
                .ok_or(CaseEngineError::UnknownExecution { execution: owner })?
        };
        let revision = self.store.touch_sentry_part(part_id, expected)?;
        if let Some(part) = self
            .execution_mut(owner)?
            .sentry_parts
            .iter_mut()
            .find(|p| p.id == part_id)
        {
            part.revision = revision;
        }
        Ok(())
    }

    pub(crate) fn queue_mut(&mut self) -> &mut VecDeque<VariableEvent> {
        &mut self.variable_events
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.variable_events.len()
    }
}
