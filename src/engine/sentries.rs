//! Sentry materialization, evaluation, and firing.
//!
//! The pulse driven by a child transition runs in five steps:
//!
//! 1. mark the parent's matching, not-yet-satisfied on-parts satisfied;
//! 2. force a revision bump on *every* part of every affected sentry, so
//!    two commands racing on the same sentry collide in the store even
//!    when they satisfied disjoint parts;
//! 3. evaluate the affected sentries (on-parts and variable-on-parts are
//!    checked flags, the if-part guard is evaluated last and its positive
//!    result cached);
//! 4. reset all parts of the sentries found satisfied;
//! 5. fire: walk the whole tree children-before-ancestor, exiting active
//!    executions and admitting available ones, and finally check the case
//!    instance's own exit criteria.
//!
//! Variable transitions run the same pulse but scan variable-on-parts
//! tree-wide (filtered by scope shadowing) and re-evaluate *all* sentries,
//! so guard-only conjunctions react to variable writes their on-parts
//! never see.

use serde_json::Value;

use crate::engine::state::{CaseExecutionState, TransitionEvent};
use crate::engine::tree::{ExecutionId, SentryPart, SentryPartId, SentryPartKind};
use crate::engine::CaseEngine;
use crate::errors::CaseEngineError;
use crate::model::{Activity, ActivityType};
use crate::variables::VariableEventKind;

impl CaseEngine {
    /// Materialize the runtime parts for every sentry `id`'s activity
    /// declares: the if-part first, then on-parts, then variable-on-parts,
    /// each persisted unsatisfied.
    pub fn create_sentry_parts(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let activity = self.activity_for(id)?;
        let case_instance = self.execution(id)?.case_instance;
        let mut parts = Vec::new();
        for sentry in &activity.sentries {
            if sentry.if_part.is_some() {
                parts.push(new_part(id, case_instance, &sentry.id, SentryPartKind::IfPart));
            }
            for on_part in &sentry.on_parts {
                parts.push(new_part(
                    id,
                    case_instance,
                    &sentry.id,
                    SentryPartKind::OnPart {
                        source: on_part.source.clone(),
                        standard_event: on_part.standard_event,
                    },
                ));
            }
            for variable_on_part in &sentry.variable_on_parts {
                parts.push(new_part(
                    id,
                    case_instance,
                    &sentry.id,
                    SentryPartKind::VariableOnPart {
                        variable_name: variable_on_part.variable_name.clone(),
                        variable_event: variable_on_part.variable_event,
                    },
                ));
            }
        }
        let part_ids: Vec<SentryPartId> = parts.iter().map(|p| p.id).collect();
        self.execution_mut(id)?.sentry_parts.extend(parts);
        for part_id in part_ids {
            self.persist_part(id, part_id)?;
        }
        Ok(())
    }

    /// Pulse the parent's sentries with a child's standard transition.
    pub fn handle_child_transition(
        &mut self,
        parent: ExecutionId,
        child: ExecutionId,
        event: TransitionEvent,
    ) -> Result<(), CaseEngineError> {
        let child_activity = self.execution(child)?.activity_id.clone();

        let mut affected: Vec<String> = Vec::new();
        let mut changed: Vec<SentryPartId> = Vec::new();
        {
            let execution = self.execution_mut(parent)?;
            for part in &mut execution.sentry_parts {
                let SentryPartKind::OnPart {
                    source,
                    standard_event,
                } = &part.kind
                else {
                    continue;
                };
                if *source == child_activity && *standard_event == event && !part.satisfied {
                    part.satisfied = true;
                    changed.push(part.id);
                    if !affected.contains(&part.sentry_id) {
                        affected.push(part.sentry_id.clone());
                    }
                }
            }
        }
        if affected.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            execution = %parent,
            %event,
            sentries = ?affected,
            "on-parts satisfied"
        );

        self.force_update_sentries(parent, &affected, &changed)?;

        let mut satisfied = Vec::new();
        for sentry_id in &affected {
            if self.is_sentry_satisfied(parent, sentry_id)? {
                self.reset_sentry(parent, sentry_id)?;
                satisfied.push(sentry_id.clone());
            }
        }
        self.fire_sentries(&satisfied)
    }

    /// Pulse the tree's sentries with a variable event.
    ///
    /// Variable-on-parts anywhere in the tree may match; a part is skipped
    /// when a scope between it and the raising execution shadows the
    /// variable name. All sentries are then re-evaluated, not only the
    /// affected ones: a guard like `amount > 100` with its variable-on-part
    /// already satisfied must still react to the second write.
    pub fn handle_variable_transition(
        &mut self,
        origin: ExecutionId,
        name: &str,
        kind: VariableEventKind,
    ) -> Result<(), CaseEngineError> {
        let root = self.tree().root();
        let mut scan = vec![root];
        scan.extend(self.tree().collect_subtree(root));

        let mut matches: Vec<(ExecutionId, SentryPartId)> = Vec::new();
        let mut affected: Vec<(ExecutionId, String)> = Vec::new();
        for owner in &scan {
            let Some(execution) = self.tree().get(*owner) else {
                continue;
            };
            for part in &execution.sentry_parts {
                let SentryPartKind::VariableOnPart {
                    variable_name,
                    variable_event,
                } = &part.kind
                else {
                    continue;
                };
                if variable_name == name
                    && *variable_event == kind
                    && !part.satisfied
                    && !self.variable_shadowed(*owner, origin, name)?
                {
                    matches.push((*owner, part.id));
                    let key = (*owner, part.sentry_id.clone());
                    if !affected.contains(&key) {
                        affected.push(key);
                    }
                }
            }
        }

        for (owner, part_id) in &matches {
            if let Some(part) = self
                .execution_mut(*owner)?
                .sentry_parts
                .iter_mut()
                .find(|p| p.id == *part_id)
            {
                part.satisfied = true;
            }
        }
        let changed: Vec<SentryPartId> = matches.iter().map(|(_, id)| *id).collect();
        for (owner, sentry_id) in &affected {
            self.force_update_sentries(*owner, std::slice::from_ref(sentry_id), &changed)?;
        }

        let mut all: Vec<(ExecutionId, String)> = Vec::new();
        for owner in &scan {
            let Some(execution) = self.tree().get(*owner) else {
                continue;
            };
            for part in &execution.sentry_parts {
                let key = (*owner, part.sentry_id.clone());
                if !all.contains(&key) {
                    all.push(key);
                }
            }
        }

        let mut satisfied = Vec::new();
        for (owner, sentry_id) in &all {
            if self.is_sentry_satisfied(*owner, sentry_id)? {
                self.reset_sentry(*owner, sentry_id)?;
                satisfied.push(sentry_id.clone());
            }
        }
        self.fire_sentries(&satisfied)
    }

    /// Evaluate and fire the sentries of `id` that consist of nothing but a
    /// single, not-yet-satisfied if-part. Runs once after a stage has
    /// activated its children, so guard-only gates over the initial
    /// variables can open without any triggering event.
    pub fn fire_if_only_sentry_parts(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let affected: Vec<String> = {
            let execution = self.execution(id)?;
            let mut out = Vec::new();
            for part in &execution.sentry_parts {
                if !matches!(part.kind, SentryPartKind::IfPart) || part.satisfied {
                    continue;
                }
                let sibling_parts = execution
                    .sentry_parts
                    .iter()
                    .filter(|p| p.sentry_id == part.sentry_id)
                    .count();
                if sibling_parts == 1 && !out.contains(&part.sentry_id) {
                    out.push(part.sentry_id.clone());
                }
            }
            out
        };
        if affected.is_empty() {
            return Ok(());
        }
        let mut satisfied = Vec::new();
        for sentry_id in &affected {
            if self.is_sentry_satisfied(id, sentry_id)? {
                self.reset_sentry(id, sentry_id)?;
                satisfied.push(sentry_id.clone());
            }
        }
        self.fire_sentries(&satisfied)
    }

    /// Whether a sentry is satisfied right now, evaluating its guard if all
    /// flag parts are. A positive guard result is cached on the if-part so
    /// the expression is not re-evaluated within the same gating round.
    pub fn is_sentry_satisfied(
        &mut self,
        owner: ExecutionId,
        sentry_id: &str,
    ) -> Result<bool, CaseEngineError> {
        let mut if_part: Option<SentryPartId> = None;
        {
            let execution = self.execution(owner)?;
            for part in execution
                .sentry_parts
                .iter()
                .filter(|p| p.sentry_id == sentry_id)
            {
                match &part.kind {
                    SentryPartKind::OnPart { .. } | SentryPartKind::VariableOnPart { .. } => {
                        if !part.satisfied {
                            return Ok(false);
                        }
                    }
                    SentryPartKind::IfPart => {
                        if part.satisfied {
                            return Ok(true);
                        }
                        if_part = Some(part.id);
                    }
                }
            }
        }
        let Some(part_id) = if_part else {
            return Ok(true);
        };
        let result = self.evaluate_if_part(owner, sentry_id)?;
        if result {
            if let Some(part) = self
                .execution_mut(owner)?
                .sentry_parts
                .iter_mut()
                .find(|p| p.id == part_id)
            {
                part.satisfied = true;
            }
            self.persist_part(owner, part_id)?;
        }
        Ok(result)
    }

    fn evaluate_if_part(
        &self,
        owner: ExecutionId,
        sentry_id: &str,
    ) -> Result<bool, CaseEngineError> {
        let activity = self.activity_for(owner)?;
        let declaration =
            activity
                .sentry(sentry_id)
                .ok_or_else(|| CaseEngineError::UnknownSentry {
                    execution: owner,
                    sentry: sentry_id.to_string(),
                })?;
        let if_part = declaration
            .if_part
            .as_ref()
            .ok_or_else(|| CaseEngineError::MissingIfPart {
                sentry: sentry_id.to_string(),
            })?;
        let evaluator = self.require_evaluator()?;
        let scope = self.variable_view(owner)?;
        let value = evaluator.evaluate(&if_part.condition, &scope)?;
        match value {
            Value::Bool(result) => Ok(result),
            other => Err(CaseEngineError::NonBooleanGuard {
                sentry: sentry_id.to_string(),
                value: other,
            }),
        }
    }

    /// Bump the revision of every part belonging to the given sentries.
    /// Parts whose fields changed in this pulse are saved; the rest get a
    /// bare touch. Either way the store observes a write, which is what
    /// makes concurrent pulses over the same sentry collide.
    fn force_update_sentries(
        &mut self,
        owner: ExecutionId,
        sentries: &[String],
        changed: &[SentryPartId],
    ) -> Result<(), CaseEngineError> {
        let part_ids: Vec<SentryPartId> = self
            .execution(owner)?
            .sentry_parts
            .iter()
            .filter(|p| sentries.contains(&p.sentry_id))
            .map(|p| p.id)
            .collect();
        for part_id in part_ids {
            if changed.contains(&part_id) {
                self.persist_part(owner, part_id)?;
            } else {
                self.touch_part(owner, part_id)?;
            }
        }
        Ok(())
    }

    /// Reset every part of a fired sentry back to unsatisfied.
    fn reset_sentry(&mut self, owner: ExecutionId, sentry_id: &str) -> Result<(), CaseEngineError> {
        let part_ids: Vec<SentryPartId> = {
            let execution = self.execution_mut(owner)?;
            execution
                .sentry_parts
                .iter_mut()
                .filter(|p| p.sentry_id == sentry_id)
                .map(|p| {
                    p.satisfied = false;
                    p.id
                })
                .collect()
        };
        for part_id in part_ids {
            self.persist_part(owner, part_id)?;
        }
        Ok(())
    }

    /// Whether a scope between `part_owner` (inclusive) and `origin`
    /// (exclusive) declares its own variable of this name, hiding the
    /// raising write from the part.
    fn variable_shadowed(
        &self,
        part_owner: ExecutionId,
        origin: ExecutionId,
        name: &str,
    ) -> Result<bool, CaseEngineError> {
        let mut current = Some(part_owner);
        while let Some(scope) = current {
            if scope == origin {
                return Ok(false);
            }
            let execution = self.execution(scope)?;
            if execution.has_variable_local(name) {
                return Ok(true);
            }
            current = execution.parent;
        }
        Ok(false)
    }

    /// Fire satisfied sentries tree-wide: children before ancestors, exits
    /// before entries per node, and the case instance's own exit criteria
    /// checked last, and only while the root is still active, so a root
    /// that auto-completed earlier in the pulse is left untouched.
    fn fire_sentries(&mut self, satisfied: &[String]) -> Result<(), CaseEngineError> {
        if satisfied.is_empty() {
            return Ok(());
        }
        tracing::debug!(sentries = ?satisfied, "firing sentries");
        let root = self.tree().root();
        let nodes = self.tree().collect_subtree(root);
        for node in nodes {
            self.check_and_fire_exit(node, satisfied)?;
            self.check_and_fire_entry(node, satisfied)?;
        }
        if self.execution(root)?.is_active() {
            let activity = self.activity_for(root)?;
            if activity
                .exit_criteria
                .iter()
                .any(|criterion| satisfied.iter().any(|s| s == criterion))
            {
                self.terminate(root)?;
            }
        }
        Ok(())
    }

    fn check_and_fire_exit(
        &mut self,
        id: ExecutionId,
        satisfied: &[String],
    ) -> Result<(), CaseEngineError> {
        if !self.execution(id)?.is_active() {
            return Ok(());
        }
        let activity = self.activity_for(id)?;
        for criterion in &activity.exit_criteria {
            if satisfied.iter().any(|s| s == criterion) {
                self.exit(id)?;
                break;
            }
        }
        Ok(())
    }

    fn check_and_fire_entry(
        &mut self,
        id: ExecutionId,
        satisfied: &[String],
    ) -> Result<(), CaseEngineError> {
        let state = self.state_of(id)?;
        if state != CaseExecutionState::Available && state != CaseExecutionState::New {
            return Ok(());
        }
        let activity = self.activity_for(id)?;
        for criterion in &activity.entry_criteria {
            if satisfied.iter().any(|s| s == criterion) {
                if state == CaseExecutionState::Available {
                    self.fire_entry(id, &activity)?;
                } else {
                    // Still NEW: latch the result, the creation check reads it.
                    self.execution_mut(id)?.entry_criterion_satisfied = true;
                    self.persist_execution(id)?;
                }
                break;
            }
        }
        Ok(())
    }

    fn fire_entry(&mut self, id: ExecutionId, activity: &Activity) -> Result<(), CaseEngineError> {
        match activity.activity_type {
            ActivityType::Milestone => self.occur(id),
            _ if activity.manual_activation => self.enable(id),
            _ => self.start(id),
        }
    }
}

fn new_part(
    execution: ExecutionId,
    case_instance: ExecutionId,
    sentry_id: &str,
    kind: SentryPartKind,
) -> SentryPart {
    SentryPart {
        id: SentryPartId::new(),
        sentry_id: sentry_id.to_string(),
        execution,
        case_instance,
        kind,
        satisfied: false,
        revision: 0,
    }
}
