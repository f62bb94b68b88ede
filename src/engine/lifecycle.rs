//! Lifecycle operations on case executions.
//!
//! Each public operation guards the current state, records the transition,
//! persists the execution, notifies the parent's sentry parts, and then runs
//! the type-specific behavior (spawning children, creating tasks, cascading
//! terminations). Completion bookkeeping on the parent always runs *before*
//! the sentry pulse for the same transition, so a stage that auto-completes
//! through a child's completion is already `COMPLETED` when the pulse's
//! root-exit check runs.

use crate::engine::state::{CaseExecutionState, TransitionEvent};
use crate::engine::tree::ExecutionId;
use crate::engine::CaseEngine;
use crate::errors::CaseEngineError;
use crate::model::ActivityType;

impl CaseEngine {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Start the case: transitions the root `NEW -> ACTIVE` and runs the
    /// plan-model stage behavior (child instantiation, sentry parts,
    /// initial completion check).
    pub fn create_case_instance(&mut self) -> Result<(), CaseEngineError> {
        self.create(self.tree().root())
    }

    /// Like [`create_case_instance`](Self::create_case_instance), but seeds
    /// the root scope with initial variables first. Seeding raises no
    /// variable events: nothing is listening yet.
    pub fn create_case_instance_with_variables(
        &mut self,
        variables: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<(), CaseEngineError> {
        let root = self.tree().root();
        {
            let execution = self.execution_mut(root)?;
            if !execution.is_new() {
                return Err(CaseEngineError::IllegalTransition {
                    execution: root,
                    from: execution.current_state,
                    transition: "create",
                });
            }
            execution.variables.extend(variables);
        }
        self.create(root)
    }

    /// Perform the `create` transition on a `NEW` execution.
    ///
    /// The root goes straight to `ACTIVE`; children go to `AVAILABLE`,
    /// notify the parent's sentries, and run the creation check (entry
    /// criteria, manual activation, milestone handling).
    pub fn create(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let current = self.state_of(id)?;
        if current != CaseExecutionState::New {
            return Err(CaseEngineError::IllegalTransition {
                execution: id,
                from: current,
                transition: "create",
            });
        }
        if self.execution(id)?.is_case_instance() {
            self.set_state(id, CaseExecutionState::Active)?;
            self.perform_start(id)
        } else {
            self.set_state(id, CaseExecutionState::Available)?;
            self.notify_parent(id, TransitionEvent::Create)?;
            self.created_check(id)
        }
    }

    /// Post-creation check: unguarded items (or items whose entry criterion
    /// already fired while `NEW`) proceed immediately.
    fn created_check(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        // An entry/exit criterion may have fired in between.
        if !self.execution(id)?.is_available() {
            return Ok(());
        }
        let activity = self.activity_for(id)?;
        let unguarded =
            activity.entry_criteria.is_empty() || self.execution(id)?.entry_criterion_satisfied;
        if !unguarded {
            return Ok(());
        }
        match activity.activity_type {
            ActivityType::Milestone => self.occur(id),
            _ if activity.manual_activation => self.enable(id),
            _ => self.start(id),
        }
    }

    // ------------------------------------------------------------------
    // Manual activation
    // ------------------------------------------------------------------

    /// `AVAILABLE -> ENABLED`, waiting for a manual start.
    pub fn enable(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Available], "enable")?;
        self.set_state(id, CaseExecutionState::Enabled)?;
        self.notify_parent(id, TransitionEvent::Enable)
    }

    /// `ENABLED -> DISABLED`; the parent may auto-complete without it.
    pub fn disable(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Enabled], "disable")?;
        self.set_state(id, CaseExecutionState::Disabled)?;
        if let Some(parent) = self.execution(id)?.parent {
            self.handle_child_settled(parent)?;
        }
        self.notify_parent(id, TransitionEvent::Disable)
    }

    /// `DISABLED -> ENABLED`.
    pub fn reenable(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Disabled], "reenable")?;
        self.set_state(id, CaseExecutionState::Enabled)?;
        self.notify_parent(id, TransitionEvent::Reenable)
    }

    /// `ENABLED -> ACTIVE` by explicit user action.
    pub fn manual_start(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Enabled], "manualStart")?;
        self.set_state(id, CaseExecutionState::Active)?;
        self.notify_parent(id, TransitionEvent::ManualStart)?;
        self.perform_start(id)
    }

    /// `AVAILABLE -> ACTIVE`, the automatic activation path.
    pub fn start(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Available], "start")?;
        self.set_state(id, CaseExecutionState::Active)?;
        self.notify_parent(id, TransitionEvent::Start)?;
        self.perform_start(id)
    }

    /// Type-specific behavior once an execution turns `ACTIVE`.
    fn perform_start(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let activity = self.activity_for(id)?;
        match activity.activity_type {
            ActivityType::Stage => self.start_stage(id, &activity.children),
            ActivityType::HumanTask => {
                let factory = self.require_task_factory()?;
                let handle = factory.create_task(id, &activity.id)?;
                self.execution_mut(id)?.task = Some(handle);
                Ok(())
            }
            ActivityType::ProcessTask => {
                let factory = self.require_task_factory()?;
                let handle = factory.create_sub_process(id, &activity.id)?;
                self.execution_mut(id)?.set_sub_process_instance(Some(handle));
                Ok(())
            }
            ActivityType::CaseTask => {
                let factory = self.require_task_factory()?;
                let handle = factory.create_sub_case(id, &activity.id)?;
                self.execution_mut(id)?.set_sub_case_instance(Some(handle));
                Ok(())
            }
            // Plain tasks just run until completed; milestones never start.
            ActivityType::Task | ActivityType::Milestone => Ok(()),
        }
    }

    /// Two-pass stage activation: instantiate all children first so every
    /// sibling's sentry parts can observe every other sibling's create,
    /// then drive the creation transitions in plan order. A transition may
    /// complete or exit the stage mid-loop; the remaining children are then
    /// left untouched in `NEW`.
    fn start_stage(
        &mut self,
        id: ExecutionId,
        child_activities: &[String],
    ) -> Result<(), CaseEngineError> {
        if child_activities.is_empty() {
            return self.complete(id);
        }

        let mut children = Vec::with_capacity(child_activities.len());
        for activity_id in child_activities {
            let child = self
                .tree_mut()
                .create_child(id, activity_id)
                .ok_or(CaseEngineError::UnknownExecution { execution: id })?;
            let required = self
                .definition()
                .activity(activity_id)
                .map(|a| a.required)
                .ok_or_else(|| CaseEngineError::MissingActivity {
                    execution: child,
                    activity: activity_id.clone(),
                })?;
            self.execution_mut(child)?.required = required;
            self.persist_execution(child)?;
            children.push(child);
        }

        self.create_sentry_parts(id)?;

        for child in children {
            if !self.execution(id)?.is_active() {
                return Ok(());
            }
            if self.execution(child)?.is_new() {
                self.create(child)?;
            }
        }

        if self.execution(id)?.is_active() {
            self.fire_if_only_sentry_parts(id)?;
        }
        if self.execution(id)?.is_active() {
            self.check_and_complete(id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Complete an `ACTIVE` execution. For stages the completion guard
    /// applies: no child may still be `NEW` or `ACTIVE`, and remaining
    /// children must all be settled unless the stage auto-completes (then
    /// only required children count).
    pub fn complete(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.complete_internal(id, false)
    }

    /// Complete by explicit user action; relaxes the stage guard to
    /// required children only, like auto-completion does.
    pub fn manual_complete(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.complete_internal(id, true)
    }

    fn complete_internal(&mut self, id: ExecutionId, manual: bool) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Active], "complete")?;
        let activity = self.activity_for(id)?;
        if activity.activity_type.is_stage() {
            self.can_complete(id, manual, true)?;
            self.settle_children_for_completion(id)?;
        }
        self.set_state(id, CaseExecutionState::Completed)?;
        self.finish(id, TransitionEvent::Complete)
    }

    /// Milestone occurrence: `AVAILABLE -> COMPLETED` in one step. Also
    /// accepted from `ACTIVE` for event-like items driven externally.
    pub fn occur(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[CaseExecutionState::Available, CaseExecutionState::Active],
            "occur",
        )?;
        self.set_state(id, CaseExecutionState::Completed)?;
        self.finish(id, TransitionEvent::Occur)
    }

    /// Detach from the parent, run the parent's completion bookkeeping,
    /// then pulse the parent's sentries with the finishing transition.
    fn finish(&mut self, id: ExecutionId, event: TransitionEvent) -> Result<(), CaseEngineError> {
        let Some(parent) = self.execution(id)?.parent else {
            return Ok(());
        };
        self.tree_mut().remove(id);
        self.handle_child_settled(parent)?;
        self.handle_child_transition(parent, id, event)
    }

    /// Force-update the parent and, if it is still active, check whether it
    /// can now complete. Runs for every child settling event (completion,
    /// occurrence, disable).
    fn handle_child_settled(&mut self, parent: ExecutionId) -> Result<(), CaseEngineError> {
        self.persist_execution(parent)?;
        if self.execution(parent)?.is_active() {
            self.check_and_complete(parent)?;
        }
        Ok(())
    }

    /// Complete `id` if its completion guard holds; no-op otherwise.
    pub(crate) fn check_and_complete(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        if self.can_complete(id, false, false)? {
            self.complete(id)?;
        }
        Ok(())
    }

    /// The stage completion guard.
    ///
    /// With `throw`, the first offending child is reported as an error;
    /// without, the guard just answers yes or no.
    fn can_complete(
        &self,
        id: ExecutionId,
        manual: bool,
        throw: bool,
    ) -> Result<bool, CaseEngineError> {
        let execution = self.execution(id)?;
        if execution.children.is_empty() {
            return Ok(true);
        }
        let activity = self.activity_for(id)?;
        let relaxed = manual || activity.auto_complete;
        for child_id in &execution.children {
            let child = self.execution(*child_id)?;
            let blocking = match child.current_state {
                CaseExecutionState::New | CaseExecutionState::Active => true,
                CaseExecutionState::Disabled
                | CaseExecutionState::Completed
                | CaseExecutionState::Terminated => false,
                _ => !relaxed || child.required,
            };
            if blocking {
                if throw {
                    return Err(CaseEngineError::RemainingChild {
                        execution: id,
                        child: *child_id,
                        state: child.current_state,
                    });
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Settle the remaining children of a completing stage: disabled
    /// children are dropped, the rest receive `parentComplete`.
    fn settle_children_for_completion(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let children = self.execution(id)?.children.clone();
        for child in children {
            if self.state_of(child)? == CaseExecutionState::Disabled {
                self.tree_mut().remove(child);
            } else {
                self.parent_complete(child)?;
            }
        }
        Ok(())
    }

    /// Parent-driven completion of a child that never ran.
    pub fn parent_complete(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[
                CaseExecutionState::Available,
                CaseExecutionState::Enabled,
                CaseExecutionState::Suspended,
            ],
            "parentComplete",
        )?;
        self.set_state(id, CaseExecutionState::Completed)?;
        self.tree_mut().remove(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Terminate an execution outright. Stages first cascade into their
    /// children and finish only when the last child has reported back.
    pub fn terminate(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[
                CaseExecutionState::Available,
                CaseExecutionState::Enabled,
                CaseExecutionState::Disabled,
                CaseExecutionState::Active,
                CaseExecutionState::Suspended,
                CaseExecutionState::Failed,
            ],
            "terminate",
        )?;
        self.set_state(id, CaseExecutionState::TerminatingOnTermination)?;
        self.terminate_or_cascade(id, TransitionEvent::Terminate)
    }

    /// Terminate through a satisfied exit criterion.
    pub fn exit(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[
                CaseExecutionState::Available,
                CaseExecutionState::Enabled,
                CaseExecutionState::Disabled,
                CaseExecutionState::Active,
                CaseExecutionState::Suspended,
            ],
            "exit",
        )?;
        self.set_state(id, CaseExecutionState::TerminatingOnExit)?;
        self.terminate_or_cascade(id, TransitionEvent::Exit)
    }

    /// Parent-driven termination, used for milestones and other items that
    /// have no exit semantics of their own.
    pub fn parent_terminate(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[
                CaseExecutionState::Available,
                CaseExecutionState::Enabled,
                CaseExecutionState::Suspended,
            ],
            "parentTerminate",
        )?;
        self.set_state(id, CaseExecutionState::TerminatingOnParentTermination)?;
        self.perform_terminate(id, TransitionEvent::ParentTerminate)
    }

    /// Finish immediately when nothing is left to cascade into; otherwise
    /// push the termination down and wait for
    /// [`handle_child_termination`](Self::handle_child_termination).
    fn terminate_or_cascade(
        &mut self,
        id: ExecutionId,
        event: TransitionEvent,
    ) -> Result<(), CaseEngineError> {
        let is_stage = self.activity_for(id)?.activity_type.is_stage();
        if is_stage && !self.children_all_done(id)? {
            self.terminate_children(id)
        } else {
            self.perform_terminate(id, event)
        }
    }

    fn perform_terminate(
        &mut self,
        id: ExecutionId,
        event: TransitionEvent,
    ) -> Result<(), CaseEngineError> {
        self.set_state(id, CaseExecutionState::Terminated)?;
        let Some(parent) = self.execution(id)?.parent else {
            return Ok(());
        };
        self.tree_mut().remove(id);
        self.handle_child_termination(parent)?;
        self.handle_child_transition(parent, id, event)
    }

    /// Push a termination into every unfinished child: stages and tasks
    /// exit, everything else is parent-terminated.
    fn terminate_children(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let children = self.execution(id)?.children.clone();
        for child in children {
            let state = self.state_of(child)?;
            if matches!(
                state,
                CaseExecutionState::Terminated | CaseExecutionState::Completed
            ) || state.is_terminating()
            {
                continue;
            }
            if self.activity_for(child)?.activity_type.is_stage_or_task() {
                self.exit(child)?;
            } else {
                self.parent_terminate(child)?;
            }
        }
        Ok(())
    }

    /// A terminated child reports back: force-update the parent, then
    /// either re-check completion (parent still active) or finish the
    /// parent's own pending termination once the cascade has drained.
    pub(crate) fn handle_child_termination(
        &mut self,
        parent: ExecutionId,
    ) -> Result<(), CaseEngineError> {
        self.persist_execution(parent)?;
        let state = self.state_of(parent)?;
        if state == CaseExecutionState::Active {
            return self.check_and_complete(parent);
        }
        if state.is_terminating() && self.children_all_done(parent)? {
            return match state {
                CaseExecutionState::TerminatingOnTermination => {
                    self.perform_terminate(parent, TransitionEvent::Terminate)
                }
                CaseExecutionState::TerminatingOnExit => {
                    self.perform_terminate(parent, TransitionEvent::Exit)
                }
                _ => Err(CaseEngineError::IllegalTransition {
                    execution: parent,
                    from: state,
                    transition: "terminate",
                }),
            };
        }
        Ok(())
    }

    /// Whether every remaining child is terminated or completed.
    fn children_all_done(&self, id: ExecutionId) -> Result<bool, CaseEngineError> {
        for child in &self.execution(id)?.children {
            let state = self.execution(*child)?.current_state;
            if !matches!(
                state,
                CaseExecutionState::Terminated | CaseExecutionState::Completed
            ) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Suspension and resumption
    // ------------------------------------------------------------------

    /// Suspend an execution; stages cascade into their children first.
    pub fn suspend(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[
                CaseExecutionState::Available,
                CaseExecutionState::Enabled,
                CaseExecutionState::Active,
            ],
            "suspend",
        )?;
        self.set_state(id, CaseExecutionState::SuspendingOnSuspension)?;
        self.suspend_or_cascade(id, TransitionEvent::Suspend)
    }

    /// Parent-driven suspension.
    pub fn parent_suspend(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(
            id,
            &[
                CaseExecutionState::Available,
                CaseExecutionState::Enabled,
                CaseExecutionState::Disabled,
                CaseExecutionState::Active,
            ],
            "parentSuspend",
        )?;
        self.set_state(id, CaseExecutionState::SuspendingOnParentSuspension)?;
        self.suspend_or_cascade(id, TransitionEvent::ParentSuspend)
    }

    fn suspend_or_cascade(
        &mut self,
        id: ExecutionId,
        event: TransitionEvent,
    ) -> Result<(), CaseEngineError> {
        let is_stage = self.activity_for(id)?.activity_type.is_stage();
        if is_stage && !self.children_all_suspended(id)? {
            self.suspend_children(id)
        } else {
            self.perform_suspension(id, event)
        }
    }

    fn perform_suspension(
        &mut self,
        id: ExecutionId,
        event: TransitionEvent,
    ) -> Result<(), CaseEngineError> {
        self.set_state(id, CaseExecutionState::Suspended)?;
        let Some(parent) = self.execution(id)?.parent else {
            return Ok(());
        };
        self.handle_child_suspension(parent)?;
        self.handle_child_transition(parent, id, event)
    }

    fn suspend_children(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let children = self.execution(id)?.children.clone();
        for child in children {
            let state = self.state_of(child)?;
            if state == CaseExecutionState::Suspended
                || state.is_suspending()
                || state.is_terminal()
            {
                continue;
            }
            if self.activity_for(child)?.activity_type.is_stage_or_task() {
                self.parent_suspend(child)?;
            } else {
                self.suspend(child)?;
            }
        }
        Ok(())
    }

    /// A suspended child reports back; finish the parent's own suspension
    /// once every child has settled.
    pub(crate) fn handle_child_suspension(
        &mut self,
        parent: ExecutionId,
    ) -> Result<(), CaseEngineError> {
        let state = self.state_of(parent)?;
        if state.is_suspending() && self.children_all_suspended(parent)? {
            let event = if state == CaseExecutionState::SuspendingOnSuspension {
                TransitionEvent::Suspend
            } else {
                TransitionEvent::ParentSuspend
            };
            return self.perform_suspension(parent, event);
        }
        Ok(())
    }

    fn children_all_suspended(&self, id: ExecutionId) -> Result<bool, CaseEngineError> {
        for child in &self.execution(id)?.children {
            let state = self.execution(*child)?.current_state;
            if state != CaseExecutionState::Suspended && !state.is_terminal() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `SUSPENDED -> previous state`, then re-run the behavior the restored
    /// state implies (creation check when back to `AVAILABLE`, child
    /// resumption when back to `ACTIVE`).
    pub fn resume(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Suspended], "resume")?;
        let restored = self.execution(id)?.previous_state;
        self.set_state(id, restored)?;
        self.notify_parent(id, TransitionEvent::Resume)?;
        self.resumed(id)
    }

    /// Parent-driven resumption.
    pub fn parent_resume(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        self.guard(id, &[CaseExecutionState::Suspended], "parentResume")?;
        let restored = self.execution(id)?.previous_state;
        self.set_state(id, restored)?;
        self.notify_parent(id, TransitionEvent::ParentResume)?;
        self.resumed(id)
    }

    fn resumed(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        match self.state_of(id)? {
            CaseExecutionState::Available => self.created_check(id),
            CaseExecutionState::Active => self.resume_children(id),
            _ => Ok(()),
        }
    }

    fn resume_children(&mut self, id: ExecutionId) -> Result<(), CaseEngineError> {
        let children = self.execution(id)?.children.clone();
        for child in children {
            if self.state_of(child)? != CaseExecutionState::Suspended {
                continue;
            }
            if self.activity_for(child)?.activity_type.is_stage_or_task() {
                self.parent_resume(child)?;
            } else {
                self.resume(child)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    /// Close the case instance once it is completed, terminated, suspended
    /// or failed. Only valid on the root.
    pub fn close(&mut self) -> Result<(), CaseEngineError> {
        let root = self.tree().root();
        self.guard(
            root,
            &[
                CaseExecutionState::Completed,
                CaseExecutionState::Terminated,
                CaseExecutionState::Suspended,
                CaseExecutionState::Failed,
            ],
            "close",
        )?;
        self.set_state(root, CaseExecutionState::Closed)
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn guard(
        &self,
        id: ExecutionId,
        allowed: &[CaseExecutionState],
        transition: &'static str,
    ) -> Result<(), CaseEngineError> {
        let current = self.state_of(id)?;
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(CaseEngineError::IllegalTransition {
                execution: id,
                from: current,
                transition,
            })
        }
    }

    fn set_state(
        &mut self,
        id: ExecutionId,
        state: CaseExecutionState,
    ) -> Result<(), CaseEngineError> {
        let from = {
            let execution = self.execution_mut(id)?;
            let from = execution.current_state;
            execution.set_current_state(state);
            from
        };
        tracing::debug!(execution = %id, %from, to = %state, "transition");
        self.persist_execution(id)
    }

    /// Feed a child transition into the parent's sentry parts.
    fn notify_parent(
        &mut self,
        id: ExecutionId,
        event: TransitionEvent,
    ) -> Result<(), CaseEngineError> {
        let Some(parent) = self.execution(id)?.parent else {
            return Ok(());
        };
        self.handle_child_transition(parent, id, event)
    }
}
