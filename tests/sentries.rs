//! Sentry protocol: part satisfaction, guard evaluation, firing order,
//! and the reset discipline.

mod common;
use common::*;

use serde_json::json;
use std::sync::Arc;

use caseweave::engine::state::{CaseExecutionState, TransitionEvent};
use caseweave::engine::CaseEngine;
use caseweave::errors::CaseEngineError;
use caseweave::model::{ActivityBuilder, CaseDefinition, CaseModelBuilder, SentryDeclaration};

/// Stage with `c1`, and `c2` gated on `c1` completing while `amount > 100`.
fn gated_model() -> Arc<CaseDefinition> {
    Arc::new(
        CaseModelBuilder::new("gated")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c1")
                    .child("c2")
                    .sentry(
                        SentryDeclaration::new("S1")
                            .with_on_part("c1", TransitionEvent::Complete)
                            .with_if_part("amount > 100"),
                    ),
            )
            .activity(ActivityBuilder::task("c1"))
            .activity(ActivityBuilder::task("c2").entry_criterion("S1"))
            .build()
            .expect("valid model"),
    )
}

fn gated_engine(amount: i64) -> (CaseEngine, Arc<ThresholdEvaluator>) {
    let evaluator = Arc::new(ThresholdEvaluator::default());
    let mut engine = CaseEngine::builder(gated_model())
        .evaluator(evaluator.clone())
        .build()
        .unwrap();
    engine
        .create_case_instance_with_variables([("amount".to_string(), json!(amount))])
        .unwrap();
    (engine, evaluator)
}

#[test]
fn on_part_plus_guard_fires_when_both_hold() {
    let (mut engine, evaluator) = gated_engine(150);
    let c1 = engine.find_by_activity("c1").unwrap();
    let c2 = engine.find_by_activity("c2").unwrap();
    assert_eq!(engine.state_of(c2).unwrap(), CaseExecutionState::Available);

    engine.complete(c1).unwrap();
    assert_eq!(engine.state_of(c2).unwrap(), CaseExecutionState::Active);
    // One pulse, one guard evaluation.
    assert_eq!(evaluator.call_count(), 1);

    // All parts of the fired sentry were reset.
    let root = engine.case_instance();
    assert!(engine
        .tree()
        .get(root)
        .unwrap()
        .sentry_parts
        .iter()
        .all(|p| !p.satisfied));
}

#[test]
fn guard_is_not_evaluated_while_an_on_part_is_unsatisfied() {
    let (mut engine, evaluator) = gated_engine(150);
    // The creation pulses never reach the if-part: `is_sentry_satisfied`
    // stops at the unsatisfied on-part before consulting the guard.
    assert_eq!(evaluator.call_count(), 0);

    let root = engine.case_instance();
    engine.set_variable(root, "note", json!("x")).unwrap();
    assert_eq!(evaluator.call_count(), 0);

    let c1 = engine.find_by_activity("c1").unwrap();
    engine.complete(c1).unwrap();
    assert_eq!(evaluator.call_count(), 1);
}

#[test]
fn unsatisfied_guard_blocks_until_a_variable_write_reopens_it() {
    let (mut engine, _evaluator) = gated_engine(50);
    let c1 = engine.find_by_activity("c1").unwrap();
    let c2 = engine.find_by_activity("c2").unwrap();

    engine.complete(c1).unwrap();
    // The on-part is satisfied but the guard said no.
    assert_eq!(engine.state_of(c2).unwrap(), CaseExecutionState::Available);
    let root = engine.case_instance();
    assert!(engine
        .tree()
        .get(root)
        .unwrap()
        .sentry_parts
        .iter()
        .any(|p| p.satisfied));

    // A later variable write re-evaluates every sentry in the tree, so the
    // guard-only remainder of the conjunction can open without any further
    // transition event.
    engine.set_variable(root, "amount", json!(150)).unwrap();
    assert_eq!(engine.state_of(c2).unwrap(), CaseExecutionState::Active);
}

#[test]
fn all_on_parts_must_be_satisfied_before_the_sentry_fires() {
    let definition = Arc::new(
        CaseModelBuilder::new("conjunction")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c1")
                    .child("c2")
                    .child("x")
                    .sentry(
                        SentryDeclaration::new("both")
                            .with_on_part("c1", TransitionEvent::Complete)
                            .with_on_part("c2", TransitionEvent::Complete),
                    ),
            )
            .activity(ActivityBuilder::task("c1"))
            .activity(ActivityBuilder::task("c2"))
            .activity(ActivityBuilder::task("x").entry_criterion("both"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let c1 = engine.find_by_activity("c1").unwrap();
    let c2 = engine.find_by_activity("c2").unwrap();
    let x = engine.find_by_activity("x").unwrap();

    engine.complete(c1).unwrap();
    assert_eq!(engine.state_of(x).unwrap(), CaseExecutionState::Available);

    engine.complete(c2).unwrap();
    assert_eq!(engine.state_of(x).unwrap(), CaseExecutionState::Active);
}

#[test]
fn variable_on_part_with_guard() {
    let definition = Arc::new(
        CaseModelBuilder::new("varGated")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c1")
                    .child("c2")
                    .sentry(
                        SentryDeclaration::new("S1")
                            .with_variable_on_part(
                                "amount",
                                caseweave::variables::VariableEventKind::Update,
                            )
                            .with_if_part("amount > 100"),
                    ),
            )
            .activity(ActivityBuilder::task("c1"))
            .activity(ActivityBuilder::task("c2").entry_criterion("S1"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition)
        .evaluator(Arc::new(ThresholdEvaluator::default()))
        .build()
        .unwrap();
    engine
        .create_case_instance_with_variables([("amount".to_string(), json!(10))])
        .unwrap();
    let root = engine.case_instance();
    let c2 = engine.find_by_activity("c2").unwrap();

    engine.set_variable(root, "amount", json!(50)).unwrap();
    assert_eq!(engine.state_of(c2).unwrap(), CaseExecutionState::Available);

    // Second write: the variable-on-part is already satisfied, only the
    // guard was missing.
    engine.set_variable(root, "amount", json!(150)).unwrap();
    assert_eq!(engine.state_of(c2).unwrap(), CaseExecutionState::Active);
}

#[test]
fn completion_bookkeeping_wins_over_the_root_exit_pulse() {
    // The root carries an exit criterion on the completion of both tasks.
    // When the last child completes, auto-completion bookkeeping has already
    // moved the root to COMPLETED before the pulse's root-exit check runs,
    // so the case ends COMPLETED, never TERMINATED.
    let definition = Arc::new(
        CaseModelBuilder::new("raceToClose")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c1")
                    .child("c2")
                    .sentry(
                        SentryDeclaration::new("allDone")
                            .with_on_part("c1", TransitionEvent::Complete)
                            .with_on_part("c2", TransitionEvent::Complete),
                    )
                    .exit_criterion("allDone"),
            )
            .activity(ActivityBuilder::task("c1"))
            .activity(ActivityBuilder::task("c2"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();
    let c1 = engine.find_by_activity("c1").unwrap();
    let c2 = engine.find_by_activity("c2").unwrap();

    engine.complete(c1).unwrap();
    assert_eq!(engine.state_of(root).unwrap(), CaseExecutionState::Active);

    engine.complete(c2).unwrap();
    assert_eq!(engine.state_of(root).unwrap(), CaseExecutionState::Completed);
}

#[test]
fn root_exit_criterion_terminates_a_still_active_case() {
    let definition = Arc::new(
        CaseModelBuilder::new("halt")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("halt")
                    .child("long")
                    .sentry(
                        SentryDeclaration::new("E")
                            .with_on_part("halt", TransitionEvent::Complete),
                    )
                    .exit_criterion("E"),
            )
            .activity(ActivityBuilder::task("halt"))
            .activity(ActivityBuilder::task("long"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();
    let halt = engine.find_by_activity("halt").unwrap();
    let long = engine.find_by_activity("long").unwrap();

    engine.complete(halt).unwrap();
    assert_eq!(engine.state_of(root).unwrap(), CaseExecutionState::Terminated);
    assert_eq!(engine.state_of(long).unwrap(), CaseExecutionState::Terminated);
}

#[test]
fn entry_fired_while_new_is_latched() {
    // `a` starts during the stage's creation loop; the sentry on `a`'s
    // start fires while `b` is still NEW, so `b` latches the result and
    // starts from its own creation check.
    let definition = Arc::new(
        CaseModelBuilder::new("latch")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("a")
                    .child("b")
                    .sentry(
                        SentryDeclaration::new("S")
                            .with_on_part("a", TransitionEvent::Start),
                    ),
            )
            .activity(ActivityBuilder::task("a"))
            .activity(ActivityBuilder::task("b").entry_criterion("S"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();

    let b = engine.find_by_activity("b").unwrap();
    assert_eq!(engine.state_of(b).unwrap(), CaseExecutionState::Active);
}

#[test]
fn only_the_first_satisfied_exit_criterion_fires() {
    let definition = Arc::new(
        CaseModelBuilder::new("doubleExit")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("t")
                    .child("x")
                    .sentry(
                        SentryDeclaration::new("E1")
                            .with_on_part("t", TransitionEvent::Complete),
                    )
                    .sentry(
                        SentryDeclaration::new("E2")
                            .with_on_part("t", TransitionEvent::Complete),
                    ),
            )
            .activity(ActivityBuilder::task("t"))
            .activity(
                ActivityBuilder::task("x")
                    .exit_criterion("E1")
                    .exit_criterion("E2"),
            )
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let t = engine.find_by_activity("t").unwrap();
    let x = engine.find_by_activity("x").unwrap();

    // Both sentries fire in the same pulse; `x` exits exactly once.
    engine.complete(t).unwrap();
    assert_eq!(engine.state_of(x).unwrap(), CaseExecutionState::Terminated);
}

#[test]
fn exit_pulse_skips_non_active_executions() {
    let definition = Arc::new(
        CaseModelBuilder::new("enabledExit")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("t")
                    .child("pending")
                    .sentry(
                        SentryDeclaration::new("E")
                            .with_on_part("t", TransitionEvent::Complete),
                    ),
            )
            .activity(ActivityBuilder::task("t"))
            .activity(
                ActivityBuilder::human_task("pending")
                    .manual_activation(true)
                    .exit_criterion("E"),
            )
            .build()
            .unwrap(),
    );
    let factory = Arc::new(RecordingTaskFactory::default());
    let mut engine = CaseEngine::builder(definition)
        .task_factory(factory)
        .build()
        .unwrap();
    engine.create_case_instance().unwrap();
    let t = engine.find_by_activity("t").unwrap();
    let pending = engine.find_by_activity("pending").unwrap();
    assert_eq!(engine.state_of(pending).unwrap(), CaseExecutionState::Enabled);

    engine.complete(t).unwrap();
    // Exit criteria only apply to ACTIVE executions during a pulse.
    assert_eq!(engine.state_of(pending).unwrap(), CaseExecutionState::Enabled);
}

#[test]
fn milestone_occurrence_chains_into_further_sentries() {
    let definition = Arc::new(
        CaseModelBuilder::new("chain")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c1")
                    .child("m")
                    .child("c3")
                    .sentry(
                        SentryDeclaration::new("S1")
                            .with_on_part("c1", TransitionEvent::Complete),
                    )
                    .sentry(
                        SentryDeclaration::new("S2")
                            .with_on_part("m", TransitionEvent::Occur),
                    ),
            )
            .activity(ActivityBuilder::task("c1"))
            .activity(ActivityBuilder::milestone("m").entry_criterion("S1"))
            .activity(ActivityBuilder::task("c3").entry_criterion("S2"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let c1 = engine.find_by_activity("c1").unwrap();
    let m = engine.find_by_activity("m").unwrap();
    let c3 = engine.find_by_activity("c3").unwrap();
    assert_eq!(engine.state_of(c3).unwrap(), CaseExecutionState::Available);

    engine.complete(c1).unwrap();
    assert_eq!(engine.state_of(m).unwrap(), CaseExecutionState::Completed);
    assert_eq!(engine.state_of(c3).unwrap(), CaseExecutionState::Active);
}

#[test]
fn if_part_only_sentries_are_checked_when_the_stage_starts() {
    let definition = Arc::new(
        CaseModelBuilder::new("ifOnly")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c")
                    .sentry(SentryDeclaration::new("always").with_if_part("true")),
            )
            .activity(ActivityBuilder::task("c").entry_criterion("always"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition)
        .evaluator(Arc::new(ThresholdEvaluator::default()))
        .build()
        .unwrap();
    engine.create_case_instance().unwrap();

    let c = engine.find_by_activity("c").unwrap();
    assert_eq!(engine.state_of(c).unwrap(), CaseExecutionState::Active);
}

#[test]
fn non_boolean_guard_is_a_configuration_error() {
    let definition = Arc::new(
        CaseModelBuilder::new("badGuard")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("c")
                    .sentry(SentryDeclaration::new("G").with_if_part("fortytwo")),
            )
            .activity(ActivityBuilder::task("c").entry_criterion("G"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition)
        .evaluator(Arc::new(ThresholdEvaluator::default()))
        .build()
        .unwrap();

    let err = engine.create_case_instance().unwrap_err();
    assert!(matches!(err, CaseEngineError::NonBooleanGuard { .. }));
}

#[test]
fn guard_evaluation_without_evaluator_is_unsupported() {
    let mut engine = CaseEngine::builder(gated_model()).build().unwrap();
    engine
        .create_case_instance_with_variables([("amount".to_string(), json!(150))])
        .unwrap();
    let c1 = engine.find_by_activity("c1").unwrap();

    let err = engine.complete(c1).unwrap_err();
    assert!(matches!(err, CaseEngineError::Unsupported { .. }));
}
