//! Variable scoping, the listener dispatch queue, and the shadowing rules
//! applied to variable-triggered sentries.

mod common;
use common::*;

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use caseweave::config::EngineConfig;
use caseweave::engine::state::CaseExecutionState;
use caseweave::engine::CaseEngine;
use caseweave::errors::CaseEngineError;
use caseweave::model::{ActivityBuilder, CaseDefinition, CaseModelBuilder, SentryDeclaration};
use caseweave::variables::VariableEventKind;

/// Plan model stage holding a nested stage `s` with one task `t`.
fn nested_model() -> Arc<CaseDefinition> {
    Arc::new(
        CaseModelBuilder::new("nested")
            .plan_model(ActivityBuilder::stage("casePlanModel").child("s"))
            .activity(ActivityBuilder::stage("s").child("t"))
            .activity(ActivityBuilder::task("t"))
            .build()
            .expect("valid model"),
    )
}

#[test]
fn variables_resolve_through_the_scope_chain() {
    let mut engine = CaseEngine::builder(nested_model()).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();
    let t = engine.find_by_activity("t").unwrap();

    // No enclosing scope holds `x`, so the write lands locally on `t`.
    engine.set_variable(t, "x", json!(1)).unwrap();
    assert_eq!(engine.get_variable(t, "x").unwrap(), Some(json!(1)));
    assert_eq!(engine.get_variable(root, "x").unwrap(), None);

    // A root-level variable of the same name is shadowed from `t`'s view.
    engine.set_variable_local(root, "x", json!(2)).unwrap();
    assert_eq!(engine.get_variable(t, "x").unwrap(), Some(json!(1)));
    assert_eq!(engine.variable_view(t).unwrap().get("x"), Some(&json!(1)));
    assert_eq!(engine.variable_view(root).unwrap().get("x"), Some(&json!(2)));
}

#[test]
fn set_variable_updates_the_nearest_declaring_scope() {
    let mut engine = CaseEngine::builder(nested_model()).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();
    let t = engine.find_by_activity("t").unwrap();

    engine.set_variable_local(root, "y", json!(1)).unwrap();
    engine.set_variable(t, "y", json!(9)).unwrap();

    // The write went to the root's existing entry, not a new local on `t`.
    assert!(!engine.tree().get(t).unwrap().has_variable_local("y"));
    assert_eq!(engine.get_variable(root, "y").unwrap(), Some(json!(9)));
}

#[test]
fn shadowed_scopes_ignore_outer_variable_writes() {
    let definition = Arc::new(
        CaseModelBuilder::new("shadow")
            .plan_model(ActivityBuilder::stage("casePlanModel").child("s"))
            .activity(
                ActivityBuilder::stage("s").child("t").sentry(
                    SentryDeclaration::new("V")
                        .with_variable_on_part("v", VariableEventKind::Update),
                ),
            )
            .activity(ActivityBuilder::task("t").entry_criterion("V"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();
    let s = engine.find_by_activity("s").unwrap();
    let t = engine.find_by_activity("t").unwrap();

    engine.set_variable_local(s, "v", json!(0)).unwrap();
    engine.set_variable_local(root, "v", json!(0)).unwrap();

    // The root's update is hidden from the sentry part on `s`, because `s`
    // declares its own `v` between the part and the raising scope.
    engine.set_variable(root, "v", json!(1)).unwrap();
    assert_eq!(engine.state_of(t).unwrap(), CaseExecutionState::Available);

    // Updating `s`'s own `v` is visible.
    engine.set_variable(s, "v", json!(2)).unwrap();
    assert_eq!(engine.state_of(t).unwrap(), CaseExecutionState::Active);
}

#[test]
fn listener_raised_events_are_handled_in_arrival_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let definition = Arc::new(
        CaseModelBuilder::new("chain")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("work")
                    .variable_listener(
                        VariableEventKind::Create,
                        Arc::new(ChainingListener {
                            log: log.clone(),
                            chain_from: "a".into(),
                            chain_to: "b".into(),
                        }),
                    ),
            )
            .activity(ActivityBuilder::task("work"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();

    // The listener for `a` writes `b`; the nested event is appended to the
    // queue and dispatched after `a` finishes, never recursively.
    engine.set_variable(root, "a", json!(1)).unwrap();
    assert_eq!(*log.lock(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(engine.get_variable(root, "b").unwrap(), Some(json!("chained")));
}

#[test]
fn chained_writes_pulse_after_the_event_that_raised_them() {
    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let chain_log = Arc::new(Mutex::new(Vec::new()));
    let definition = Arc::new(
        CaseModelBuilder::new("ordering")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("ta")
                    .child("tb")
                    .sentry(
                        SentryDeclaration::new("Sa")
                            .with_variable_on_part("a", VariableEventKind::Create),
                    )
                    .sentry(
                        SentryDeclaration::new("Sb")
                            .with_variable_on_part("b", VariableEventKind::Create),
                    )
                    .variable_listener(
                        VariableEventKind::Create,
                        Arc::new(ChainingListener {
                            log: chain_log.clone(),
                            chain_from: "a".into(),
                            chain_to: "b".into(),
                        }),
                    )
                    .variable_listener(
                        VariableEventKind::Create,
                        Arc::new(StateSnapshotListener {
                            log: snapshots.clone(),
                            watch: vec!["ta".into(), "tb".into()],
                        }),
                    ),
            )
            .activity(ActivityBuilder::task("ta").entry_criterion("Sa"))
            .activity(ActivityBuilder::task("tb").entry_criterion("Sb"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();

    engine.set_variable(root, "a", json!(1)).unwrap();

    // `a`'s listener chains a write to `b`, but `a` still pulses first:
    // when `b`'s listeners run, `ta` has already fired while `tb` has not.
    assert_eq!(
        *snapshots.lock(),
        vec![
            "a:ta=available".to_string(),
            "a:tb=available".to_string(),
            "b:ta=active".to_string(),
            "b:tb=available".to_string(),
        ]
    );
    let ta = engine.find_by_activity("ta").unwrap();
    let tb = engine.find_by_activity("tb").unwrap();
    assert_eq!(engine.state_of(ta).unwrap(), CaseExecutionState::Active);
    assert_eq!(engine.state_of(tb).unwrap(), CaseExecutionState::Active);
}

#[test]
fn custom_listeners_can_be_switched_off() {
    let custom_log = Arc::new(Mutex::new(Vec::new()));
    let builtin_log = Arc::new(Mutex::new(Vec::new()));
    let definition = Arc::new(
        CaseModelBuilder::new("switch")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("work")
                    .variable_listener(
                        VariableEventKind::Create,
                        Arc::new(RecordingListener {
                            log: custom_log.clone(),
                        }),
                    )
                    .builtin_variable_listener(
                        VariableEventKind::Create,
                        Arc::new(RecordingListener {
                            log: builtin_log.clone(),
                        }),
                    ),
            )
            .activity(ActivityBuilder::task("work"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition)
        .config(EngineConfig::default().with_invoke_custom_listeners(false))
        .build()
        .unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();

    engine.set_variable(root, "n", json!(1)).unwrap();
    assert!(custom_log.lock().is_empty());
    assert_eq!(*builtin_log.lock(), vec!["n=create".to_string()]);
}

#[test]
fn listener_failure_surfaces_with_the_variable_name() {
    let definition = Arc::new(
        CaseModelBuilder::new("failing")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("work")
                    .variable_listener(VariableEventKind::Create, Arc::new(FailingListener)),
            )
            .activity(ActivityBuilder::task("work"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();

    let err = engine.set_variable(root, "doomed", json!(1)).unwrap_err();
    match err {
        CaseEngineError::Listener { variable, .. } => assert_eq!(variable, "doomed"),
        other => panic!("expected listener error, got {other:?}"),
    }
}

#[test]
fn events_without_a_matching_listener_invoke_nothing() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let definition = Arc::new(
        CaseModelBuilder::new("deleteOnly")
            .plan_model(
                ActivityBuilder::stage("casePlanModel")
                    .child("work")
                    .variable_listener(
                        VariableEventKind::Delete,
                        Arc::new(RecordingListener { log: log.clone() }),
                    ),
            )
            .activity(ActivityBuilder::task("work"))
            .build()
            .unwrap(),
    );
    let mut engine = CaseEngine::builder(definition).build().unwrap();
    engine.create_case_instance().unwrap();
    let root = engine.case_instance();

    engine.set_variable(root, "v", json!(1)).unwrap();
    engine.set_variable(root, "v", json!(2)).unwrap();
    assert!(log.lock().is_empty());

    engine.remove_variable(root, "v").unwrap();
    assert_eq!(*log.lock(), vec!["v=delete".to_string()]);
    assert_eq!(engine.get_variable(root, "v").unwrap(), None);

    // Removing an absent variable is a no-op.
    engine.remove_variable(root, "v").unwrap();
    assert_eq!(log.lock().len(), 1);
}
