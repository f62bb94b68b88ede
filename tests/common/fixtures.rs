//! Shared collaborator stubs for integration tests.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use caseweave::engine::tree::ExecutionId;
use caseweave::engine::CaseEngine;
use caseweave::services::{
    EvalError, FactoryError, GuardEvaluator, SubInstanceHandle, TaskFactory, TaskHandle,
};
use caseweave::variables::{CaseVariableListener, DelegateVariable, ListenerError, VariableView};

/// Evaluates `name > threshold` comparisons and the literals `true` /
/// `false`, counting invocations so tests can assert a guard actually ran.
#[derive(Default)]
pub struct ThresholdEvaluator {
    pub calls: AtomicUsize,
}

impl ThresholdEvaluator {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GuardEvaluator for ThresholdEvaluator {
    fn evaluate(&self, expression: &str, scope: &VariableView) -> Result<Value, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((name, threshold)) = expression.split_once('>') {
            let threshold: f64 = threshold
                .trim()
                .parse()
                .map_err(|_| EvalError::new(expression, "bad threshold"))?;
            let value = scope
                .get(name.trim())
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            return Ok(json!(value > threshold));
        }
        match expression {
            "true" => Ok(json!(true)),
            "false" => Ok(json!(false)),
            // Deliberately ill-typed, for the non-boolean-guard test.
            "fortytwo" => Ok(json!(42)),
            other => Err(EvalError::new(other, "unsupported expression")),
        }
    }
}

/// Records every task and sub-instance the engine asks for.
#[derive(Default)]
pub struct RecordingTaskFactory {
    pub created: Mutex<Vec<String>>,
}

impl RecordingTaskFactory {
    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

impl TaskFactory for RecordingTaskFactory {
    fn create_task(
        &self,
        _execution: ExecutionId,
        activity_id: &str,
    ) -> Result<TaskHandle, FactoryError> {
        self.created.lock().push(format!("task:{activity_id}"));
        Ok(TaskHandle {
            id: format!("task-{activity_id}"),
        })
    }

    fn create_sub_process(
        &self,
        execution: ExecutionId,
        activity_id: &str,
    ) -> Result<SubInstanceHandle, FactoryError> {
        self.created.lock().push(format!("process:{activity_id}"));
        Ok(SubInstanceHandle {
            id: format!("process-{activity_id}"),
            super_execution: execution,
        })
    }

    fn create_sub_case(
        &self,
        execution: ExecutionId,
        activity_id: &str,
    ) -> Result<SubInstanceHandle, FactoryError> {
        self.created.lock().push(format!("case:{activity_id}"));
        Ok(SubInstanceHandle {
            id: format!("case-{activity_id}"),
            super_execution: execution,
        })
    }
}

/// Appends `name=kind` entries to a shared log.
pub struct RecordingListener {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl CaseVariableListener for RecordingListener {
    fn on_event(
        &self,
        variable: &DelegateVariable<'_>,
        _engine: &mut CaseEngine,
    ) -> Result<(), ListenerError> {
        self.log
            .lock()
            .push(format!("{}={}", variable.name, variable.kind));
        Ok(())
    }
}

/// Records the event, then writes a follow-up variable the first time it
/// sees `chain_from`; used to exercise dispatch-queue ordering.
pub struct ChainingListener {
    pub log: Arc<Mutex<Vec<String>>>,
    pub chain_from: String,
    pub chain_to: String,
}

impl CaseVariableListener for ChainingListener {
    fn on_event(
        &self,
        variable: &DelegateVariable<'_>,
        engine: &mut CaseEngine,
    ) -> Result<(), ListenerError> {
        self.log.lock().push(variable.name.to_string());
        if variable.name == self.chain_from {
            engine
                .set_variable(variable.source, &self.chain_to, json!("chained"))
                .map_err(|e| ListenerError::msg(e.to_string()))?;
        }
        Ok(())
    }
}

/// Logs the lifecycle state of a set of watched activities at the moment
/// each event is observed; used to pin down pulse-versus-listener ordering.
pub struct StateSnapshotListener {
    pub log: Arc<Mutex<Vec<String>>>,
    pub watch: Vec<String>,
}

impl CaseVariableListener for StateSnapshotListener {
    fn on_event(
        &self,
        variable: &DelegateVariable<'_>,
        engine: &mut CaseEngine,
    ) -> Result<(), ListenerError> {
        for activity in &self.watch {
            if let Some(id) = engine.find_by_activity(activity) {
                if let Ok(state) = engine.state_of(id) {
                    self.log
                        .lock()
                        .push(format!("{}:{activity}={state}", variable.name));
                }
            }
        }
        Ok(())
    }
}

/// Always fails; for the error-propagation test.
pub struct FailingListener;

impl CaseVariableListener for FailingListener {
    fn on_event(
        &self,
        _variable: &DelegateVariable<'_>,
        _engine: &mut CaseEngine,
    ) -> Result<(), ListenerError> {
        Err(ListenerError::msg("listener exploded"))
    }
}
