//! Activities and the case definition: the immutable plan model.
//!
//! The engine never owns this data; it reads sentry declarations, criterion
//! lists, activation flags, and listener bindings from it while driving the
//! runtime tree. A [`CaseDefinition`] is built once through the
//! [`CaseModelBuilder`](crate::model::CaseModelBuilder) and shared behind an
//! `Arc`.

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::model::sentry::SentryDeclaration;
use crate::variables::{CaseVariableListener, VariableEventKind, VariableListenerBinding};

/// What kind of plan item an activity is.
///
/// The type decides the lifecycle flavor: stages and tasks go through
/// `ENABLED`/`ACTIVE`, milestones occur straight from `AVAILABLE`, and
/// termination cascades pick `exit` or `parentTerminate` accordingly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityType {
    /// Composite activity with child plan items.
    Stage,
    /// Plain task; stays `ACTIVE` until completed.
    Task,
    /// Task that materializes a user task through the task factory.
    HumanTask,
    /// Task that spawns a sub-process instance.
    ProcessTask,
    /// Task that spawns a sub-case instance.
    CaseTask,
    /// Instantaneous achievement; occurs, never runs.
    Milestone,
}

impl ActivityType {
    /// Stages and all task flavors share the stage-or-task lifecycle.
    #[must_use]
    pub fn is_stage_or_task(&self) -> bool {
        !matches!(self, ActivityType::Milestone)
    }

    #[must_use]
    pub fn is_stage(&self) -> bool {
        matches!(self, ActivityType::Stage)
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivityType::Stage => "stage",
            ActivityType::Task => "task",
            ActivityType::HumanTask => "humanTask",
            ActivityType::ProcessTask => "processTask",
            ActivityType::CaseTask => "caseTask",
            ActivityType::Milestone => "milestone",
        };
        write!(f, "{name}")
    }
}

/// One activity of the plan model.
///
/// Sentries are declared on the enclosing stage (the scope that materializes
/// their runtime parts); entry/exit criteria reference those declarations by
/// id from the gated activity itself.
#[derive(Clone, Debug)]
pub struct Activity {
    pub id: String,
    pub activity_type: ActivityType,
    /// Whether the activity waits in `ENABLED` for a manual start.
    pub manual_activation: bool,
    /// Whether the activity must finish before an auto-completing parent can complete.
    pub required: bool,
    /// Stage only: complete as soon as no required work remains.
    pub auto_complete: bool,
    /// Child activity ids, in plan order. Stage only.
    pub children: Vec<String>,
    /// Sentries declared in this activity's scope.
    pub sentries: Vec<SentryDeclaration>,
    /// Sentry ids gating this activity's entry.
    pub entry_criteria: Vec<String>,
    /// Sentry ids gating this activity's exit.
    pub exit_criteria: Vec<String>,
    /// Variable listeners bound to this activity, per event kind.
    pub variable_listeners: FxHashMap<VariableEventKind, Vec<VariableListenerBinding>>,
}

impl Activity {
    pub(crate) fn new<S: Into<String>>(id: S, activity_type: ActivityType) -> Self {
        Self {
            id: id.into(),
            activity_type,
            manual_activation: false,
            required: false,
            auto_complete: false,
            children: Vec::new(),
            sentries: Vec::new(),
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            variable_listeners: FxHashMap::default(),
        }
    }

    /// Look up a sentry declared in this activity's scope.
    #[must_use]
    pub fn sentry(&self, sentry_id: &str) -> Option<&SentryDeclaration> {
        self.sentries.iter().find(|s| s.id == sentry_id)
    }

    /// Listeners bound here for one event kind, optionally excluding custom ones.
    #[must_use]
    pub fn variable_listeners(
        &self,
        kind: VariableEventKind,
        include_custom: bool,
    ) -> Vec<Arc<dyn CaseVariableListener>> {
        self.variable_listeners
            .get(&kind)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|b| include_custom || !b.custom)
                    .map(|b| Arc::clone(&b.listener))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any listener (respecting the custom filter) is bound for `kind`.
    #[must_use]
    pub fn has_variable_listeners(&self, kind: VariableEventKind, include_custom: bool) -> bool {
        self.variable_listeners
            .get(&kind)
            .is_some_and(|bindings| bindings.iter().any(|b| include_custom || !b.custom))
    }
}

/// The immutable case plan model.
#[derive(Clone, Debug)]
pub struct CaseDefinition {
    pub id: String,
    /// Root activity (the case plan model stage).
    pub case_plan_model: String,
    activities: FxHashMap<String, Activity>,
}

impl CaseDefinition {
    pub(crate) fn from_parts(
        id: String,
        case_plan_model: String,
        activities: FxHashMap<String, Activity>,
    ) -> Self {
        Self {
            id,
            case_plan_model,
            activities,
        }
    }

    #[must_use]
    pub fn activity(&self, activity_id: &str) -> Option<&Activity> {
        self.activities.get(activity_id)
    }

    /// The root stage of the plan model.
    #[must_use]
    pub fn plan_model(&self) -> &Activity {
        // Validated at build time: the root id always resolves to a stage.
        &self.activities[&self.case_plan_model]
    }

    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }
}
