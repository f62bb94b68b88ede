//! Fluent, validating builders for case definitions.
//!
//! The builder catches plan-model mistakes at build time so the engine can
//! trust the definition at run time: dangling child references, duplicate
//! sentry ids, on-parts pointing at unknown activities, and criteria that
//! reference no declared sentry are all rejected here.
//!
//! # Examples
//!
//! ```rust
//! use caseweave::model::{ActivityBuilder, CaseModelBuilder, SentryDeclaration};
//! use caseweave::engine::state::TransitionEvent;
//!
//! let definition = CaseModelBuilder::new("loan")
//!     .plan_model(
//!         ActivityBuilder::stage("casePlanModel")
//!             .child("review")
//!             .child("approve")
//!             .sentry(
//!                 SentryDeclaration::new("S1")
//!                     .with_on_part("review", TransitionEvent::Complete),
//!             ),
//!     )
//!     .activity(ActivityBuilder::human_task("review").manual_activation(true))
//!     .activity(ActivityBuilder::task("approve").entry_criterion("S1"))
//!     .build()
//!     .expect("valid model");
//! assert_eq!(definition.plan_model().children.len(), 2);
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::activity::{Activity, ActivityType, CaseDefinition};
use crate::model::sentry::SentryDeclaration;
use crate::variables::{CaseVariableListener, VariableEventKind, VariableListenerBinding};

/// Plan-model validation errors.
#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("activity '{activity}' is declared twice")]
    #[diagnostic(code(caseweave::model::duplicate_activity))]
    DuplicateActivity { activity: String },

    #[error("no plan model stage was provided")]
    #[diagnostic(
        code(caseweave::model::missing_plan_model),
        help("Call CaseModelBuilder::plan_model with the root stage.")
    )]
    MissingPlanModel,

    #[error("stage '{parent}' references unknown child activity '{child}'")]
    #[diagnostic(code(caseweave::model::unknown_child))]
    UnknownChild { parent: String, child: String },

    #[error("activity '{child}' is a child of more than one stage")]
    #[diagnostic(code(caseweave::model::multiple_parents))]
    MultipleParents { child: String },

    #[error("sentry '{sentry}' is declared twice")]
    #[diagnostic(code(caseweave::model::duplicate_sentry))]
    DuplicateSentry { sentry: String },

    #[error("sentry '{sentry}' has an on-part with unknown source activity '{source_activity}'")]
    #[diagnostic(code(caseweave::model::unknown_on_part_source))]
    UnknownOnPartSource {
        sentry: String,
        source_activity: String,
    },

    #[error("activity '{activity}' references sentry '{sentry}' with no matching declaration")]
    #[diagnostic(
        code(caseweave::model::dangling_criterion),
        help("Declare the sentry on the enclosing stage before referencing it.")
    )]
    DanglingCriterion { activity: String, sentry: String },

    #[error("the plan model stage '{activity}' cannot have entry criteria")]
    #[diagnostic(code(caseweave::model::entry_criterion_on_plan_model))]
    EntryCriterionOnPlanModel { activity: String },

    #[error("non-stage activity '{activity}' cannot have children")]
    #[diagnostic(code(caseweave::model::children_on_non_stage))]
    ChildrenOnNonStage { activity: String },
}

/// Builder for a single activity.
pub struct ActivityBuilder {
    activity: Activity,
}

impl ActivityBuilder {
    pub fn stage<S: Into<String>>(id: S) -> Self {
        Self {
            activity: Activity::new(id, ActivityType::Stage),
        }
    }

    pub fn task<S: Into<String>>(id: S) -> Self {
        Self {
            activity: Activity::new(id, ActivityType::Task),
        }
    }

    pub fn human_task<S: Into<String>>(id: S) -> Self {
        Self {
            activity: Activity::new(id, ActivityType::HumanTask),
        }
    }

    pub fn process_task<S: Into<String>>(id: S) -> Self {
        Self {
            activity: Activity::new(id, ActivityType::ProcessTask),
        }
    }

    pub fn case_task<S: Into<String>>(id: S) -> Self {
        Self {
            activity: Activity::new(id, ActivityType::CaseTask),
        }
    }

    pub fn milestone<S: Into<String>>(id: S) -> Self {
        Self {
            activity: Activity::new(id, ActivityType::Milestone),
        }
    }

    /// Wait in `ENABLED` for a manual start instead of starting directly.
    #[must_use]
    pub fn manual_activation(mut self, manual: bool) -> Self {
        self.activity.manual_activation = manual;
        self
    }

    /// Mark the activity as required for auto-completing parents.
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.activity.required = required;
        self
    }

    /// Stage only: complete as soon as no required work remains.
    #[must_use]
    pub fn auto_complete(mut self, auto_complete: bool) -> Self {
        self.activity.auto_complete = auto_complete;
        self
    }

    /// Add a child plan item reference (stage only).
    #[must_use]
    pub fn child<S: Into<String>>(mut self, child: S) -> Self {
        self.activity.children.push(child.into());
        self
    }

    /// Declare a sentry in this activity's scope.
    #[must_use]
    pub fn sentry(mut self, sentry: SentryDeclaration) -> Self {
        self.activity.sentries.push(sentry);
        self
    }

    /// Gate this activity's entry on a sentry id.
    #[must_use]
    pub fn entry_criterion<S: Into<String>>(mut self, sentry_id: S) -> Self {
        self.activity.entry_criteria.push(sentry_id.into());
        self
    }

    /// Gate this activity's exit on a sentry id.
    #[must_use]
    pub fn exit_criterion<S: Into<String>>(mut self, sentry_id: S) -> Self {
        self.activity.exit_criteria.push(sentry_id.into());
        self
    }

    /// Bind a (custom) variable listener for one event kind.
    #[must_use]
    pub fn variable_listener(
        mut self,
        kind: VariableEventKind,
        listener: Arc<dyn CaseVariableListener>,
    ) -> Self {
        self.activity
            .variable_listeners
            .entry(kind)
            .or_default()
            .push(VariableListenerBinding {
                listener,
                custom: true,
            });
        self
    }

    /// Bind a built-in variable listener that ignores the custom-listener switch.
    #[must_use]
    pub fn builtin_variable_listener(
        mut self,
        kind: VariableEventKind,
        listener: Arc<dyn CaseVariableListener>,
    ) -> Self {
        self.activity
            .variable_listeners
            .entry(kind)
            .or_default()
            .push(VariableListenerBinding {
                listener,
                custom: false,
            });
        self
    }
}

/// Builder for a whole case definition.
pub struct CaseModelBuilder {
    id: String,
    plan_model: Option<String>,
    activities: FxHashMap<String, Activity>,
    insertion_order: Vec<String>,
}

impl CaseModelBuilder {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            plan_model: None,
            activities: FxHashMap::default(),
            insertion_order: Vec::new(),
        }
    }

    /// Set the root stage of the plan model.
    #[must_use]
    pub fn plan_model(mut self, root: ActivityBuilder) -> Self {
        self.plan_model = Some(root.activity.id.clone());
        self.push(root.activity);
        self
    }

    /// Add a non-root activity.
    #[must_use]
    pub fn activity(mut self, activity: ActivityBuilder) -> Self {
        self.push(activity.activity);
        self
    }

    fn push(&mut self, activity: Activity) {
        self.insertion_order.push(activity.id.clone());
        self.activities.insert(activity.id.clone(), activity);
    }

    /// Validate and produce the immutable definition.
    pub fn build(self) -> Result<CaseDefinition, ModelError> {
        // Duplicate ids are swallowed by the map; detect them via the order log.
        for id in &self.insertion_order {
            if self.insertion_order.iter().filter(|o| *o == id).count() > 1 {
                return Err(ModelError::DuplicateActivity {
                    activity: id.clone(),
                });
            }
        }

        let root = self.plan_model.ok_or(ModelError::MissingPlanModel)?;

        let mut sentry_ids: Vec<&str> = Vec::new();
        let mut seen_children: Vec<&str> = Vec::new();
        for activity in self.activities.values() {
            if !activity.children.is_empty() && !activity.activity_type.is_stage() {
                return Err(ModelError::ChildrenOnNonStage {
                    activity: activity.id.clone(),
                });
            }
            for child in &activity.children {
                if !self.activities.contains_key(child) {
                    return Err(ModelError::UnknownChild {
                        parent: activity.id.clone(),
                        child: child.clone(),
                    });
                }
                if seen_children.contains(&child.as_str()) {
                    return Err(ModelError::MultipleParents {
                        child: child.clone(),
                    });
                }
                seen_children.push(child);
            }
            for sentry in &activity.sentries {
                if sentry_ids.contains(&sentry.id.as_str()) {
                    return Err(ModelError::DuplicateSentry {
                        sentry: sentry.id.clone(),
                    });
                }
                sentry_ids.push(&sentry.id);
                for on_part in &sentry.on_parts {
                    if !self.activities.contains_key(&on_part.source) {
                        return Err(ModelError::UnknownOnPartSource {
                            sentry: sentry.id.clone(),
                            source_activity: on_part.source.clone(),
                        });
                    }
                }
            }
        }

        for activity in self.activities.values() {
            if activity.id == root && !activity.entry_criteria.is_empty() {
                return Err(ModelError::EntryCriterionOnPlanModel {
                    activity: activity.id.clone(),
                });
            }
            for criterion in activity.entry_criteria.iter().chain(&activity.exit_criteria) {
                if !sentry_ids.contains(&criterion.as_str()) {
                    return Err(ModelError::DanglingCriterion {
                        activity: activity.id.clone(),
                        sentry: criterion.clone(),
                    });
                }
            }
        }

        match self.activities.get(&root) {
            Some(a) if a.activity_type.is_stage() => {}
            _ => return Err(ModelError::MissingPlanModel),
        }

        Ok(CaseDefinition::from_parts(self.id, root, self.activities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::TransitionEvent;

    #[test]
    fn on_part_with_unknown_source_activity_is_rejected() {
        let err = CaseModelBuilder::new("bad")
            .plan_model(
                ActivityBuilder::stage("casePlanModel").child("t").sentry(
                    SentryDeclaration::new("S")
                        .with_on_part("ghost", TransitionEvent::Complete),
                ),
            )
            .activity(ActivityBuilder::task("t").entry_criterion("S"))
            .build()
            .unwrap_err();
        assert!(matches!(
            &err,
            ModelError::UnknownOnPartSource { sentry, source_activity }
                if sentry == "S" && source_activity == "ghost"
        ));
        // The activity id is message data, not a chained cause.
        assert!(err.to_string().contains("ghost"));
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn criterion_without_a_declaration_is_rejected() {
        let err = CaseModelBuilder::new("bad")
            .plan_model(ActivityBuilder::stage("casePlanModel").child("t"))
            .activity(ActivityBuilder::task("t").entry_criterion("nowhere"))
            .build()
            .unwrap_err();
        assert!(matches!(
            &err,
            ModelError::DanglingCriterion { activity, sentry }
                if activity == "t" && sentry == "nowhere"
        ));
    }
}
