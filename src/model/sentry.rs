//! Sentry declarations: the immutable side of the gating protocol.
//!
//! A sentry is a named boolean gate: zero-or-more on-parts (satisfied when a
//! source activity's execution performs a specific transition), zero-or-more
//! variable-on-parts (satisfied when a named variable undergoes a specific
//! change), and at most one if-part (a guard expression, evaluated last).
//! Declarations are owned by the plan model; the mutable per-run records are
//! [`SentryPart`](crate::engine::tree::SentryPart)s on the execution tree.

use serde::{Deserialize, Serialize};

use crate::engine::state::TransitionEvent;
use crate::variables::VariableEventKind;

/// On-part: source activity + required transition event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPartDeclaration {
    pub source: String,
    pub standard_event: TransitionEvent,
}

/// Variable-on-part: variable name + required variable event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableOnPartDeclaration {
    pub variable_name: String,
    pub variable_event: VariableEventKind,
}

/// If-part: a boolean guard expression, evaluated by the external evaluator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfPartDeclaration {
    pub condition: String,
}

/// A complete sentry declaration.
///
/// # Examples
///
/// ```rust
/// use caseweave::model::SentryDeclaration;
/// use caseweave::engine::state::TransitionEvent;
/// use caseweave::variables::VariableEventKind;
///
/// let sentry = SentryDeclaration::new("S1")
///     .with_on_part("c1", TransitionEvent::Complete)
///     .with_variable_on_part("amount", VariableEventKind::Update)
///     .with_if_part("amount > 100");
/// assert_eq!(sentry.on_parts.len(), 1);
/// assert!(sentry.if_part.is_some());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryDeclaration {
    pub id: String,
    pub if_part: Option<IfPartDeclaration>,
    pub on_parts: Vec<OnPartDeclaration>,
    pub variable_on_parts: Vec<VariableOnPartDeclaration>,
}

impl SentryDeclaration {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            if_part: None,
            on_parts: Vec::new(),
            variable_on_parts: Vec::new(),
        }
    }

    /// Add an on-part sourced from `source`'s `standard_event` transition.
    #[must_use]
    pub fn with_on_part<S: Into<String>>(mut self, source: S, standard_event: TransitionEvent) -> Self {
        self.on_parts.push(OnPartDeclaration {
            source: source.into(),
            standard_event,
        });
        self
    }

    /// Add a variable-on-part for `variable_name`'s `variable_event`.
    #[must_use]
    pub fn with_variable_on_part<S: Into<String>>(
        mut self,
        variable_name: S,
        variable_event: VariableEventKind,
    ) -> Self {
        self.variable_on_parts.push(VariableOnPartDeclaration {
            variable_name: variable_name.into(),
            variable_event,
        });
        self
    }

    /// Set the guard expression. At most one if-part per sentry.
    #[must_use]
    pub fn with_if_part<S: Into<String>>(mut self, condition: S) -> Self {
        self.if_part = Some(IfPartDeclaration {
            condition: condition.into(),
        });
        self
    }

    /// A sentry consisting of nothing but an if-part.
    #[must_use]
    pub fn is_if_part_only(&self) -> bool {
        self.if_part.is_some() && self.on_parts.is_empty() && self.variable_on_parts.is_empty()
    }
}
