//! # Caseweave: Case Lifecycle Execution Engine
//!
//! Caseweave executes case models: a tree of case executions driven by a
//! shared lifecycle state machine, gated by sentries (event/variable
//! triggers plus guard expressions), and coordinated through optimistic
//! revision checks on a pluggable store.
//!
//! ## Core Concepts
//!
//! - **Case definition**: The immutable plan model (stages, tasks,
//!   milestones, sentries), built once with the [`model::CaseModelBuilder`]
//! - **Execution tree**: One runtime node per activated plan item, rooted
//!   at the case instance
//! - **Lifecycle**: Every node obeys the same state machine
//!   (`NEW`, `AVAILABLE`, `ENABLED`, `ACTIVE`, … `COMPLETED`/`TERMINATED`)
//! - **Sentries**: Declarative gates whose parts are satisfied by child
//!   transitions and variable events; firing them enters or exits items
//! - **Variables**: Node-scoped values with ancestor shadowing, feeding
//!   both listeners and sentry guards
//!
//! ## Quick Start
//!
//! ```
//! use caseweave::engine::CaseEngine;
//! use caseweave::engine::state::{CaseExecutionState, TransitionEvent};
//! use caseweave::model::{ActivityBuilder, CaseModelBuilder, SentryDeclaration};
//! use std::sync::Arc;
//!
//! // A plan: task `review` becomes available only once `intake` completes.
//! let definition = CaseModelBuilder::new("onboarding")
//!     .plan_model(
//!         ActivityBuilder::stage("casePlanModel")
//!             .child("intake")
//!             .child("review")
//!             .sentry(SentryDeclaration::new("afterIntake")
//!                 .with_on_part("intake", TransitionEvent::Complete)),
//!     )
//!     .activity(ActivityBuilder::task("intake"))
//!     .activity(ActivityBuilder::task("review").entry_criterion("afterIntake"))
//!     .build()
//!     .unwrap();
//!
//! let mut engine = CaseEngine::builder(Arc::new(definition)).build().unwrap();
//! engine.create_case_instance().unwrap();
//!
//! let intake = engine.find_by_activity("intake").unwrap();
//! let review = engine.find_by_activity("review").unwrap();
//! assert_eq!(engine.state_of(review).unwrap(), CaseExecutionState::Available);
//!
//! // Completing `intake` satisfies the sentry and starts `review`.
//! engine.complete(intake).unwrap();
//! assert_eq!(engine.state_of(review).unwrap(), CaseExecutionState::Active);
//! ```
//!
//! ## Concurrency Model
//!
//! The engine itself is synchronous and single-writer; concurrent commands
//! coordinate through the [`store::CaseStore`] revision protocol. Every
//! sentry pulse force-bumps the revision of all parts of the affected
//! sentries, so two commands racing on the same gate collide in the store
//! even when they satisfied disjoint parts. A
//! [`StoreError::RevisionConflict`](store::StoreError) surfaces as a
//! retryable [`errors::CaseEngineError`]; re-run the whole command.
//!
//! ## Module Guide
//!
//! - [`model`] - Case definitions, activities, and sentry declarations
//! - [`engine`] - The execution tree, lifecycle, sentry and dispatch logic
//! - [`variables`] - Variable events, listeners, and scope views
//! - [`services`] - Guard evaluator and task factory traits
//! - [`store`] - Persistence with optimistic revision checks
//! - [`errors`] - The engine error taxonomy
//! - [`telemetry`] - Tracing subscriber setup for embedders

pub mod config;
pub mod engine;
pub mod errors;
pub mod model;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod variables;
