//! The immutable plan model: activities, sentry declarations, and builders.

mod activity;
mod builder;
mod sentry;

pub use activity::{Activity, ActivityType, CaseDefinition};
pub use builder::{ActivityBuilder, CaseModelBuilder, ModelError};
pub use sentry::{
    IfPartDeclaration, OnPartDeclaration, SentryDeclaration, VariableOnPartDeclaration,
};
