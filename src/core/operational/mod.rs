//! Operational graph writes and mutation hooks

pub mod hooks;
pub mod writer;

pub use hooks::{AuditTrailHook, Mutation, MutationHook};
pub use writer::{DefaultLanguageRule, OperationalWriter, RunContext, WriteOutcome};
