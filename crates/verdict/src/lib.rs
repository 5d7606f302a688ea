//! Policy runtime for Verdict.
//!
//! This crate provides:
//! - Named policies backed by materialized, non-recursive or fact-only theories
//! - Inclusion wiring so one policy can consult another's tables
//! - Dispatch of queries, updates and explanations by target name
//! - Triggers fired when a watched table's contents change
//! - Simulation of update and action sequences, and remediation of violations
//! - Runtime configuration and tracing setup

mod config;
mod error;
mod runtime;
pub mod telemetry;
mod trigger;

pub use config::{PolicyConfig, PolicyKind, RuntimeConfig};
pub use error::RuntimeError;
pub use runtime::{Policy, Runtime, ToFormula};
pub use trigger::{TableChange, TableKey, TriggerCallback, TriggerId, TriggerRegistry};
pub use verdict_datalog;
