//! Datalog policy engine.
//!
//! This crate provides:
//! - A formula model (terms, atoms, literals, rules) and a text front end
//! - Dual-context unification with undoable bindings
//! - A registry of builtin predicates over numbers, strings and datetimes
//! - Safety analysis that reorders rule bodies or rejects them
//! - A fact store where every tuple carries the set of its justifications
//! - Top-down evaluation over any theory, with theory inclusion
//! - Incrementally materialized theories driven by delta rules
//! - Non-recursive theories evaluated on demand

pub mod builtin;
pub mod database;
pub mod delta;
pub mod dependency;
mod error;
pub mod formula;
pub mod materialized;
pub mod nonrecursive;
pub mod parse;
pub mod proof;
pub mod safety;
pub mod topdown;
pub mod unify;

pub use builtin::{Builtin, BuiltinOutput, BuiltinRegistry};
pub use database::{Database, DbTuple, Event};
pub use delta::{DeltaRule, DeltaRuleTheory};
pub use dependency::TableDependencyGraph;
pub use error::{BuiltinError, DatalogError, SafetyError, UnsafeLiteral};
pub use formula::{Atom, Binding, Constant, Formula, Literal, Rule, Term, Variable};
pub use materialized::MaterializedTheory;
pub use nonrecursive::NonrecursiveTheory;
pub use parse::{parse, parse1};
pub use proof::{Proof, ProofCollection, ProofTree};
pub use topdown::{Candidate, TheoryLookup, TopDown, TopDownTheory};
pub use unify::{UnifierId, Unifiers, bi_unify_atoms};
