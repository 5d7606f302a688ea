//! Error types for the datalog engine.

use std::fmt;

use thiserror::Error;

use crate::formula::{Literal, Variable};

/// Errors returned by theory operations.
///
/// A theory that returns one of these has not been modified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatalogError {
    /// Rule rejected by the safety analyzer.
    #[error(transparent)]
    Safety(#[from] SafetyError),

    /// Text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A fact containing variables was asserted.
    #[error("fact must be ground: {0}")]
    NonGroundFact(String),

    /// A fact of a table defined by rules was asserted or retracted directly.
    #[error("cannot modify derived table directly: {0}")]
    DerivedTableWrite(String),

    /// A rule would make a non-recursive theory recursive.
    #[error("rule introduces recursion: {0}")]
    Recursive(String),

    /// Text did not contain exactly one statement.
    #[error("expected exactly one statement, got: {0}")]
    NotAStatement(String),
}

/// A literal that could not be ordered after the literals binding its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsafeLiteral {
    /// The offending literal.
    pub literal: Literal,
    /// Required variables that no earlier literal binds.
    pub unbound: Vec<Variable>,
}

impl fmt::Display for UnsafeLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (unbound: {})", self.literal, join(&self.unbound))
    }
}

/// Rule rejected by the safety analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyError {
    /// Some negated or builtin literals have unbound required variables.
    #[error("unsafe literals in rule `{rule}`: {}", join(.literals))]
    UnsafeLiterals {
        /// Rendered rule.
        rule: String,
        /// Literals that could not be placed, in body order.
        literals: Vec<UnsafeLiteral>,
    },

    /// Head variables that never occur in the body.
    #[error("head variables of rule `{rule}` do not occur in its body: {}", join(.variables))]
    UnsafeHead {
        /// Rendered rule.
        rule: String,
        /// The unbound head variables.
        variables: Vec<Variable>,
    },
}

/// A builtin rejected its inputs.
///
/// Never escapes evaluation: the literal simply fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BuiltinError(pub String);

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
