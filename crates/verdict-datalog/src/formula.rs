//! Formula model: terms, atoms, literals, rules.
//!
//! All values are immutable once built. `plug` returns a new formula with
//! variables replaced and never touches its receiver. `Display` renders the
//! canonical text syntax accepted by [`crate::parse`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A flattened ground substitution: variable -> constant.
pub type Binding = BTreeMap<Variable, Constant>;

/// A typed constant value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Constant {
    /// A string constant.
    String(String),
    /// An integer constant.
    Int(i64),
    /// A floating point constant.
    Float(f64),
}

impl Constant {
    fn rank(&self) -> u8 {
        match self {
            Constant::Int(_) => 0,
            Constant::Float(_) => 1,
            Constant::String(_) => 2,
        }
    }

    /// Numeric view of this constant, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Int(i) => Some(*i as f64),
            Constant::Float(f) => Some(*f),
            Constant::String(_) => None,
        }
    }

    /// String view of this constant, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this constant is a number.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Constant::String(_))
    }

    /// The value without quoting, as it would be printed by a host program.
    pub fn plain(&self) -> String {
        match self {
            Constant::String(s) => s.clone(),
            Constant::Int(i) => i.to_string(),
            Constant::Float(f) => format_float(*f),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Constant::String(s) => s.hash(state),
            Constant::Int(i) => i.hash(state),
            Constant::Float(f) => f.to_bits().hash(state),
        }
    }
}

impl Ord for Constant {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Constant::String(a), Constant::String(b)) => a.cmp(b),
            (Constant::Int(a), Constant::Int(b)) => a.cmp(b),
            (Constant::Float(a), Constant::Float(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Constant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::String(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Float(x) => f.write_str(&format_float(*x)),
        }
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Int(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant::Float(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::String(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::String(value)
    }
}

/// A logic variable, identified by name within one formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(String);

impl Variable {
    /// Create a variable with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An argument of an atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// A variable.
    Variable(Variable),
    /// A constant.
    Constant(Constant),
}

impl Term {
    /// Shorthand for a variable term.
    pub fn var(name: impl Into<String>) -> Self {
        Term::Variable(Variable::new(name))
    }

    /// Whether this term is a variable.
    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    /// The constant, if this term is one.
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Term::Constant(c) => Some(c),
            Term::Variable(_) => None,
        }
    }

    fn plug(&self, binding: &Binding) -> Term {
        match self {
            Term::Variable(v) => match binding.get(v) {
                Some(c) => Term::Constant(c.clone()),
                None => self.clone(),
            },
            Term::Constant(_) => self.clone(),
        }
    }
}

impl From<Constant> for Term {
    fn from(value: Constant) -> Self {
        Term::Constant(value)
    }
}

impl From<Variable> for Term {
    fn from(value: Variable) -> Self {
        Term::Variable(value)
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Constant(Constant::Int(value))
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Term::Constant(Constant::Float(value))
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::Constant(Constant::from(value))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(v) => v.fmt(f),
            Term::Constant(c) => c.fmt(f),
        }
    }
}

/// A table applied to an ordered list of arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Atom {
    /// Table (predicate) name.
    pub table: String,
    /// Positional arguments.
    pub arguments: Vec<Term>,
}

impl Atom {
    /// Create an atom.
    pub fn new(table: impl Into<String>, arguments: Vec<Term>) -> Self {
        Self {
            table: table.into(),
            arguments,
        }
    }

    /// Create a ground atom from constant values.
    pub fn from_values(table: impl Into<String>, values: &[Constant]) -> Self {
        Self::new(table, values.iter().cloned().map(Term::Constant).collect())
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Variables occurring in the arguments.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.arguments
            .iter()
            .filter_map(|t| match t {
                Term::Variable(v) => Some(v.clone()),
                Term::Constant(_) => None,
            })
            .collect()
    }

    /// Whether no argument is a variable.
    pub fn is_ground(&self) -> bool {
        self.arguments.iter().all(|t| !t.is_variable())
    }

    /// Argument values, if the atom is ground.
    pub fn values(&self) -> Option<Vec<Constant>> {
        self.arguments
            .iter()
            .map(|t| t.as_constant().cloned())
            .collect()
    }

    /// A copy with variables replaced according to `binding`.
    pub fn plug(&self, binding: &Binding) -> Atom {
        Atom {
            table: self.table.clone(),
            arguments: self.arguments.iter().map(|t| t.plug(binding)).collect(),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.table)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}

/// A possibly negated atom, as it appears in a rule body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    /// The underlying atom.
    pub atom: Atom,
    /// Whether the literal is negated.
    pub negated: bool,
}

impl Literal {
    /// A positive literal.
    pub fn positive(atom: Atom) -> Self {
        Self {
            atom,
            negated: false,
        }
    }

    /// A negated literal.
    pub fn negative(atom: Atom) -> Self {
        Self {
            atom,
            negated: true,
        }
    }

    /// Table name of the underlying atom.
    pub fn table(&self) -> &str {
        &self.atom.table
    }

    /// The literal with its negation flag flipped.
    pub fn complement(&self) -> Literal {
        Literal {
            atom: self.atom.clone(),
            negated: !self.negated,
        }
    }

    /// Variables occurring in the literal.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.atom.variables()
    }

    /// Whether the literal is ground.
    pub fn is_ground(&self) -> bool {
        self.atom.is_ground()
    }

    /// A copy with variables replaced according to `binding`.
    pub fn plug(&self, binding: &Binding) -> Literal {
        Literal {
            atom: self.atom.plug(binding),
            negated: self.negated,
        }
    }
}

impl From<Atom> for Literal {
    fn from(atom: Atom) -> Self {
        Literal::positive(atom)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("not ")?;
        }
        self.atom.fmt(f)
    }
}

/// `head :- body`. A rule with an empty body is a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rule {
    /// The (never negated) head.
    pub head: Atom,
    /// Body literals, evaluated left to right.
    pub body: Vec<Literal>,
}

impl Rule {
    /// Create a rule.
    pub fn new(head: Atom, body: Vec<Literal>) -> Self {
        Self { head, body }
    }

    /// A body-less rule standing for a fact.
    pub fn fact(head: Atom) -> Self {
        Self {
            head,
            body: Vec::new(),
        }
    }

    /// Whether the body is empty.
    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// Table defined by this rule.
    pub fn table(&self) -> &str {
        &self.head.table
    }

    /// Variables occurring anywhere in the rule.
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = self.head.variables();
        for lit in &self.body {
            vars.extend(lit.variables());
        }
        vars
    }

    /// Tables occurring in the body.
    pub fn body_tables(&self) -> BTreeSet<&str> {
        self.body.iter().map(|l| l.table()).collect()
    }

    /// A copy with variables replaced according to `binding`.
    pub fn plug(&self, binding: &Binding) -> Rule {
        Rule {
            head: self.head.plug(binding),
            body: self.body.iter().map(|l| l.plug(binding)).collect(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.head.fmt(f)?;
        if self.body.is_empty() {
            return Ok(());
        }
        f.write_str(" :- ")?;
        for (i, lit) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", lit)?;
        }
        Ok(())
    }
}

/// A policy statement: either a fact or a rule.
///
/// Construct through `From<Rule>` to have body-less rules normalized to atoms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// A fact (or query atom).
    Atom(Atom),
    /// A rule with a non-empty body.
    Rule(Rule),
}

impl Formula {
    /// Table of the atom or of the rule head.
    pub fn table(&self) -> &str {
        match self {
            Formula::Atom(a) => &a.table,
            Formula::Rule(r) => &r.head.table,
        }
    }

    /// Whether this formula is an atom.
    pub fn is_atom(&self) -> bool {
        matches!(self, Formula::Atom(_))
    }

    /// Variables occurring anywhere in the formula.
    pub fn variables(&self) -> BTreeSet<Variable> {
        match self {
            Formula::Atom(a) => a.variables(),
            Formula::Rule(r) => r.variables(),
        }
    }

    /// Whether the formula is ground.
    pub fn is_ground(&self) -> bool {
        self.variables().is_empty()
    }

    /// A copy with variables replaced according to `binding`.
    pub fn plug(&self, binding: &Binding) -> Formula {
        match self {
            Formula::Atom(a) => Formula::Atom(a.plug(binding)),
            Formula::Rule(r) => Formula::Rule(r.plug(binding)),
        }
    }

    /// This formula as a rule (facts become body-less rules).
    pub fn into_rule(self) -> Rule {
        match self {
            Formula::Atom(a) => Rule::fact(a),
            Formula::Rule(r) => r,
        }
    }
}

impl From<Atom> for Formula {
    fn from(atom: Atom) -> Self {
        Formula::Atom(atom)
    }
}

impl From<Rule> for Formula {
    fn from(rule: Rule) -> Self {
        if rule.body.is_empty() {
            Formula::Atom(rule.head)
        } else {
            Formula::Rule(rule)
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Atom(a) => a.fmt(f),
            Formula::Rule(r) => r.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(table: &str, args: Vec<Term>) -> Atom {
        Atom::new(table, args)
    }

    #[test]
    fn test_rendering_matches_text_syntax() {
        let rule = Rule::new(
            atom("p", vec![Term::var("x")]),
            vec![
                Literal::positive(atom("q", vec![Term::var("x"), 1_i64.into()])),
                Literal::negative(atom("r", vec![Term::var("x"), "a".into(), 2.5_f64.into()])),
            ],
        );
        assert_eq!(rule.to_string(), "p(x) :- q(x, 1), not r(x, \"a\", 2.5)");
        assert_eq!(Constant::Float(3.0).to_string(), "3.0");
        assert_eq!(Constant::from("say \"hi\"").to_string(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_plug_does_not_mutate() {
        let a = atom("p", vec![Term::var("x"), Term::var("y")]);
        let mut binding = Binding::new();
        binding.insert(Variable::new("x"), Constant::Int(1));

        let plugged = a.plug(&binding);
        assert_eq!(plugged.to_string(), "p(1, y)");
        assert_eq!(a.to_string(), "p(x, y)");
        assert!(!plugged.is_ground());
        assert_eq!(plugged.variables().len(), 1);
    }

    #[test]
    fn test_constants_compare_by_type_and_value() {
        assert_ne!(Constant::Int(2), Constant::Float(2.0));
        assert_eq!(Constant::Float(2.5), Constant::Float(2.5));
        assert_ne!(Constant::from("1"), Constant::Int(1));
        assert!(Constant::Int(1) < Constant::Int(2));
    }

    #[test]
    fn test_json_shape() {
        let a = atom("p", vec![Term::var("x"), 1_i64.into(), "a".into()]);
        let json = serde_json::to_value(&a).expect("serializes");
        assert_eq!(
            json,
            serde_json::json!({
                "table": "p",
                "arguments": [
                    {"variable": "x"},
                    {"constant": {"type": "int", "value": 1}},
                    {"constant": {"type": "string", "value": "a"}},
                ],
            })
        );
        let back: Atom = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, a);
    }

    #[test]
    fn test_bodyless_rule_is_a_fact() {
        let fact = Rule::fact(atom("p", vec![1_i64.into()]));
        assert!(fact.is_fact());
        assert_eq!(Formula::from(fact.clone()), Formula::Atom(fact.head.clone()));
        assert_eq!(Formula::from(fact.head.clone()).into_rule(), fact);
    }
}
