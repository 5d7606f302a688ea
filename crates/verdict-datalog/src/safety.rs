//! Rule safety: body reordering and head range restriction.

use std::collections::BTreeSet;

use crate::builtin::BuiltinRegistry;
use crate::error::{SafetyError, UnsafeLiteral};
use crate::formula::{Literal, Rule, Term, Variable};

/// Variables that must be bound before `literal` can be evaluated.
///
/// Negated literals need every variable; builtins need their input
/// positions; ordinary positive literals need nothing.
pub fn required_variables(literal: &Literal, builtins: &BuiltinRegistry) -> BTreeSet<Variable> {
    if literal.negated {
        return literal.variables();
    }
    match builtins.lookup(literal.table(), literal.atom.arity()) {
        Some(builtin) => literal.atom.arguments[..builtin.num_inputs()]
            .iter()
            .filter_map(|t| match t {
                Term::Variable(v) => Some(v.clone()),
                Term::Constant(_) => None,
            })
            .collect(),
        None => BTreeSet::new(),
    }
}

/// Reorder the body of `rule` so every literal's required variables are
/// bound by literals placed before it.
///
/// Literals without unmet requirements keep their relative order. Returns a
/// new rule; `rule` itself is untouched.
pub fn reorder_for_safety(rule: &Rule, builtins: &BuiltinRegistry) -> Result<Rule, SafetyError> {
    let mut bound: BTreeSet<Variable> = BTreeSet::new();
    let mut placed: Vec<Literal> = Vec::with_capacity(rule.body.len());
    let mut pending: Vec<(&Literal, BTreeSet<Variable>)> = Vec::new();

    let mut place = |literal: &Literal, bound: &mut BTreeSet<Variable>| {
        if !literal.negated {
            bound.extend(literal.variables());
        }
        placed.push(literal.clone());
    };

    for literal in &rule.body {
        let required = required_variables(literal, builtins);
        if !required.is_subset(&bound) {
            pending.push((literal, required));
            continue;
        }
        place(literal, &mut bound);

        // Placing a literal may unblock earlier pending ones; keep going
        // until nothing else becomes ready.
        while let Some(i) = pending.iter().position(|(_, req)| req.is_subset(&bound)) {
            let (ready, _) = pending.remove(i);
            place(ready, &mut bound);
        }
    }

    if !pending.is_empty() {
        let literals = pending
            .into_iter()
            .map(|(literal, required)| UnsafeLiteral {
                literal: literal.clone(),
                unbound: required.difference(&bound).cloned().collect(),
            })
            .collect();
        return Err(SafetyError::UnsafeLiterals {
            rule: rule.to_string(),
            literals,
        });
    }

    Ok(Rule::new(rule.head.clone(), placed))
}

/// Check that every head variable occurs in a positive body literal.
pub fn check_head_safety(rule: &Rule) -> Result<(), SafetyError> {
    let body_vars: BTreeSet<Variable> = rule
        .body
        .iter()
        .filter(|l| !l.negated)
        .flat_map(|l| l.variables())
        .collect();
    let unbound: Vec<Variable> = rule.head.variables().difference(&body_vars).cloned().collect();
    if unbound.is_empty() {
        Ok(())
    } else {
        Err(SafetyError::UnsafeHead {
            rule: rule.to_string(),
            variables: unbound,
        })
    }
}

/// Full safety check: reorder the body, then check the head.
pub fn check_rule(rule: &Rule, builtins: &BuiltinRegistry) -> Result<Rule, SafetyError> {
    let reordered = reorder_for_safety(rule, builtins)?;
    check_head_safety(&reordered)?;
    Ok(reordered)
}
