//! Justifications for stored facts.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::formula::{Atom, Binding, Literal, Rule};

/// One justification: a rule together with the ground substitution of its
/// variables that derives the fact.
///
/// Two proofs are equal when their rules are structurally equal and the
/// substitutions agree on the rule's variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proof {
    /// The substitution restricted to the rule's variables.
    pub binding: Binding,
    /// The justifying rule; a body-less rule for asserted facts.
    pub rule: Arc<Rule>,
}

impl Proof {
    /// A proof of an instance of `rule`.
    pub fn new(rule: Arc<Rule>, binding: &Binding) -> Self {
        let variables = rule.variables();
        let binding = binding
            .iter()
            .filter(|(v, _)| variables.contains(*v))
            .map(|(v, c)| (v.clone(), c.clone()))
            .collect();
        Self { binding, rule }
    }

    /// The proof attached to a fact asserted directly.
    pub fn asserted(atom: &Atom) -> Self {
        Self {
            binding: Binding::new(),
            rule: Arc::new(Rule::fact(atom.clone())),
        }
    }

    /// Whether this proof records a direct assertion.
    pub fn is_asserted(&self) -> bool {
        self.rule.is_fact()
    }

    /// The rule with the binding applied.
    pub fn instance(&self) -> Rule {
        self.rule.plug(&self.binding)
    }
}

/// A set of proofs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProofCollection(BTreeSet<Proof>);

impl ProofCollection {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection holding one proof.
    pub fn single(proof: Proof) -> Self {
        Self(BTreeSet::from([proof]))
    }

    /// Add one proof.
    pub fn insert(&mut self, proof: Proof) -> bool {
        self.0.insert(proof)
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &ProofCollection) {
        self.0.extend(other.0.iter().cloned());
    }

    /// In-place difference.
    pub fn difference_with(&mut self, other: &ProofCollection) {
        self.0.retain(|p| !other.0.contains(p));
    }

    /// Whether every proof of `self` is in `other`.
    pub fn is_subset(&self, other: &ProofCollection) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Whether every proof of `other` is in `self`.
    pub fn is_superset(&self, other: &ProofCollection) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Whether the two collections share a proof.
    pub fn intersects(&self, other: &ProofCollection) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// Whether `proof` is in the collection.
    pub fn contains(&self, proof: &Proof) -> bool {
        self.0.contains(proof)
    }

    /// Number of proofs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in a deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = &Proof> {
        self.0.iter()
    }
}

impl FromIterator<Proof> for ProofCollection {
    fn from_iter<I: IntoIterator<Item = Proof>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ProofCollection {
    type Item = Proof;
    type IntoIter = std::collections::btree_set::IntoIter<Proof>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Explanation of why a literal holds.
///
/// Children explain the body literals of `rule` instantiated for `root`.
/// Base facts, builtins, negations and literals whose explanation would
/// revisit an ancestor are leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofTree {
    /// The literal being explained.
    pub root: Literal,
    /// The instantiated rule used, if `root` is derived.
    pub rule: Option<Rule>,
    /// Explanations of the rule's body literals.
    pub children: Vec<ProofTree>,
}

impl ProofTree {
    /// A tree without children.
    pub fn leaf(root: Literal) -> Self {
        Self {
            root,
            rule: None,
            children: Vec::new(),
        }
    }

    /// Leaf literals in depth-first order.
    pub fn leaves(&self) -> Vec<&Literal> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.children.is_empty() {
                leaves.push(&node.root);
            }
            stack.extend(node.children.iter().rev());
        }
        leaves
    }
}

impl fmt::Display for ProofTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self, 0usize)];
        let mut first = true;
        while let Some((node, depth)) = stack.pop() {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            write!(f, "{:width$}{}", "", node.root, width = depth * 2)?;
            stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
        }
        Ok(())
    }
}
