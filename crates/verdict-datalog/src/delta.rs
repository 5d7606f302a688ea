//! Delta rules: the semi-naive decomposition of rules by trigger literal.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::builtin::BuiltinRegistry;
use crate::formula::{Atom, Literal, Rule, Term};

/// Prefix of the synthetic tables introduced by [`eliminate_self_joins`].
pub const ALIAS_PREFIX: &str = "___";

/// Whether `table` is a synthetic self-join alias.
pub fn is_alias(table: &str) -> bool {
    table.starts_with(ALIAS_PREFIX)
}

/// The table an alias stands for.
pub fn aliased_table(table: &str) -> Option<&str> {
    let rest = table.strip_prefix(ALIAS_PREFIX)?;
    let mut parts = rest.rsplitn(3, '_');
    parts.next()?;
    parts.next()?;
    parts.next()
}

/// One rule seen from one of its body literals.
///
/// When a fact matching `trigger` changes, the instances of `head` for which
/// `body` holds change with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRule {
    /// The literal whose table's changes fire this rule.
    pub trigger: Literal,
    /// Head of the original rule.
    pub head: Atom,
    /// The original body without the trigger, in evaluation order.
    pub body: Vec<Literal>,
    /// The rule this delta rule was derived from.
    pub original: Arc<Rule>,
}

impl fmt::Display for DeltaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.trigger, Rule::new(self.head.clone(), self.body.clone()))
    }
}

/// One delta rule per non-builtin body literal of `rule`.
pub fn compile_delta_rules(rule: &Arc<Rule>, builtins: &BuiltinRegistry) -> Vec<DeltaRule> {
    rule.body
        .iter()
        .enumerate()
        .filter(|(_, lit)| !builtins.is_builtin(lit.table(), Some(lit.atom.arity())))
        .map(|(i, trigger)| DeltaRule {
            trigger: trigger.clone(),
            head: rule.head.clone(),
            body: rule
                .body
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, lit)| lit.clone())
                .collect(),
            original: Arc::clone(rule),
        })
        .collect()
}

/// Rename repeated occurrences of a table in `rule`'s body to aliases.
///
/// Returns the rewritten rule and one pass-through rule per alias, of the
/// form `___t_n_k(x1, ..., xn) :- t(x1, ..., xn)`.
pub fn eliminate_self_joins(rule: &Rule, builtins: &BuiltinRegistry) -> (Rule, Vec<Rule>) {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut aliases = Vec::new();
    let mut body = Vec::with_capacity(rule.body.len());

    for literal in &rule.body {
        let arity = literal.atom.arity();
        if builtins.is_builtin(literal.table(), Some(arity)) {
            body.push(literal.clone());
            continue;
        }
        let seen = occurrences.entry(literal.table()).or_default();
        *seen += 1;
        if *seen == 1 {
            body.push(literal.clone());
            continue;
        }
        let alias = format!("{}{}_{}_{}", ALIAS_PREFIX, literal.table(), arity, *seen - 1);
        let args: Vec<Term> = (0..arity).map(|i| Term::var(format!("x{i}"))).collect();
        aliases.push(Rule::new(
            Atom::new(alias.clone(), args.clone()),
            vec![Literal::positive(Atom::new(literal.table(), args))],
        ));
        body.push(Literal {
            atom: Atom::new(alias, literal.atom.arguments.clone()),
            negated: literal.negated,
        });
    }

    (Rule::new(rule.head.clone(), body), aliases)
}

/// Delta rules indexed by trigger table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaRuleTheory {
    by_trigger: HashMap<String, Vec<DeltaRule>>,
    originals: BTreeSet<Arc<Rule>>,
    views: HashMap<String, usize>,
    triggers: HashMap<String, usize>,
}

impl DeltaRuleTheory {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the delta rules of `rule`. Returns `false` if it was already
    /// registered.
    pub fn insert(&mut self, rule: Arc<Rule>, builtins: &BuiltinRegistry) -> bool {
        if self.originals.contains(&rule) {
            return false;
        }
        *self.views.entry(rule.table().to_string()).or_default() += 1;
        for delta in compile_delta_rules(&rule, builtins) {
            *self.triggers.entry(delta.trigger.table().to_string()).or_default() += 1;
            self.by_trigger
                .entry(delta.trigger.table().to_string())
                .or_default()
                .push(delta);
        }
        self.originals.insert(rule);
        true
    }

    /// Deregister the delta rules of `rule`. Returns `false` if it was not
    /// registered.
    pub fn delete(&mut self, rule: &Rule) -> bool {
        if !self.originals.remove(rule) {
            return false;
        }
        decrement(&mut self.views, rule.table());
        self.by_trigger.retain(|table, deltas| {
            let before = deltas.len();
            deltas.retain(|d| d.original.as_ref() != rule);
            for _ in deltas.len()..before {
                decrement(&mut self.triggers, table);
            }
            !deltas.is_empty()
        });
        true
    }

    /// Delta rules fired by changes to `table`.
    pub fn rules_with_trigger(&self, table: &str) -> &[DeltaRule] {
        self.by_trigger.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `table` is defined by some registered rule.
    pub fn is_view(&self, table: &str) -> bool {
        self.views.contains_key(table)
    }

    /// Whether `table` occurs in some registered rule.
    pub fn is_known(&self, table: &str) -> bool {
        self.is_view(table) || self.triggers.contains_key(table)
    }

    /// Tables used in rule bodies that no rule defines.
    pub fn base_tables(&self) -> BTreeSet<&str> {
        self.triggers
            .keys()
            .filter(|t| !self.is_view(t))
            .map(String::as_str)
            .collect()
    }

    /// Tables defined by some registered rule.
    pub fn view_tables(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    /// The registered rules.
    pub fn policy(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.originals.iter()
    }

    /// Whether no rule is registered.
    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }
}

fn decrement(counts: &mut HashMap<String, usize>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            counts.remove(key);
        }
    }
}
