//! Rule theory answered by top-down evaluation at query time.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::builtin::BuiltinRegistry;
use crate::dependency::TableDependencyGraph;
use crate::error::DatalogError;
use crate::formula::{Atom, Formula, Rule, Term};
use crate::safety::{check_rule, reorder_for_safety};
use crate::topdown::{Candidate, TheoryLookup, TopDown, TopDownTheory};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    given: Rule,
    ordered: Rule,
}

/// Facts and rules without recursion, evaluated on demand.
#[derive(Debug, Clone)]
pub struct NonrecursiveTheory {
    name: String,
    includes: Vec<String>,
    /// Head table -> entries; facts are stored as body-less rules.
    rules: BTreeMap<String, Vec<Entry>>,
    graph: TableDependencyGraph,
}

impl NonrecursiveTheory {
    /// An empty theory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            includes: Vec::new(),
            rules: BTreeMap::new(),
            graph: TableDependencyGraph::new(),
        }
    }

    /// Consult the named theories when answering queries.
    pub fn with_includes(mut self, includes: Vec<String>) -> Self {
        self.includes = includes;
        self
    }

    /// Replace the included theory names.
    pub fn set_includes(&mut self, includes: Vec<String>) {
        self.includes = includes;
    }

    /// Insert a fact or rule.
    pub fn insert(&mut self, formula: &Formula, builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        self.update(&[(formula.clone(), true)], builtins)
    }

    /// Delete a fact or rule.
    pub fn delete(&mut self, formula: &Formula, builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        self.update(&[(formula.clone(), false)], builtins)
    }

    /// Apply a batch of insertions (`true`) and deletions (`false`).
    ///
    /// The whole batch is validated first; on error nothing changes.
    pub fn update(
        &mut self,
        changes: &[(Formula, bool)],
        builtins: &BuiltinRegistry,
    ) -> Result<(), DatalogError> {
        let mut graph = self.graph.clone();
        let mut entries = Vec::with_capacity(changes.len());
        for (formula, insert) in changes {
            let entry = self.validate(formula, *insert, &mut graph, builtins).inspect_err(|e| {
                warn!(theory = %self.name, formula = %formula, error = %e, "rejected change");
            })?;
            entries.push((entry, *insert));
        }

        for (entry, insert) in entries {
            let Some(entry) = entry else {
                continue;
            };
            debug!(theory = %self.name, insert, rule = %entry.given, "update");
            if insert {
                self.add(entry);
            } else {
                self.remove(&entry.ordered);
            }
        }
        Ok(())
    }

    /// Check one change against `graph`, recording its edges there.
    ///
    /// Returns `None` for deletions of rules that cannot be stored.
    fn validate(
        &self,
        formula: &Formula,
        insert: bool,
        graph: &mut TableDependencyGraph,
        builtins: &BuiltinRegistry,
    ) -> Result<Option<Entry>, DatalogError> {
        let given = formula.clone().into_rule();
        if given.is_fact() {
            if !given.head.is_ground() {
                return Err(DatalogError::NonGroundFact(given.head.to_string()));
            }
            return Ok(Some(Entry {
                ordered: given.clone(),
                given,
            }));
        }
        if !insert {
            let Ok(ordered) = reorder_for_safety(&given, builtins) else {
                return Ok(None);
            };
            if self.stores(&ordered) {
                graph.remove_rule(&ordered);
            }
            return Ok(Some(Entry { given, ordered }));
        }

        let ordered = check_rule(&given, builtins)?;
        if graph.would_create_cycle(&ordered) {
            return Err(DatalogError::Recursive(given.to_string()));
        }
        graph.add_rule(&ordered);
        Ok(Some(Entry { given, ordered }))
    }

    fn stores(&self, ordered: &Rule) -> bool {
        self.rules
            .get(ordered.table())
            .is_some_and(|entries| entries.iter().any(|e| e.ordered == *ordered))
    }

    fn add(&mut self, entry: Entry) {
        let entries = self.rules.entry(entry.ordered.table().to_string()).or_default();
        if entries.iter().any(|e| e.ordered == entry.ordered) {
            return;
        }
        self.graph.add_rule(&entry.ordered);
        entries.push(entry);
    }

    fn remove(&mut self, ordered: &Rule) {
        let Some(entries) = self.rules.get_mut(ordered.table()) else {
            return;
        };
        let Some(i) = entries.iter().position(|e| e.ordered == *ordered) else {
            return;
        };
        entries.remove(i);
        if entries.is_empty() {
            self.rules.remove(ordered.table());
        }
        self.graph.remove_rule(ordered);
    }

    /// Replace everything stored for `tables` with `facts`.
    pub fn initialize_tables(&mut self, tables: &[&str], facts: &[Atom]) -> Result<(), DatalogError> {
        if let Some(atom) = facts.iter().find(|a| !a.is_ground()) {
            return Err(DatalogError::NonGroundFact(atom.to_string()));
        }
        for table in tables {
            for entry in self.rules.remove(*table).unwrap_or_default() {
                self.graph.remove_rule(&entry.ordered);
            }
        }
        debug!(theory = %self.name, tables = tables.len(), facts = facts.len(), "initialize tables");
        for atom in facts {
            let rule = Rule::fact(atom.clone());
            self.add(Entry {
                given: rule.clone(),
                ordered: rule,
            });
        }
        Ok(())
    }

    /// Replace the whole content with `formulas`.
    pub fn define(&mut self, formulas: &[Formula], builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        let mut fresh = Self::new(self.name.clone()).with_includes(self.includes.clone());
        let changes: Vec<(Formula, bool)> = formulas.iter().map(|f| (f.clone(), true)).collect();
        fresh.update(&changes, builtins)?;
        *self = fresh;
        Ok(())
    }

    /// Drop every fact and rule.
    pub fn empty(&mut self) {
        self.rules.clear();
        self.graph = TableDependencyGraph::new();
    }

    /// Stored facts and rules as inserted, optionally restricted to `tables`.
    pub fn content(&self, tables: Option<&[&str]>) -> Vec<Formula> {
        self.rules
            .iter()
            .filter(|(table, _)| tables.is_none_or(|t| t.contains(&table.as_str())))
            .flat_map(|(_, entries)| entries.iter().map(|e| Formula::from(e.given.clone())))
            .collect()
    }

    /// Stored rules with a body.
    pub fn policy(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .values()
            .flatten()
            .map(|e| &e.given)
            .filter(|r| !r.is_fact())
    }

    /// Tables with at least one fact or rule.
    pub fn defined_tablenames(&self) -> BTreeSet<&str> {
        self.rules.keys().map(String::as_str).collect()
    }

    /// Arity of a defined table.
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.rules.get(table)?.first().map(|e| e.ordered.head.arity())
    }

    /// Instances of `query` holding in this theory alone.
    pub fn select(&self, query: &Formula, builtins: &BuiltinRegistry) -> Vec<Formula> {
        TopDown::new(self, builtins).select(query, true)
    }

    /// Every true instance of every defined table, resolving includes
    /// through `lookup` when given.
    pub fn consequences(
        &self,
        builtins: &BuiltinRegistry,
        lookup: Option<&dyn TheoryLookup>,
    ) -> Vec<Atom> {
        let mut evaluator = TopDown::new(self, builtins);
        if let Some(lookup) = lookup {
            evaluator = evaluator.with_lookup(lookup);
        }
        let mut facts = Vec::new();
        for (table, entries) in &self.rules {
            let Some(arity) = entries.first().map(|e| e.ordered.head.arity()) else {
                continue;
            };
            let query = Atom::new(
                table.clone(),
                (0..arity).map(|i| Term::var(format!("x{i}"))).collect(),
            );
            facts.extend(
                evaluator
                    .select(&Formula::Atom(query), true)
                    .into_iter()
                    .filter_map(|f| match f {
                        Formula::Atom(atom) => Some(atom),
                        Formula::Rule(_) => None,
                    }),
            );
        }
        facts
    }

    /// Whether `formula` is a stored rule or has a true instance.
    pub fn contains(&self, formula: &Formula, builtins: &BuiltinRegistry) -> bool {
        match formula {
            Formula::Rule(rule) => self
                .rules
                .get(rule.table())
                .is_some_and(|entries| entries.iter().any(|e| e.given == *rule)),
            Formula::Atom(_) => !TopDown::new(self, builtins).select(formula, false).is_empty(),
        }
    }
}

impl TopDownTheory for NonrecursiveTheory {
    fn name(&self) -> &str {
        &self.name
    }

    fn head_index(&self, table: &str) -> Vec<Candidate<'_>> {
        self.rules
            .get(table)
            .map(|entries| entries.iter().map(|e| Candidate::Rule(&e.ordered)).collect())
            .unwrap_or_default()
    }

    fn includes(&self) -> &[String] {
        &self.includes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SafetyError;
    use crate::parse::{parse, parse1};
    use pretty_assertions::assert_eq;

    fn theory(text: &str) -> (NonrecursiveTheory, BuiltinRegistry) {
        let builtins = BuiltinRegistry::with_defaults();
        let mut theory = NonrecursiveTheory::new("service");
        for formula in parse(text).expect("parses") {
            theory.insert(&formula, &builtins).expect("inserts");
        }
        (theory, builtins)
    }

    fn select(theory: &NonrecursiveTheory, builtins: &BuiltinRegistry, query: &str) -> Vec<String> {
        let mut answers: Vec<String> = theory
            .select(&parse1(query).expect("parses"), builtins)
            .iter()
            .map(ToString::to_string)
            .collect();
        answers.sort();
        answers
    }

    #[test]
    fn test_select_and_delete() {
        let (mut theory, builtins) = theory(
            "p(x) :- q(x, y), plus(x, y, z), r(z)
             q(1, 2) q(2, 3) r(3) r(5)",
        );
        assert_eq!(select(&theory, &builtins, "p(x)"), vec!["p(1)", "p(2)"]);

        theory
            .delete(&parse1("r(5)").expect("parses"), &builtins)
            .expect("deletes");
        assert_eq!(select(&theory, &builtins, "p(x)"), vec!["p(1)"]);
    }

    #[test]
    fn test_unsafe_rule_is_reordered() {
        let (theory, builtins) = theory("m(x) :- lt(x, y), j(x, y)  j(1, 2) j(3, 2)");
        assert_eq!(select(&theory, &builtins, "m(x)"), vec!["m(1)"]);
        assert_eq!(
            theory.content(Some(&["m"][..]))[0].to_string(),
            "m(x) :- lt(x, y), j(x, y)"
        );

        let mut theory = theory;
        theory
            .delete(&parse1("m(x) :- lt(x, y), j(x, y)").expect("parses"), &builtins)
            .expect("deletes");
        assert!(theory.policy().next().is_none());
    }

    #[test]
    fn test_recursion_is_rejected() {
        let (mut theory, builtins) = theory("p(x) :- q(x)  q(x) :- r(x)");
        let err = theory
            .insert(&parse1("r(x) :- p(x)").expect("parses"), &builtins)
            .unwrap_err();
        assert!(matches!(err, DatalogError::Recursive(_)));

        let err = theory
            .insert(&parse1("s(x) :- s(x)").expect("parses"), &builtins)
            .unwrap_err();
        assert!(matches!(err, DatalogError::Recursive(_)));
        assert_eq!(theory.policy().count(), 2);
    }

    #[test]
    fn test_batch_can_replace_rule_direction() {
        let (mut theory, builtins) = theory("r(x) :- p(x)  p(1)");
        let changes = vec![
            (parse1("r(x) :- p(x)").expect("parses"), false),
            (parse1("p(x) :- r(x)").expect("parses"), true),
        ];
        theory.update(&changes, &builtins).expect("batch applies");
        assert_eq!(
            theory.policy().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["p(x) :- r(x)"]
        );

        let closing = vec![
            (parse1("q(x) :- p(x)").expect("parses"), false),
            (parse1("r(x) :- p(x)").expect("parses"), true),
        ];
        let err = theory.update(&closing, &builtins).unwrap_err();
        assert!(matches!(err, DatalogError::Recursive(_)));
    }

    #[test]
    fn test_batch_is_atomic() {
        let (mut theory, builtins) = theory("q(1)");
        let changes = vec![
            (parse1("q(2)").expect("parses"), true),
            (parse1("p(x) :- q(x), not r(y)").expect("parses"), true),
        ];
        let err = theory.update(&changes, &builtins).unwrap_err();
        assert!(matches!(
            err,
            DatalogError::Safety(SafetyError::UnsafeLiterals { .. })
        ));
        assert_eq!(select(&theory, &builtins, "q(x)"), vec!["q(1)"]);

        let err = theory
            .insert(&parse1("q(x)").expect("parses"), &builtins)
            .unwrap_err();
        assert!(matches!(err, DatalogError::NonGroundFact(_)));
    }

    #[test]
    fn test_initialize_and_define() {
        let (mut theory, builtins) = theory("p(x) :- q(x)  q(1) q(2) r(7)");
        theory
            .initialize_tables(&["q"], &[Atom::from_values("q", &[3_i64.into()])])
            .expect("initializes");
        assert_eq!(select(&theory, &builtins, "p(x)"), vec!["p(3)"]);
        assert_eq!(theory.arity("r"), Some(1));

        let mut consequences: Vec<String> = theory
            .consequences(&builtins, None)
            .iter()
            .map(ToString::to_string)
            .collect();
        consequences.sort();
        assert_eq!(consequences, vec!["p(3)", "q(3)", "r(7)"]);

        theory
            .define(&parse("s(1) t(x) :- s(x)").expect("parses"), &builtins)
            .expect("defines");
        assert_eq!(theory.defined_tablenames(), BTreeSet::from(["s", "t"]));
        assert!(theory.contains(&parse1("t(1)").expect("parses"), &builtins));
        assert!(theory.contains(&parse1("t(x) :- s(x)").expect("parses"), &builtins));
        assert!(!theory.contains(&parse1("p(x)").expect("parses"), &builtins));

        theory.empty();
        assert!(theory.content(None).is_empty());
    }
}
