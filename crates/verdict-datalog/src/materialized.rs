//! Incrementally maintained (materialized) theory.
//!
//! Every fact derivable from the theory's rules is kept in its database.
//! Changes are queued and drained to a fixpoint before a mutating call
//! returns, so readers only ever see quiescent states.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::builtin::BuiltinRegistry;
use crate::database::{Database, Event};
use crate::dependency::TableDependencyGraph;
use crate::delta::{DeltaRuleTheory, aliased_table, eliminate_self_joins, is_alias};
use crate::error::DatalogError;
use crate::formula::{Atom, Binding, Formula, Literal, Rule};
use crate::proof::{Proof, ProofCollection, ProofTree};
use crate::safety::check_rule;
use crate::topdown::{Candidate, TopDown, TopDownTheory};
use crate::unify::match_atom;

/// A queued change.
#[derive(Debug, Clone)]
enum Update {
    Fact(Event),
    Rule { rule: Arc<Rule>, insert: bool },
}

/// A rule as inserted, with the form actually evaluated.
#[derive(Debug, Clone)]
struct Installed {
    canonical: Arc<Rule>,
    aliases: Vec<Rule>,
}

/// A theory whose derived tables are stored and maintained incrementally.
#[derive(Debug, Clone)]
pub struct MaterializedTheory {
    name: String,
    includes: Vec<String>,
    database: Database,
    delta_rules: DeltaRuleTheory,
    rules: BTreeMap<Rule, Installed>,
    aliases: HashMap<Rule, usize>,
    queue: VecDeque<Update>,
}

impl MaterializedTheory {
    /// An empty theory.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            database: Database::new(name.clone()),
            name,
            includes: Vec::new(),
            delta_rules: DeltaRuleTheory::new(),
            rules: BTreeMap::new(),
            aliases: HashMap::new(),
            queue: VecDeque::new(),
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

    /// The stored facts, base and derived.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The registered delta rules.
    pub fn delta_rules(&self) -> &DeltaRuleTheory {
        &self.delta_rules
    }

    /// Insert a fact or rule and propagate to a fixpoint.
    pub fn insert(&mut self, formula: &Formula, builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        self.update(&[(formula.clone(), true)], builtins)
    }

    /// Delete a fact or rule and propagate to a fixpoint.
    pub fn delete(&mut self, formula: &Formula, builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        self.update(&[(formula.clone(), false)], builtins)
    }

    /// Apply a batch of insertions (`true`) and deletions (`false`).
    ///
    /// Every change is validated before any is applied. Body-less rules are
    /// stored as facts.
    pub fn update(
        &mut self,
        changes: &[(Formula, bool)],
        builtins: &BuiltinRegistry,
    ) -> Result<(), DatalogError> {
        let changes: Vec<(Formula, bool)> = changes
            .iter()
            .map(|(formula, insert)| (Formula::from(formula.clone().into_rule()), *insert))
            .collect();

        let mut checked = Vec::with_capacity(changes.len());
        for (formula, insert) in &changes {
            checked.push(self.validate(formula, *insert, builtins).inspect_err(|e| {
                warn!(theory = %self.name, formula = %formula, error = %e, "rejected change");
            })?);
        }

        for ((formula, insert), canonical) in changes.iter().zip(checked) {
            debug!(theory = %self.name, insert, formula = %formula, "enqueue");
            match (formula, canonical) {
                (Formula::Atom(atom), _) => {
                    self.queue
                        .push_back(Update::Fact(Event::asserted(atom.clone(), *insert)));
                }
                (Formula::Rule(rule), Some(installed)) => {
                    self.enqueue_rule(rule, installed, *insert);
                }
                (Formula::Rule(_), None) => {}
            }
        }
        self.process_queue(builtins)?;
        if changes.iter().any(|(_, insert)| !insert) {
            self.prune_unsupported(builtins)?;
        }
        Ok(())
    }

    /// Check one change. For rules, returns the form to install.
    fn validate(
        &self,
        formula: &Formula,
        insert: bool,
        builtins: &BuiltinRegistry,
    ) -> Result<Option<Installed>, DatalogError> {
        match formula {
            Formula::Atom(atom) => {
                if !atom.is_ground() {
                    return Err(DatalogError::NonGroundFact(atom.to_string()));
                }
                if self.delta_rules.is_view(&atom.table) {
                    return Err(DatalogError::DerivedTableWrite(atom.to_string()));
                }
                Ok(None)
            }
            Formula::Rule(rule) if insert => {
                let ordered = check_rule(rule, builtins)?;
                let (canonical, aliases) = eliminate_self_joins(&ordered, builtins);
                Ok(Some(Installed {
                    canonical: Arc::new(canonical),
                    aliases,
                }))
            }
            Formula::Rule(rule) => Ok(self.rules.get(rule).cloned()),
        }
    }

    fn enqueue_rule(&mut self, rule: &Rule, installed: Installed, insert: bool) {
        if insert {
            if self.rules.contains_key(rule) {
                return;
            }
            for alias in &installed.aliases {
                let count = self.aliases.entry(alias.clone()).or_default();
                *count += 1;
                if *count == 1 {
                    self.queue.push_back(Update::Rule {
                        rule: Arc::new(alias.clone()),
                        insert: true,
                    });
                }
            }
            self.queue.push_back(Update::Rule {
                rule: Arc::clone(&installed.canonical),
                insert: true,
            });
            self.rules.insert(rule.clone(), installed);
        } else {
            if self.rules.remove(rule).is_none() {
                return;
            }
            self.queue.push_back(Update::Rule {
                rule: Arc::clone(&installed.canonical),
                insert: false,
            });
            for alias in installed.aliases {
                let Some(count) = self.aliases.get_mut(&alias) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    self.aliases.remove(&alias);
                    self.queue.push_back(Update::Rule {
                        rule: Arc::new(alias),
                        insert: false,
                    });
                }
            }
        }
    }

    fn process_queue(&mut self, builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        while let Some(update) = self.queue.pop_front() {
            match update {
                Update::Rule { rule, insert } => self.process_rule(rule, insert, builtins),
                Update::Fact(event) => {
                    if self.database.is_noop(&event) {
                        trace!(theory = %self.name, event = %event, "noop");
                        continue;
                    }
                    if self.changes_visibility(&event) {
                        self.propagate(&event, builtins);
                    }
                    self.database.modify(&event)?;
                }
            }
        }
        Ok(())
    }

    /// Whether applying `event` makes its fact appear or disappear.
    fn changes_visibility(&self, event: &Event) -> bool {
        if event.insert {
            !self.database.contains(&event.atom)
        } else {
            self.database.explain(&event.atom).is_subset(&event.proofs)
        }
    }

    fn process_rule(&mut self, rule: Arc<Rule>, insert: bool, builtins: &BuiltinRegistry) {
        if insert {
            self.delta_rules.insert(Arc::clone(&rule), builtins);
        } else {
            self.delta_rules.delete(&rule);
        }
        let bindings = TopDown::new(&self.database, builtins).evaluate(
            &rule.body,
            &rule.variables(),
            true,
        );
        trace!(theory = %self.name, rule = %rule, insert, instances = bindings.len(), "rule");
        self.enqueue_heads(&rule, &rule.head, bindings, insert);
    }

    /// Enqueue the consequences of `event` through every delta rule it
    /// triggers, evaluated against the database before the event applies.
    fn propagate(&mut self, event: &Event, builtins: &BuiltinRegistry) {
        trace!(theory = %self.name, event = %event, "propagate");
        let mut derived = Vec::new();
        for delta in self.delta_rules.rules_with_trigger(event.table()) {
            let Some(seed) = match_atom(&delta.trigger.atom, &event.atom) else {
                continue;
            };
            let insert = event.insert != delta.trigger.negated;
            let bindings = TopDown::new(&self.database, builtins).evaluate_from(
                &delta.body,
                &seed,
                &delta.original.variables(),
                true,
            );
            derived.push((Arc::clone(&delta.original), delta.head.clone(), bindings, insert));
        }
        for (rule, head, bindings, insert) in derived {
            self.enqueue_heads(&rule, &head, bindings, insert);
        }
    }

    /// Delete stored facts whose proofs only lead back to other unsupported
    /// facts. Recursive rules let such facts justify each other after the
    /// base facts they came from are gone.
    fn prune_unsupported(&mut self, builtins: &BuiltinRegistry) -> Result<(), DatalogError> {
        let graph = TableDependencyGraph::from_rules(self.delta_rules.policy().map(Arc::as_ref));
        if !graph.has_cycle() {
            return Ok(());
        }
        let unsupported = self.unsupported(builtins);
        if unsupported.is_empty() {
            return Ok(());
        }
        debug!(theory = %self.name, facts = unsupported.len(), "pruning unsupported facts");
        for atom in unsupported {
            let proofs = self.database.explain(&atom);
            self.queue.push_back(Update::Fact(Event::delete(atom, proofs)));
        }
        self.process_queue(builtins)
    }

    /// Stored facts outside the least set closed under their proofs.
    fn unsupported(&self, builtins: &BuiltinRegistry) -> Vec<Atom> {
        let mut facts: Vec<(Atom, Vec<Vec<Atom>>)> = Vec::new();
        for table in self.database.tablenames() {
            for tuple in self.database.tuples(table) {
                let premises = tuple
                    .proofs
                    .iter()
                    .map(|proof| {
                        if proof.is_asserted() {
                            return Vec::new();
                        }
                        proof
                            .instance()
                            .body
                            .into_iter()
                            .filter(|l| {
                                !l.negated
                                    && !builtins.is_builtin(l.table(), Some(l.atom.arity()))
                                    && self.database.contains(&l.atom)
                            })
                            .map(|l| l.atom)
                            .collect()
                    })
                    .collect();
                facts.push((Atom::from_values(table, tuple.values), premises));
            }
        }

        let mut supported: HashSet<Atom> = HashSet::new();
        loop {
            let before = supported.len();
            for (atom, proofs) in &facts {
                if supported.contains(atom) {
                    continue;
                }
                if proofs
                    .iter()
                    .any(|premises| premises.iter().all(|p| supported.contains(p)))
                {
                    supported.insert(atom.clone());
                }
            }
            if supported.len() == before {
                break;
            }
        }
        facts
            .into_iter()
            .map(|(atom, _)| atom)
            .filter(|atom| !supported.contains(atom))
            .collect()
    }

    /// Group bindings by head instance and enqueue one event per instance.
    fn enqueue_heads(&mut self, rule: &Arc<Rule>, head: &Atom, bindings: Vec<Binding>, insert: bool) {
        let mut grouped: BTreeMap<Atom, ProofCollection> = BTreeMap::new();
        for binding in bindings {
            grouped
                .entry(head.plug(&binding))
                .or_default()
                .insert(Proof::new(Arc::clone(rule), &binding));
        }
        for (atom, proofs) in grouped {
            self.queue.push_back(Update::Fact(Event {
                atom,
                insert,
                proofs,
            }));
        }
    }

    /// Instances of `query` holding in this theory alone.
    pub fn select(&self, query: &Formula, builtins: &BuiltinRegistry) -> Vec<Formula> {
        TopDown::new(self, builtins).select(query, true)
    }


    /// Proof tree for a stored fact, or `None` if it is not stored.
    ///
    /// Each derived node is expanded through one of its proofs, preferring
    /// one whose body does not revisit a fact already being explained.
    pub fn explain(&self, atom: &Atom, builtins: &BuiltinRegistry) -> Option<ProofTree> {
        if !self.database.contains(atom) {
            return None;
        }
        let mut stack = vec![self.explain_frame(atom, &[])];
        loop {
            let next = stack.last_mut().and_then(|top| top.pending.pop());
            if let Some(literal) = next {
                let expandable = !literal.negated
                    && !builtins.is_builtin(literal.table(), Some(literal.atom.arity()))
                    && self.database.contains(&literal.atom)
                    && !stack.iter().any(|f| f.root.atom == literal.atom);
                if expandable {
                    let ancestors: Vec<&Atom> = stack.iter().map(|f| &f.root.atom).collect();
                    let frame = self.explain_frame(&literal.atom, &ancestors);
                    stack.push(frame);
                } else if let Some(top) = stack.last_mut() {
                    top.children.push(ProofTree::leaf(literal));
                }
                continue;
            }

            let frame = stack.pop()?;
            let tree = ProofTree {
                root: frame.root,
                rule: frame.rule,
                children: frame.children,
            };
            match stack.last_mut() {
                Some(parent) => parent.children.push(tree),
                None => return Some(tree),
            }
        }
    }

    fn explain_frame(&self, atom: &Atom, ancestors: &[&Atom]) -> ExplainFrame {
        let proofs = self.database.explain(atom);
        let revisits = |rule: &Rule| {
            rule.body.iter().any(|l| {
                !l.negated && (l.atom == *atom || ancestors.iter().any(|a| **a == l.atom))
            })
        };
        let instances: Vec<Rule> = proofs
            .iter()
            .filter(|p| !p.is_asserted())
            .map(|p| unalias(&p.instance()))
            .collect();
        let asserted = proofs.iter().any(Proof::is_asserted);
        let chosen = match instances.iter().position(|r| !revisits(r)) {
            Some(i) => instances.into_iter().nth(i),
            None if asserted => None,
            None => instances.into_iter().next(),
        };

        let mut frame = ExplainFrame {
            root: Literal::positive(atom.clone()),
            rule: None,
            pending: Vec::new(),
            children: Vec::new(),
        };
        if let Some(rule) = chosen {
            frame.pending = rule.body.iter().rev().cloned().collect();
            frame.rule = Some(rule);
        }
        frame
    }

    /// User-inserted rules and asserted facts, optionally restricted to
    /// `tables`.
    pub fn content(&self, tables: Option<&[&str]>) -> Vec<Formula> {
        let wanted = |table: &str| tables.is_none_or(|t| t.contains(&table));
        let mut content: Vec<Formula> = self
            .rules
            .keys()
            .filter(|r| wanted(r.table()))
            .map(|r| Formula::Rule(r.clone()))
            .collect();
        for table in self.database.tablenames().filter(|t| wanted(*t)) {
            for tuple in self.database.tuples(table) {
                if tuple.proofs.iter().any(Proof::is_asserted) {
                    content.push(Formula::Atom(Atom::from_values(table, tuple.values)));
                }
            }
        }
        content
    }

    /// User-inserted rules.
    pub fn policy(&self) -> impl Iterator<Item = &Rule> {
        self.rules.keys()
    }

    /// Tables holding facts or defined by a rule.
    pub fn defined_tablenames(&self) -> BTreeSet<&str> {
        self.database
            .tablenames()
            .chain(self.delta_rules.view_tables())
            .filter(|t| !is_alias(t))
            .collect()
    }

    /// Arity of `table`, if it is known to this theory.
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.database.arity(table).or_else(|| {
            self.rules
                .keys()
                .find(|r| r.table() == table)
                .map(|r| r.head.arity())
        })
    }

    /// Every stored fact of a rule-defined table.
    pub fn consequences(&self) -> Vec<Atom> {
        let views: Vec<&str> = self
            .delta_rules
            .view_tables()
            .filter(|t| !is_alias(t))
            .collect();
        let mut facts = self.database.content(Some(views.as_slice()));
        facts.sort();
        facts
    }

    /// Whether `formula` is an inserted rule or has a true instance.
    pub fn contains(&self, formula: &Formula, builtins: &BuiltinRegistry) -> bool {
        match formula {
            Formula::Rule(rule) => self.rules.contains_key(rule),
            Formula::Atom(atom) if atom.is_ground() => self.database.contains(atom),
            Formula::Atom(_) => !TopDown::new(self, builtins).select(formula, false).is_empty(),
        }
    }

    /// Replace the asserted facts of `tables` with `facts`.
    pub fn initialize_tables(
        &mut self,
        tables: &[&str],
        facts: &[Atom],
        builtins: &BuiltinRegistry,
    ) -> Result<(), DatalogError> {
        let mut changes: Vec<(Formula, bool)> = self
            .content(Some(tables))
            .into_iter()
            .filter(|f| f.is_atom())
            .map(|f| (f, false))
            .collect();
        changes.extend(facts.iter().map(|a| (Formula::Atom(a.clone()), true)));
        self.update(&changes, builtins)
    }
}

impl TopDownTheory for MaterializedTheory {
    fn name(&self) -> &str {
        &self.name
    }

    fn head_index(&self, table: &str) -> Vec<Candidate<'_>> {
        self.database.head_index(table)
    }

    fn includes(&self) -> &[String] {
        &self.includes
    }
}

struct ExplainFrame {
    root: Literal,
    rule: Option<Rule>,
    pending: Vec<Literal>,
    children: Vec<ProofTree>,
}

/// `rule` with self-join aliases replaced by the tables they stand for.
fn unalias(rule: &Rule) -> Rule {
    let body = rule
        .body
        .iter()
        .map(|l| match aliased_table(l.table()) {
            Some(table) => Literal {
                atom: Atom::new(table, l.atom.arguments.clone()),
                negated: l.negated,
            },
            None => l.clone(),
        })
        .collect();
    Rule::new(rule.head.clone(), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse, parse1};
    use pretty_assertions::assert_eq;

    struct Fixture {
        theory: MaterializedTheory,
        builtins: BuiltinRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                theory: MaterializedTheory::new("classification"),
                builtins: BuiltinRegistry::with_defaults(),
            }
        }

        fn insert(&mut self, text: &str) {
            for formula in parse(text).expect("parses") {
                self.theory
                    .insert(&formula, &self.builtins)
                    .expect("insert succeeds");
            }
        }

        fn delete(&mut self, text: &str) {
            for formula in parse(text).expect("parses") {
                self.theory
                    .delete(&formula, &self.builtins)
                    .expect("delete succeeds");
            }
        }

        fn select(&self, query: &str) -> Vec<String> {
            let query = parse1(query).expect("query parses");
            let mut answers: Vec<String> = self
                .theory
                .select(&query, &self.builtins)
                .iter()
                .map(ToString::to_string)
                .collect();
            answers.sort();
            answers
        }

        fn atom(text: &str) -> Atom {
            match parse1(text).expect("parses") {
                Formula::Atom(atom) => atom,
                other => panic!("expected an atom, got {other}"),
            }
        }
    }

    #[test]
    fn test_rule_with_builtin_tracks_deletions() {
        let mut f = Fixture::new();
        f.insert("p(x) :- q(x, y), plus(x, y, z), r(z)");
        f.insert("q(1, 2) q(2, 3) r(3) r(5)");
        assert_eq!(f.select("p(x)"), vec!["p(1)", "p(2)"]);

        f.delete("r(5)");
        assert_eq!(f.select("p(x)"), vec!["p(1)"]);
    }

    #[test]
    fn test_facts_before_rule() {
        let mut f = Fixture::new();
        f.insert("j(1, 2) j(3, 2)");
        f.insert("m(x) :- j(x, y), lt(x, y)");
        assert_eq!(f.select("m(x)"), vec!["m(1)"]);
    }

    #[test]
    fn test_negation_is_maintained() {
        let mut f = Fixture::new();
        f.insert("p(x) :- q(x), not r(x)");
        f.insert("q(1) q(2)");
        assert_eq!(f.select("p(x)"), vec!["p(1)", "p(2)"]);

        f.insert("r(2)");
        assert_eq!(f.select("p(x)"), vec!["p(1)"]);

        f.delete("r(2)");
        assert_eq!(f.select("p(x)"), vec!["p(1)", "p(2)"]);
    }

    #[test]
    fn test_fact_survives_until_every_justification_is_gone() {
        let mut f = Fixture::new();
        f.insert("p(x) :- q(x)  p(x) :- r(x)  q(1) r(1)");
        let p1 = Fixture::atom("p(1)");
        assert_eq!(f.theory.database().explain(&p1).len(), 2);

        f.delete("q(1)");
        assert_eq!(f.select("p(x)"), vec!["p(1)"]);

        f.delete("r(1)");
        assert!(f.select("p(x)").is_empty());
    }

    #[test]
    fn test_rule_retraction_restores_state() {
        let mut f = Fixture::new();
        f.insert("q(1, 2) q(2, 3) r(3)  s(x) :- r(x)");
        let database = f.theory.database().clone();
        let delta_rules = f.theory.delta_rules().clone();

        f.insert("p(x, z) :- q(x, y), q(y, z), not s(x)");
        f.insert("t(x) :- p(x, y)");
        assert_ne!(f.theory.database(), &database);

        f.delete("t(x) :- p(x, y)");
        f.delete("p(x, z) :- q(x, y), q(y, z), not s(x)");
        assert_eq!(f.theory.database(), &database);
        assert_eq!(f.theory.delta_rules(), &delta_rules);
    }

    #[test]
    fn test_self_join() {
        let mut f = Fixture::new();
        f.insert("p(x, z) :- q(x, y), q(y, z)");
        f.insert("q(1, 2) q(2, 3) q(3, 3)");
        assert_eq!(f.select("p(x, y)"), vec!["p(1, 3)", "p(2, 3)", "p(3, 3)"]);

        f.delete("q(3, 3)");
        assert_eq!(f.select("p(x, y)"), vec!["p(1, 3)"]);
        assert!(!f.theory.defined_tablenames().iter().any(|t| is_alias(t)));
    }

    #[test]
    fn test_shared_aliases_are_reference_counted() {
        let mut f = Fixture::new();
        f.insert("q(1, 2) q(2, 3)");
        f.insert("p(x, z) :- q(x, y), q(y, z)");
        f.insert("s(x) :- q(x, y), q(y, z)");
        f.delete("p(x, z) :- q(x, y), q(y, z)");
        assert_eq!(f.select("s(x)"), vec!["s(1)"]);
        assert!(f.select("p(x, y)").is_empty());

        f.insert("q(3, 4)");
        assert_eq!(f.select("s(x)"), vec!["s(1)", "s(2)"]);

        f.delete("s(x) :- q(x, y), q(y, z)");
        assert!(f.theory.delta_rules().is_empty());
        assert_eq!(f.theory.database().len(), 3);
    }

    #[test]
    fn test_recursive_rules_reach_fixpoint() {
        let mut f = Fixture::new();
        f.insert("path(x, y) :- edge(x, y)  path(x, z) :- edge(x, y), path(y, z)");
        f.insert("edge(1, 2) edge(2, 3)");
        assert_eq!(
            f.select("path(x, y)"),
            vec!["path(1, 2)", "path(1, 3)", "path(2, 3)"]
        );

        f.delete("edge(1, 2)");
        assert_eq!(f.select("path(x, y)"), vec!["path(2, 3)"]);
    }

    #[test]
    fn test_mutually_supporting_facts_are_pruned() {
        let mut f = Fixture::new();
        f.insert("path(x, y) :- edge(x, y)  path(x, z) :- path(x, y), path(y, z)");
        f.insert("edge(1, 2) edge(2, 1)");
        assert_eq!(
            f.select("path(x, y)"),
            vec!["path(1, 1)", "path(1, 2)", "path(2, 1)", "path(2, 2)"]
        );

        f.delete("edge(1, 2)");
        assert_eq!(f.select("path(x, y)"), vec!["path(2, 1)"]);

        f.delete("edge(2, 1)");
        assert!(f.select("path(x, y)").is_empty());
        assert!(f.theory.database().is_empty());
    }

    #[test]
    fn test_retracting_base_rule_prunes_cycle() {
        let mut f = Fixture::new();
        f.insert("edge(1, 2) edge(2, 1)");
        f.insert("path(x, y) :- edge(x, y)  path(x, z) :- path(x, y), path(y, z)");
        assert_eq!(f.select("path(1, y)"), vec!["path(1, 1)", "path(1, 2)"]);

        f.delete("path(x, y) :- edge(x, y)");
        assert!(f.select("path(x, y)").is_empty());
        assert_eq!(f.select("edge(x, y)"), vec!["edge(1, 2)", "edge(2, 1)"]);
    }

    #[test]
    fn test_bodyless_rule_is_stored_as_fact() {
        let mut f = Fixture::new();
        f.theory
            .insert(&Formula::Rule(Rule::fact(Fixture::atom("p(1)"))), &f.builtins)
            .expect("inserts");
        assert!(!f.theory.delta_rules().is_view("p"));
        assert!(f.theory.policy().next().is_none());

        f.insert("p(2)");
        f.delete("p(1)");
        assert_eq!(f.select("p(x)"), vec!["p(2)"]);

        f.theory
            .delete(&Formula::Rule(Rule::fact(Fixture::atom("p(2)"))), &f.builtins)
            .expect("deletes");
        assert!(f.select("p(x)").is_empty());
    }

    #[test]
    fn test_rejected_changes_leave_state_untouched() {
        let mut f = Fixture::new();
        f.insert("p(x) :- q(x)  q(1)");
        let before = f.theory.database().clone();

        let changes = vec![
            (parse1("q(2)").expect("parses"), true),
            (parse1("p(3)").expect("parses"), true),
        ];
        assert!(matches!(
            f.theory.update(&changes, &f.builtins),
            Err(DatalogError::DerivedTableWrite(_))
        ));
        assert!(matches!(
            f.theory.insert(&parse1("r(x) :- lt(x, 3)").expect("parses"), &f.builtins),
            Err(DatalogError::Safety(_))
        ));
        assert!(matches!(
            f.theory.insert(&parse1("q(x)").expect("parses"), &f.builtins),
            Err(DatalogError::NonGroundFact(_))
        ));
        assert_eq!(f.theory.database(), &before);
    }

    #[test]
    fn test_explain() {
        let mut f = Fixture::new();
        f.insert("p(x) :- q(x, y), plus(x, y, z), r(z)");
        f.insert("q(1, 2) r(3)");

        let tree = f
            .theory
            .explain(&Fixture::atom("p(1)"), &f.builtins)
            .expect("p(1) holds");
        assert_eq!(tree.to_string(), "p(1)\n  q(1, 2)\n  plus(1, 2, 3)\n  r(3)");
        assert_eq!(
            tree.rule.map(|r| r.to_string()),
            Some("p(1) :- q(1, 2), plus(1, 2, 3), r(3)".to_string())
        );
        assert!(f.theory.explain(&Fixture::atom("p(2)"), &f.builtins).is_none());
    }

    #[test]
    fn test_explain_terminates_on_cycles() {
        let mut f = Fixture::new();
        f.insert("path(x, y) :- edge(x, y)  path(x, z) :- path(x, y), path(y, z)");
        f.insert("edge(1, 2) edge(2, 1)");
        let tree = f
            .theory
            .explain(&Fixture::atom("path(1, 1)"), &f.builtins)
            .expect("path(1, 1) holds");
        assert!(tree.leaves().iter().all(|l| l.table() == "edge" || l.table() == "path"));
        assert!(!tree.children.is_empty());
    }

    #[test]
    fn test_introspection() {
        let mut f = Fixture::new();
        f.insert("p(x) :- q(x, y)  q(1, 2)");
        let content: Vec<String> = f.theory.content(None).iter().map(ToString::to_string).collect();
        assert_eq!(content, vec!["p(x) :- q(x, y)", "q(1, 2)"]);
        assert_eq!(f.theory.policy().count(), 1);
        assert_eq!(f.theory.defined_tablenames(), BTreeSet::from(["p", "q"]));
        assert_eq!(f.theory.arity("q"), Some(2));
        assert_eq!(f.theory.consequences(), vec![Fixture::atom("p(1)")]);
        assert!(f.theory.contains(&parse1("p(x)").expect("parses"), &f.builtins));
        assert!(!f.theory.contains(&parse1("p(2)").expect("parses"), &f.builtins));

        f.theory
            .initialize_tables(&["q"], &[Fixture::atom("q(5, 6)")], &f.builtins)
            .expect("initializes");
        assert_eq!(f.select("p(x)"), vec!["p(5)"]);
    }
}
