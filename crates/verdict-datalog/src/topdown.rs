//! Generic top-down (SLD) resolution.
//!
//! The search is written once against [`TopDownTheory`] and runs unchanged
//! over a bare [`Database`](crate::database::Database), over rule
//! collections, and over chains of theories joined by `includes`.
//!
//! Resolution uses an explicit work stack instead of host recursion:
//!
//! - pending goals form linked lists in an append-only arena, so the goal
//!   list in effect at a choice point is recovered by truncating the arena;
//! - every binding goes on a trail, undone down to the choice point's mark
//!   on backtrack;
//! - unifier contexts are allocated per resolution step and released the
//!   same way.
//!
//! Negation is evaluated as a nested first-answer search over the plugged,
//! necessarily ground, positive complement.
//!
//! In abduction mode, literals over a chosen set of tables are assumed rather
//! than proven and collected as the support of each answer.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{Level, debug, trace, warn};

use crate::builtin::{Builtin, BuiltinOutput, BuiltinRegistry};
use crate::database::DbTuple;
use crate::formula::{Atom, Binding, Formula, Literal, Rule, Term, Variable};
use crate::safety::reorder_for_safety;
use crate::unify::{Resolved, UnifierId, Undo, Unifiers, bi_unify_atoms, match_tuple};

/// Something a literal may be resolved against.
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// A stored fact.
    Tuple(DbTuple<'a>),
    /// A rule (or body-less fact) whose head may unify with the literal.
    Rule(&'a Rule),
}

/// A theory the top-down search can run over.
pub trait TopDownTheory {
    /// Name used to resolve `includes`.
    fn name(&self) -> &str;

    /// Every fact or rule that could prove a literal over `table`.
    fn head_index(&self, table: &str) -> Vec<Candidate<'_>>;

    /// Names of theories consulted, after this one, for every literal.
    fn includes(&self) -> &[String] {
        &[]
    }

    /// Literals left to prove once `candidate` has been unified.
    fn body<'a>(&self, candidate: &Candidate<'a>) -> &'a [Literal] {
        match candidate {
            Candidate::Tuple(_) => &[],
            Candidate::Rule(rule) => &rule.body,
        }
    }

    /// Unify `candidate` (in `candidate_ctx`) with `literal` (in `literal_ctx`).
    fn bi_unify(
        &self,
        candidate: &Candidate<'_>,
        candidate_ctx: UnifierId,
        literal: &Atom,
        literal_ctx: UnifierId,
        unifiers: &mut Unifiers,
    ) -> Option<Vec<Undo>> {
        match candidate {
            Candidate::Tuple(tuple) => match_tuple(tuple.values, literal, literal_ctx, unifiers),
            Candidate::Rule(rule) => {
                bi_unify_atoms(&rule.head, candidate_ctx, literal, literal_ctx, unifiers)
            }
        }
    }
}

/// Resolves theory names listed in `includes`.
pub trait TheoryLookup {
    /// The theory called `name`, if it exists.
    fn lookup(&self, name: &str) -> Option<&dyn TopDownTheory>;
}

/// Entry point for read-only evaluation against one theory.
#[derive(Clone, Copy)]
pub struct TopDown<'a> {
    theory: &'a dyn TopDownTheory,
    lookup: Option<&'a dyn TheoryLookup>,
    builtins: &'a BuiltinRegistry,
}

impl<'a> TopDown<'a> {
    /// Evaluate against `theory` alone.
    pub fn new(theory: &'a dyn TopDownTheory, builtins: &'a BuiltinRegistry) -> Self {
        Self {
            theory,
            lookup: None,
            builtins,
        }
    }

    /// Resolve `includes` through `lookup`.
    pub fn with_lookup(mut self, lookup: &'a dyn TheoryLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Instances of `query` that hold, without duplicates, in the order they
    /// were found.
    ///
    /// An atom query returns instances of itself; a rule query returns the
    /// instances of its head for which its body holds.
    pub fn select(&self, query: &Formula, find_all: bool) -> Vec<Formula> {
        let (template, literals) = self.query_goals(query);
        let variables = template.variables();
        let mut seen = HashSet::new();
        self.evaluate(&literals, &variables, find_all)
            .into_iter()
            .map(|binding| Formula::Atom(template.plug(&binding)))
            .filter(|f| seen.insert(f.clone()))
            .collect()
    }

    /// Rules whose heads are instances of `query` and whose bodies list the
    /// literals over `tables` that would have to hold for that instance.
    ///
    /// Literals over `tables` are assumed instead of proven, as are builtins
    /// reached with unbound inputs. Nothing is assumed while proving a
    /// negated literal. Variables left unbound are renamed apart.
    pub fn abduce(&self, query: &Formula, tables: &BTreeSet<String>, find_all: bool) -> Vec<Rule> {
        let (template, literals) = self.query_goals(query);
        let results = Search::new(self.lookup, self.builtins).abduce(
            self.theory,
            &literals,
            &template,
            tables,
            find_all,
        );
        debug!(query = %query, results = results.len(), "abduction");
        results
    }

    /// Output template and goals of a query.
    fn query_goals(&self, query: &Formula) -> (Atom, Vec<Literal>) {
        match query {
            Formula::Atom(atom) => (atom.clone(), vec![Literal::positive(atom.clone())]),
            Formula::Rule(rule) => {
                let ordered = reorder_for_safety(rule, self.builtins)
                    .map(|r| r.body)
                    .unwrap_or_else(|_| rule.body.clone());
                (rule.head.clone(), ordered)
            }
        }
    }

    /// Bindings of `variables` under which every literal holds.
    pub fn evaluate(
        &self,
        literals: &[Literal],
        variables: &BTreeSet<Variable>,
        find_all: bool,
    ) -> Vec<Binding> {
        self.evaluate_from(literals, &Binding::new(), variables, find_all)
    }

    /// Like [`evaluate`](Self::evaluate), starting from a partial binding.
    pub fn evaluate_from(
        &self,
        literals: &[Literal],
        seed: &Binding,
        variables: &BTreeSet<Variable>,
        find_all: bool,
    ) -> Vec<Binding> {
        Search::new(self.lookup, self.builtins).run(self.theory, literals, seed, variables, find_all)
    }

    /// Whether the literals hold under `seed`.
    pub fn exists(&self, literals: &[Literal], seed: &Binding) -> bool {
        !self
            .evaluate_from(literals, seed, &BTreeSet::new(), false)
            .is_empty()
    }
}

type GoalList = Option<usize>;

#[derive(Clone, Copy)]
struct Goal<'a> {
    literal: &'a Literal,
    context: UnifierId,
    theory: &'a dyn TopDownTheory,
    depth: usize,
    next: GoalList,
}

struct ChoicePoint<'a> {
    goal: usize,
    candidates: Vec<(Candidate<'a>, &'a dyn TopDownTheory)>,
    next: usize,
    trail_len: usize,
    goals_len: usize,
    contexts_len: usize,
    support_len: usize,
}

struct Search<'a> {
    lookup: Option<&'a dyn TheoryLookup>,
    builtins: &'a BuiltinRegistry,
    unifiers: Unifiers,
    goals: Vec<Goal<'a>>,
    choices: Vec<ChoicePoint<'a>>,
    trail: Vec<Undo>,
    /// Tables whose literals are assumed; `None` outside abduction.
    save: Option<&'a BTreeSet<String>>,
    support: Vec<(&'a Literal, UnifierId)>,
}

/// Names for variables that stay unbound in an abduction result, keeping
/// same-named variables of different contexts apart.
#[derive(Default)]
struct VariableNames {
    assigned: HashMap<(Variable, UnifierId), Variable>,
    taken: HashSet<Variable>,
}

impl VariableNames {
    fn plug(&mut self, unifiers: &Unifiers, atom: &Atom, context: UnifierId) -> Atom {
        let arguments = atom
            .arguments
            .iter()
            .map(|t| match unifiers.resolve(t, context) {
                Resolved::Constant(c) => Term::Constant(c),
                Resolved::Variable(v, ctx) => Term::Variable(self.name(v, ctx)),
            })
            .collect();
        Atom::new(atom.table.clone(), arguments)
    }

    fn name(&mut self, variable: Variable, context: UnifierId) -> Variable {
        if let Some(name) = self.assigned.get(&(variable.clone(), context)) {
            return name.clone();
        }
        let mut name = variable.clone();
        let mut suffix = 1;
        while self.taken.contains(&name) {
            name = Variable::new(format!("{variable}{suffix}"));
            suffix += 1;
        }
        self.taken.insert(name.clone());
        self.assigned.insert((variable, context), name.clone());
        name
    }
}

fn trace_port(port: &str, depth: usize, literal: &Literal, context: UnifierId, unifiers: &Unifiers) {
    if tracing::enabled!(Level::TRACE) {
        let plugged = unifiers.plug_atom(&literal.atom, context);
        let shown = if literal.negated {
            Literal::negative(plugged)
        } else {
            Literal::positive(plugged)
        };
        trace!(depth, port, literal = %shown);
    }
}

impl<'a> Search<'a> {
    fn new(lookup: Option<&'a dyn TheoryLookup>, builtins: &'a BuiltinRegistry) -> Self {
        Self {
            lookup,
            builtins,
            unifiers: Unifiers::new(),
            goals: Vec::new(),
            choices: Vec::new(),
            trail: Vec::new(),
            save: None,
            support: Vec::new(),
        }
    }

    fn run(
        mut self,
        theory: &'a dyn TopDownTheory,
        literals: &'a [Literal],
        seed: &Binding,
        variables: &BTreeSet<Variable>,
        find_all: bool,
    ) -> Vec<Binding> {
        let mut answers = Vec::new();
        let mut seen = HashSet::new();
        self.solve(theory, literals, seed, find_all, |search, root| {
            let binding = search.unifiers.binding(variables, root);
            if seen.insert(binding.clone()) {
                trace!(depth = 0, port = "Note", answer = ?binding);
                answers.push(binding);
            }
        });
        answers
    }

    fn abduce(
        mut self,
        theory: &'a dyn TopDownTheory,
        literals: &'a [Literal],
        head: &Atom,
        save: &'a BTreeSet<String>,
        find_all: bool,
    ) -> Vec<Rule> {
        self.save = Some(save);
        let mut results = Vec::new();
        let mut seen = HashSet::new();
        self.solve(theory, literals, &Binding::new(), find_all, |search, root| {
            let rule = search.support_rule(head, root);
            if seen.insert(rule.clone()) {
                trace!(depth = 0, port = "Note", answer = %rule);
                results.push(rule);
            }
        });
        results
    }

    /// Drive the search, calling `answer` with the root context each time
    /// every goal has been proven.
    fn solve(
        &mut self,
        theory: &'a dyn TopDownTheory,
        literals: &'a [Literal],
        seed: &Binding,
        find_all: bool,
        mut answer: impl FnMut(&Self, UnifierId),
    ) {
        let root = self.unifiers.from_binding(seed);
        let mut current = self.push_goals(literals, root, theory, 0, None);

        loop {
            let Some(index) = current else {
                answer(self, root);
                if !find_all {
                    return;
                }
                match self.backtrack() {
                    Some(next) => current = next,
                    None => return,
                }
                continue;
            };

            let goal = self.goals[index];
            trace_port("Call", goal.depth, goal.literal, goal.context, &self.unifiers);
            let step = self.step(index, goal);
            current = match step {
                Some(next) => next,
                None => match self.backtrack() {
                    Some(next) => next,
                    None => return,
                },
            };
        }
    }

    /// `head` plugged from `root`, with the saved literals as its body.
    fn support_rule(&self, head: &Atom, root: UnifierId) -> Rule {
        let mut names = VariableNames::default();
        let head = names.plug(&self.unifiers, head, root);
        let body = self
            .support
            .iter()
            .map(|(literal, context)| Literal {
                atom: names.plug(&self.unifiers, &literal.atom, *context),
                negated: literal.negated,
            })
            .collect();
        Rule::new(head, body)
    }

    fn assume(&mut self, goal: Goal<'a>) -> GoalList {
        trace_port("Save", goal.depth, goal.literal, goal.context, &self.unifiers);
        self.support.push((goal.literal, goal.context));
        goal.next
    }

    /// Push `literals` as a goal list continuing with `next`.
    fn push_goals(
        &mut self,
        literals: &'a [Literal],
        context: UnifierId,
        theory: &'a dyn TopDownTheory,
        depth: usize,
        next: GoalList,
    ) -> GoalList {
        let mut tail = next;
        for literal in literals.iter().rev() {
            self.goals.push(Goal {
                literal,
                context,
                theory,
                depth,
                next: tail,
            });
            tail = Some(self.goals.len() - 1);
        }
        tail
    }

    /// Prove the goal at `index`. Returns the goal list to continue with, or
    /// `None` if the goal failed.
    fn step(&mut self, index: usize, goal: Goal<'a>) -> Option<GoalList> {
        let literal = goal.literal;
        let atom = &literal.atom;

        if self.save.is_some_and(|save| save.contains(&atom.table)) {
            return Some(self.assume(goal));
        }

        if atom.arity() == 0 && (atom.table == "true" || atom.table == "false") {
            let holds = (atom.table == "true") != literal.negated;
            return holds.then_some(goal.next);
        }

        if literal.negated {
            return self.negation(goal).then_some(goal.next);
        }

        let builtins = self.builtins;
        if let Some(builtin) = builtins.lookup(&atom.table, atom.arity()) {
            if self.save.is_some() && !self.inputs_bound(builtin, goal) {
                return Some(self.assume(goal));
            }
            let holds = self.builtin(builtin, goal);
            if holds {
                trace_port("Exit", goal.depth, literal, goal.context, &self.unifiers);
            } else {
                trace_port("Fail", goal.depth, literal, goal.context, &self.unifiers);
            }
            return holds.then_some(goal.next);
        }

        let candidates = self.candidates(goal.theory, &atom.table);
        self.choices.push(ChoicePoint {
            goal: index,
            candidates,
            next: 0,
            trail_len: self.trail.len(),
            goals_len: self.goals.len(),
            contexts_len: self.unifiers.len(),
            support_len: self.support.len(),
        });
        self.resume()
    }

    fn negation(&mut self, goal: Goal<'a>) -> bool {
        let plugged = self.unifiers.plug_atom(&goal.literal.atom, goal.context);
        assert!(
            plugged.is_ground(),
            "negated literal `{}` reached evaluation with unbound variables",
            Literal::negative(plugged)
        );
        let positive = [Literal::positive(plugged)];
        let proven = !Search::new(self.lookup, self.builtins)
            .run(goal.theory, &positive, &Binding::new(), &BTreeSet::new(), false)
            .is_empty();
        let port = if proven { "Fail" } else { "Exit" };
        trace_port(port, goal.depth, goal.literal, goal.context, &self.unifiers);
        !proven
    }

    fn inputs_bound(&self, builtin: &Builtin, goal: Goal<'a>) -> bool {
        goal.literal.atom.arguments[..builtin.num_inputs()]
            .iter()
            .all(|term| self.unifiers.value(term, goal.context).is_some())
    }

    fn builtin(&mut self, builtin: &Builtin, goal: Goal<'a>) -> bool {
        let arguments = &goal.literal.atom.arguments;
        let (inputs, outputs) = arguments.split_at(builtin.num_inputs());
        let mut values = Vec::with_capacity(inputs.len());
        for term in inputs {
            match self.unifiers.value(term, goal.context) {
                Some(value) => values.push(value),
                None => {
                    warn!(literal = %goal.literal, "builtin input is unbound");
                    return false;
                }
            }
        }
        match builtin.call(&values) {
            Ok(BuiltinOutput::Truth(truth)) => truth,
            Ok(BuiltinOutput::Values(results)) => outputs.iter().zip(&results).all(|(term, value)| {
                self.unifiers
                    .unify_constant(term, goal.context, value, &mut self.trail)
            }),
            Err(error) => {
                trace!(depth = goal.depth, builtin = builtin.name(), %error, "builtin rejected inputs");
                false
            }
        }
    }

    /// Candidates from `theory` followed by those of its includes, visited
    /// depth-first; each theory is consulted at most once.
    fn candidates(
        &self,
        theory: &'a dyn TopDownTheory,
        table: &str,
    ) -> Vec<(Candidate<'a>, &'a dyn TopDownTheory)> {
        let mut found = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([theory.name()]);
        let mut stack = vec![theory];
        while let Some(current) = stack.pop() {
            found.extend(current.head_index(table).into_iter().map(|c| (c, current)));
            let Some(lookup) = self.lookup else {
                continue;
            };
            for name in current.includes().iter().rev() {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                match lookup.lookup(name) {
                    Some(included) => stack.push(included),
                    None => warn!(theory = current.name(), include = %name, "unknown included theory"),
                }
            }
        }
        found
    }

    /// Restore the topmost choice point and try its next candidate, popping
    /// exhausted choice points.
    fn backtrack(&mut self) -> Option<GoalList> {
        while !self.choices.is_empty() {
            if let Some(next) = self.resume() {
                return Some(next);
            }
        }
        None
    }

    /// Try the remaining candidates of the topmost choice point. Pops it and
    /// returns `None` once every candidate has failed.
    fn resume(&mut self) -> Option<GoalList> {
        let cp = self.choices.last_mut()?;
        let (goal_index, trail_len, goals_len, contexts_len, support_len) = (
            cp.goal,
            cp.trail_len,
            cp.goals_len,
            cp.contexts_len,
            cp.support_len,
        );

        let undone = self.trail.split_off(trail_len);
        self.unifiers.undo_all(&undone);
        self.goals.truncate(goals_len);
        self.unifiers.truncate(contexts_len);
        self.support.truncate(support_len);

        let goal = self.goals[goal_index];
        if self.choices.last().is_some_and(|cp| cp.next > 0) {
            trace_port("Redo", goal.depth, goal.literal, goal.context, &self.unifiers);
        }

        loop {
            let cp = self.choices.last_mut()?;
            let Some(&(candidate, owner)) = cp.candidates.get(cp.next) else {
                self.choices.pop();
                trace_port("Fail", goal.depth, goal.literal, goal.context, &self.unifiers);
                return None;
            };
            cp.next += 1;

            let context = self.unifiers.fresh();
            let unified = owner.bi_unify(
                &candidate,
                context,
                &goal.literal.atom,
                goal.context,
                &mut self.unifiers,
            );
            let Some(changes) = unified else {
                self.unifiers.truncate(contexts_len);
                continue;
            };
            self.trail.extend(changes);

            let body = owner.body(&candidate);
            if body.is_empty() {
                trace_port("Exit", goal.depth, goal.literal, goal.context, &self.unifiers);
            }
            return Some(self.push_goals(body, context, owner, goal.depth + 1, goal.next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::parse::parse;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use test_case::test_case;

    /// Facts and rules kept as one list, for exercising the search directly.
    struct RuleSet {
        name: String,
        rules: Vec<Rule>,
        includes: Vec<String>,
    }

    impl RuleSet {
        fn new(name: &str, text: &str) -> Self {
            Self {
                name: name.to_string(),
                rules: parse(text)
                    .expect("parses")
                    .into_iter()
                    .map(Formula::into_rule)
                    .collect(),
                includes: Vec::new(),
            }
        }
    }

    impl TopDownTheory for RuleSet {
        fn name(&self) -> &str {
            &self.name
        }

        fn head_index(&self, table: &str) -> Vec<Candidate<'_>> {
            self.rules
                .iter()
                .filter(|r| r.table() == table)
                .map(Candidate::Rule)
                .collect()
        }

        fn includes(&self) -> &[String] {
            &self.includes
        }
    }

    struct Theories(HashMap<String, RuleSet>);

    impl TheoryLookup for Theories {
        fn lookup(&self, name: &str) -> Option<&dyn TopDownTheory> {
            self.0.get(name).map(|t| t as &dyn TopDownTheory)
        }
    }

    fn select(theory: &dyn TopDownTheory, query: &str) -> Vec<String> {
        let builtins = BuiltinRegistry::with_defaults();
        let query = crate::parse::parse1(query).expect("query parses");
        let mut answers: Vec<String> = TopDown::new(theory, &builtins)
            .select(&query, true)
            .iter()
            .map(ToString::to_string)
            .collect();
        answers.sort();
        answers
    }

    #[test]
    fn test_rules_with_builtins() {
        let theory = RuleSet::new(
            "test",
            "p(x) :- q(x, y), plus(x, y, z), r(z)
             q(1, 2) q(2, 3) r(3) r(5)",
        );
        assert_eq!(select(&theory, "p(x)"), vec!["p(1)", "p(2)"]);
        assert_eq!(select(&theory, "p(2)"), vec!["p(2)"]);
        assert!(select(&theory, "p(3)").is_empty());
    }

    #[test]
    fn test_comparison_filters_answers() {
        let theory = RuleSet::new("test", "m(x) :- j(x, y), lt(x, y)  j(1, 2) j(3, 2)");
        assert_eq!(select(&theory, "m(x)"), vec!["m(1)"]);
    }

    #[test]
    fn test_negation() {
        let theory = RuleSet::new(
            "test",
            "p(x) :- q(x), not r(x)
             s(x) :- r(x)
             t(x) :- q(x), not s(x)
             q(1) q(2) q(3) r(2)",
        );
        assert_eq!(select(&theory, "p(x)"), vec!["p(1)", "p(3)"]);
        assert_eq!(select(&theory, "t(x)"), vec!["t(1)", "t(3)"]);
    }

    #[test]
    fn test_repeated_variables_and_constants() {
        let theory = RuleSet::new(
            "test",
            "p(x) :- q(x, x)  r(x, y) :- q(x, y), q(y, 1)
             q(1, 1) q(2, 1) q(2, 3)",
        );
        assert_eq!(select(&theory, "p(x)"), vec!["p(1)"]);
        assert_eq!(select(&theory, "r(x, y)"), vec!["r(1, 1)", "r(2, 1)"]);
    }

    #[test]
    fn test_true_and_false_pseudo_tables() {
        let theory = RuleSet::new(
            "test",
            "p(x) :- q(x), true()  r(x) :- q(x), false()  s(x) :- q(x), not false()  q(1)",
        );
        assert_eq!(select(&theory, "p(x)"), vec!["p(1)"]);
        assert!(select(&theory, "r(x)").is_empty());
        assert_eq!(select(&theory, "s(x)"), vec!["s(1)"]);
    }

    #[test]
    fn test_rule_query_returns_head_instances() {
        let theory = RuleSet::new("test", "q(1, 2) q(2, 3)");
        assert_eq!(
            select(&theory, "ans(y) :- plus(x, 1, y), q(x, w)"),
            vec!["ans(2)", "ans(3)"]
        );
    }

    #[test]
    fn test_includes_are_consulted_and_bodies_use_their_owner() {
        let classification = RuleSet::new("classification", "p(x) :- q(x)  q(1) q(2)");
        let mut service = RuleSet::new("service", "s(x) :- p(x), not q(x)  q(3)  p(3)");
        service.includes = vec!["classification".to_string()];
        let theories = Theories(HashMap::from([
            ("classification".to_string(), classification),
            ("service".to_string(), service),
        ]));

        let builtins = BuiltinRegistry::with_defaults();
        let service = theories.lookup("service").expect("exists");
        let query = crate::parse::parse1("p(x)").expect("parses");
        let mut answers: Vec<String> = TopDown::new(service, &builtins)
            .with_lookup(&theories)
            .select(&query, true)
            .iter()
            .map(ToString::to_string)
            .collect();
        answers.sort();
        assert_eq!(answers, vec!["p(1)", "p(2)", "p(3)"]);

        // Every p(x) has a matching q(x) in service or classification.
        let query = crate::parse::parse1("s(x)").expect("parses");
        let answers = TopDown::new(service, &builtins)
            .with_lookup(&theories)
            .select(&query, true);
        assert!(answers.is_empty());
    }

    #[test]
    fn test_first_answer_only() {
        let theory = RuleSet::new("test", "q(1) q(2) q(3)");
        let builtins = BuiltinRegistry::with_defaults();
        let query = crate::parse::parse1("q(x)").expect("parses");
        assert_eq!(TopDown::new(&theory, &builtins).select(&query, false).len(), 1);
    }

    #[test]
    fn test_evaluates_over_a_database() {
        let mut db = Database::new("db");
        for formula in parse("q(1, 2) q(2, 3) r(3)").expect("parses") {
            let Formula::Atom(atom) = formula else { continue };
            db.insert_fact(&atom).expect("ground");
        }
        assert_eq!(select(&db, "q(x, y)"), vec!["q(1, 2)", "q(2, 3)"]);
        assert_eq!(select(&db, "ans(x) :- q(x, y), r(y)"), vec!["ans(2)"]);
    }

    #[test]
    fn test_empty_body_has_one_answer() {
        let db = Database::new("db");
        let builtins = BuiltinRegistry::with_defaults();
        let answers = TopDown::new(&db, &builtins).evaluate(&[], &BTreeSet::new(), true);
        assert_eq!(answers, vec![Binding::new()]);
    }

    #[test]
    fn test_seeded_evaluation() {
        let theory = RuleSet::new("test", "q(1, 2) q(2, 3)");
        let builtins = BuiltinRegistry::with_defaults();
        let Formula::Rule(rule) = crate::parse::parse1("h(x, y) :- q(x, y)").expect("parses") else {
            panic!("expected a rule");
        };
        let mut seed = Binding::new();
        seed.insert(Variable::new("x"), crate::formula::Constant::Int(2));
        let answers =
            TopDown::new(&theory, &builtins).evaluate_from(&rule.body, &seed, &rule.variables(), true);
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].get(&Variable::new("y")),
            Some(&crate::formula::Constant::Int(3))
        );
    }

    fn abduce(theory: &dyn TopDownTheory, query: &str, tables: &[&str], find_all: bool) -> Vec<String> {
        let builtins = BuiltinRegistry::with_defaults();
        let query = crate::parse::parse1(query).expect("query parses");
        let tables: BTreeSet<String> = tables.iter().map(|t| t.to_string()).collect();
        let mut results: Vec<String> = TopDown::new(theory, &builtins)
            .abduce(&query, &tables, find_all)
            .iter()
            .map(ToString::to_string)
            .collect();
        results.sort();
        results
    }

    #[test_case(
        "p(x) :- q(x), r(x)  q(1) q(2)", "p(x)", &["r"],
        &["p(1) :- r(1)", "p(2) :- r(2)"];
        "assumed after binding"
    )]
    #[test_case(
        "p(x) :- q(x), r(x)  r(1) r(2)", "p(x)", &["q"],
        &["p(1) :- q(1)", "p(2) :- q(2)"];
        "bound by a later literal"
    )]
    #[test_case("p(x) :- q(x)", "p(x)", &["q"], &["p(x) :- q(x)"]; "never bound")]
    #[test_case(
        "p(x) :- q(x), r(x)  q(x) :- s(x)  r(1) r(2)", "p(x)", &["s"],
        &["p(1) :- s(1)", "p(2) :- s(2)"];
        "through an intermediate table"
    )]
    #[test_case(
        "p(x) :- q(x), r(x)  q(x) :- s(x)  q(x) :- t(x)  r(1) r(2)", "p(x)", &["s", "t"],
        &["p(1) :- s(1)", "p(1) :- t(1)", "p(2) :- s(2)", "p(2) :- t(2)"];
        "disjunctive intermediate table"
    )]
    #[test_case(
        "p(x) :- q(x), r(x)  q(x) :- s(x)  q(x) :- t(x)  r(1) r(2)", "p(x)", &["s"],
        &["p(1) :- s(1)", "p(2) :- s(2)"];
        "only some branches assumable"
    )]
    #[test_case(
        "p(x) :- q(x), u(x), r(x)  q(x) :- s(x)  q(x) :- t(x)  u(1) u(2)", "p(x)", &["s", "t", "r"],
        &["p(1) :- s(1), r(1)", "p(1) :- t(1), r(1)", "p(2) :- s(2), r(2)", "p(2) :- t(2), r(2)"];
        "several assumed literals"
    )]
    #[test_case(
        "p(x) :- q(x, y), s(x), r(y, z)  r(2, 3) r(2, 4)  s(1) s(2)", "p(x)", &["q"],
        &["p(1) :- q(1, 2)", "p(2) :- q(2, 2)"];
        "existential variable becomes ground"
    )]
    #[test_case(
        "p(x) :- q(x, y), r(y, z)  r(2, 3) r(2, 4)", "p(x)", &["q"],
        &["p(x) :- q(x, 2)"];
        "head variable stays open"
    )]
    #[test_case(
        "p+(x) :- q(x), r(z)  r(z) :- s(z), q(x)  s(1)", "p+(x)", &["q"],
        &["p+(x) :- q(x), q(x1)"];
        "same name in different rules"
    )]
    #[test_case(
        "p(x) :- q(x, y), plus(y, 1, z), r(z)  r(3)", "p(x)", &["q"],
        &["p(x) :- q(x, y), plus(y, 1, 3)"];
        "builtin with unbound input"
    )]
    #[test_case(
        "p(x) :- q(x), not r(x)  r(x) :- s(x)  q(1) q(2) s(2)", "p(x)", &["s"],
        &["p(1)"];
        "nothing assumed under negation"
    )]
    fn test_abduction(text: &str, query: &str, tables: &[&str], expected: &[&str]) {
        let theory = RuleSet::new("test", text);
        assert_eq!(abduce(&theory, query, tables, true), expected);
    }

    #[test]
    fn test_abduction_first_answer_and_rule_query() {
        let theory = RuleSet::new("test", "p(x) :- q(x), r(x)  q(1) q(2)");
        assert_eq!(abduce(&theory, "p(x)", &["r"], false).len(), 1);
        assert_eq!(
            abduce(&theory, "ans(x) :- p(x), lt(x, 2)", &["r"], true),
            vec!["ans(1) :- r(1)"]
        );
        assert!(abduce(&theory, "p(x)", &["missing"], true).is_empty());
    }
}
