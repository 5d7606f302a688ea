//! Named policies and dispatch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, trace};
use verdict_datalog::{
    Atom, BuiltinRegistry, Constant, Database, DatalogError, Formula, Literal, MaterializedTheory,
    NonrecursiveTheory, ProofTree, Rule, Term, TheoryLookup, TopDown, TopDownTheory, parse, parse1,
};

use crate::config::{PolicyKind, RuntimeConfig};
use crate::error::RuntimeError;
use crate::trigger::{TableChange, TriggerId, TriggerRegistry};

/// Policy holding action invocations while a sequence is simulated.
const SCRATCH_POLICY: &str = "__simulation";

/// Anything that denotes a single statement.
pub trait ToFormula {
    fn to_formula(&self) -> Result<Formula, DatalogError>;
}

impl ToFormula for str {
    fn to_formula(&self) -> Result<Formula, DatalogError> {
        parse1(self)
    }
}

impl ToFormula for String {
    fn to_formula(&self) -> Result<Formula, DatalogError> {
        parse1(self)
    }
}

impl ToFormula for Formula {
    fn to_formula(&self) -> Result<Formula, DatalogError> {
        Ok(self.clone())
    }
}

impl ToFormula for Atom {
    fn to_formula(&self) -> Result<Formula, DatalogError> {
        Ok(Formula::Atom(self.clone()))
    }
}

impl ToFormula for Rule {
    fn to_formula(&self) -> Result<Formula, DatalogError> {
        Ok(Formula::from(self.clone()))
    }
}

/// One named theory.
#[derive(Debug, Clone)]
pub enum Policy {
    Materialized(MaterializedTheory),
    Nonrecursive(NonrecursiveTheory),
    Database(Database),
}

impl Policy {
    /// An empty policy.
    pub fn new(name: &str, kind: PolicyKind, includes: Vec<String>) -> Self {
        match kind {
            PolicyKind::Materialized => {
                Self::Materialized(MaterializedTheory::new(name).with_includes(includes))
            }
            PolicyKind::Nonrecursive => {
                Self::Nonrecursive(NonrecursiveTheory::new(name).with_includes(includes))
            }
            PolicyKind::Database => Self::Database(Database::new(name)),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Materialized(_) => PolicyKind::Materialized,
            Self::Nonrecursive(_) => PolicyKind::Nonrecursive,
            Self::Database(_) => PolicyKind::Database,
        }
    }

    /// The policy as seen by the evaluator.
    pub fn theory(&self) -> &dyn TopDownTheory {
        match self {
            Self::Materialized(theory) => theory,
            Self::Nonrecursive(theory) => theory,
            Self::Database(database) => database,
        }
    }

    fn update(
        &mut self,
        changes: &[(Formula, bool)],
        builtins: &BuiltinRegistry,
    ) -> Result<(), RuntimeError> {
        match self {
            Self::Materialized(theory) => theory.update(changes, builtins)?,
            Self::Nonrecursive(theory) => theory.update(changes, builtins)?,
            Self::Database(database) => {
                let mut facts = Vec::with_capacity(changes.len());
                for (formula, insert) in changes {
                    let Formula::Atom(atom) = formula else {
                        return Err(RuntimeError::RulesNotSupported(database.name().to_string()));
                    };
                    if !atom.is_ground() {
                        return Err(DatalogError::NonGroundFact(atom.to_string()).into());
                    }
                    facts.push((atom, *insert));
                }
                for (atom, insert) in facts {
                    if insert {
                        database.insert_fact(atom)?;
                    } else {
                        database.delete_fact(atom)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stored facts and rules, optionally restricted to `tables`.
    pub fn content(&self, tables: Option<&[&str]>) -> Vec<Formula> {
        match self {
            Self::Materialized(theory) => theory.content(tables),
            Self::Nonrecursive(theory) => theory.content(tables),
            Self::Database(database) => database
                .content(tables)
                .into_iter()
                .map(Formula::Atom)
                .collect(),
        }
    }

    /// Inserted rules.
    pub fn rules(&self) -> Vec<Rule> {
        match self {
            Self::Materialized(theory) => theory.policy().cloned().collect(),
            Self::Nonrecursive(theory) => theory.policy().cloned().collect(),
            Self::Database(_) => Vec::new(),
        }
    }

    /// Tables with content or defined by a rule.
    pub fn defined_tablenames(&self) -> BTreeSet<String> {
        let names: BTreeSet<&str> = match self {
            Self::Materialized(theory) => theory.defined_tablenames(),
            Self::Nonrecursive(theory) => theory.defined_tablenames(),
            Self::Database(database) => database.tablenames().collect(),
        };
        names.into_iter().map(str::to_string).collect()
    }

    pub fn arity(&self, table: &str) -> Option<usize> {
        match self {
            Self::Materialized(theory) => theory.arity(table),
            Self::Nonrecursive(theory) => theory.arity(table),
            Self::Database(database) => database.arity(table),
        }
    }
}

/// Named policies wired together through `includes`.
///
/// Operations name their target policy; `None` selects the configured
/// default target.
#[derive(Debug)]
pub struct Runtime {
    policies: BTreeMap<String, Policy>,
    builtins: BuiltinRegistry,
    default_target: String,
    triggers: TriggerRegistry,
}

impl Default for Runtime {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        let mut policies = BTreeMap::new();
        for policy in config.policies {
            let theory = Policy::new(&policy.name, policy.kind, policy.includes);
            policies.insert(policy.name, theory);
        }
        Self {
            policies,
            builtins: BuiltinRegistry::with_defaults(),
            default_target: config.default_target,
            triggers: TriggerRegistry::new(),
        }
    }
}

impl Runtime {
    /// The `classification`, `service` and `action` policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policies declared by `config`.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let mut runtime = Self {
            policies: BTreeMap::new(),
            builtins: BuiltinRegistry::with_defaults(),
            default_target: config.default_target.clone(),
            triggers: TriggerRegistry::new(),
        };
        for policy in &config.policies {
            runtime
                .policies
                .insert(policy.name.clone(), Policy::new(&policy.name, policy.kind, policy.includes.clone()));
        }
        info!(policies = runtime.policies.len(), default_target = %runtime.default_target, "runtime ready");
        Ok(runtime)
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    /// Mutable access to the builtin registry, for registering builtins.
    pub fn builtins_mut(&mut self) -> &mut BuiltinRegistry {
        &mut self.builtins
    }

    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    /// Create an empty policy.
    pub fn create_policy(
        &mut self,
        name: &str,
        kind: PolicyKind,
        includes: &[&str],
    ) -> Result<(), RuntimeError> {
        if self.policies.contains_key(name) {
            return Err(RuntimeError::PolicyExists(name.to_string()));
        }
        if let Some(missing) = includes.iter().find(|i| !self.policies.contains_key(**i)) {
            return Err(RuntimeError::UnknownTarget(missing.to_string()));
        }
        info!(policy = name, ?kind, "create policy");
        let includes = includes.iter().map(|s| s.to_string()).collect();
        self.policies
            .insert(name.to_string(), Policy::new(name, kind, includes));
        self.triggers.reindex(&self.policies);
        Ok(())
    }

    /// Remove a policy, returning it.
    pub fn delete_policy(&mut self, name: &str) -> Result<Policy, RuntimeError> {
        let policy = self
            .policies
            .remove(name)
            .ok_or_else(|| RuntimeError::UnknownTarget(name.to_string()))?;
        info!(policy = name, "delete policy");
        self.triggers.reindex(&self.policies);
        Ok(policy)
    }

    pub fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// The policy called `target`, or the default target.
    pub fn policy(&self, target: Option<&str>) -> Result<&Policy, RuntimeError> {
        let target = target.unwrap_or(&self.default_target);
        self.policies
            .get(target)
            .ok_or_else(|| RuntimeError::UnknownTarget(target.to_string()))
    }

    pub(crate) fn policies(&self) -> &BTreeMap<String, Policy> {
        &self.policies
    }

    /// Name of `target`, or of the default target, if it exists.
    fn policy_name(&self, target: Option<&str>) -> Result<String, RuntimeError> {
        let target = target.unwrap_or(&self.default_target);
        if self.policies.contains_key(target) {
            Ok(target.to_string())
        } else {
            Err(RuntimeError::UnknownTarget(target.to_string()))
        }
    }

    /// Every instance of `query` that holds in `target`, rendered and
    /// sorted.
    pub fn select(
        &self,
        query: &(impl ToFormula + ?Sized),
        target: Option<&str>,
    ) -> Result<Vec<String>, RuntimeError> {
        let query = query.to_formula()?;
        let answers: BTreeSet<String> = self
            .answers(&query, target)?
            .iter()
            .map(ToString::to_string)
            .collect();
        debug!(query = %query, answers = answers.len(), "select");
        Ok(answers.into_iter().collect())
    }

    fn answers(&self, query: &Formula, target: Option<&str>) -> Result<BTreeSet<Formula>, RuntimeError> {
        let policy = self.policy(target)?;
        Ok(TopDown::new(policy.theory(), &self.builtins)
            .with_lookup(self)
            .select(query, true)
            .into_iter()
            .collect())
    }

    /// Insert a fact or rule into `target`.
    pub fn insert(
        &mut self,
        formula: &(impl ToFormula + ?Sized),
        target: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let formula = formula.to_formula()?;
        self.update(&[(formula, true)], target)
    }

    /// Delete a fact or rule from `target`.
    pub fn delete(
        &mut self,
        formula: &(impl ToFormula + ?Sized),
        target: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let formula = formula.to_formula()?;
        self.update(&[(formula, false)], target)
    }

    /// Apply a batch of insertions (`true`) and deletions (`false`) to
    /// `target`; on error nothing changes.
    pub fn update(
        &mut self,
        changes: &[(Formula, bool)],
        target: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let target = self.policy_name(target)?;
        let tables: BTreeSet<&str> = changes.iter().map(|(f, _)| f.table()).collect();
        let rules_changed = changes.iter().any(|(f, _)| !f.is_atom());
        self.notify(&target, tables, rules_changed, |runtime| {
            let policy = target_mut(&mut runtime.policies, &runtime.default_target, Some(target.as_str()))?;
            policy.update(changes, &runtime.builtins)
        })
    }

    /// Run `apply` against `target`, then fire the triggers whose watched
    /// tables it changed.
    fn notify<'t>(
        &mut self,
        target: &str,
        tables: impl IntoIterator<Item = &'t str>,
        rules_changed: bool,
        apply: impl FnOnce(&mut Self) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let watched = self.triggers.watching(target, tables);
        let before: Vec<BTreeSet<Atom>> = watched
            .iter()
            .map(|(policy, table)| self.table_contents(policy, table))
            .collect();

        apply(self)?;
        if rules_changed {
            self.triggers.reindex(&self.policies);
        }

        for ((policy, table), before) in watched.into_iter().zip(before) {
            let after = self.table_contents(&policy, &table);
            if before != after {
                self.triggers.fire(&TableChange {
                    policy,
                    table,
                    before,
                    after,
                });
            }
        }
        Ok(())
    }

    /// Every fact of `table` visible from `policy`.
    fn table_contents(&self, policy: &str, table: &str) -> BTreeSet<Atom> {
        let (Some(theory), Some(arity)) = (self.policies.get(policy), self.visible_arity(policy, table))
        else {
            return BTreeSet::new();
        };
        let query = Atom::new(table, (0..arity).map(|i| Term::var(format!("x{i}"))).collect());
        TopDown::new(theory.theory(), &self.builtins)
            .with_lookup(self)
            .select(&Formula::Atom(query), true)
            .into_iter()
            .filter_map(|f| match f {
                Formula::Atom(atom) => Some(atom),
                Formula::Rule(_) => None,
            })
            .collect()
    }

    /// Arity of `table` in `policy` or in a policy it includes.
    fn visible_arity(&self, policy: &str, table: &str) -> Option<usize> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![policy];
        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(candidate) = self.policies.get(name) else {
                continue;
            };
            if let Some(arity) = candidate.arity(table) {
                return Some(arity);
            }
            pending.extend(candidate.theory().includes().iter().map(String::as_str));
        }
        None
    }

    /// Watch `table` of `target`. `callback` runs after every update that
    /// changes the table's contents, directly or through rules and includes.
    pub fn register_trigger(
        &mut self,
        table: &str,
        target: Option<&str>,
        callback: impl Fn(&TableChange) + Send + Sync + 'static,
    ) -> Result<TriggerId, RuntimeError> {
        let target = self.policy_name(target)?;
        Ok(self
            .triggers
            .register(&target, table, Arc::new(callback), &self.policies))
    }

    /// Remove a trigger. Returns whether it was registered.
    pub fn unregister_trigger(&mut self, id: TriggerId) -> bool {
        self.triggers.unregister(id)
    }

    /// Insert every statement of `text` into `target` as one batch.
    pub fn load(&mut self, text: &str, target: Option<&str>) -> Result<(), RuntimeError> {
        let changes: Vec<(Formula, bool)> = parse(text)?.into_iter().map(|f| (f, true)).collect();
        self.update(&changes, target)
    }

    /// Proof tree for `atom` in `target`.
    ///
    /// Materialized policies explain through the stored proofs. Elsewhere a
    /// ground atom that holds explains to a single node.
    pub fn explain(
        &self,
        atom: &(impl ToFormula + ?Sized),
        target: Option<&str>,
    ) -> Result<Option<ProofTree>, RuntimeError> {
        let policy = self.policy(target)?;
        let atom = match atom.to_formula()? {
            Formula::Atom(atom) if atom.is_ground() => atom,
            other => return Err(DatalogError::NonGroundFact(other.to_string()).into()),
        };
        let tree = match policy {
            Policy::Materialized(theory) => theory.explain(&atom, &self.builtins),
            Policy::Database(database) => database
                .contains(&atom)
                .then(|| ProofTree::leaf(Literal::positive(atom))),
            Policy::Nonrecursive(_) => {
                let holds = TopDown::new(policy.theory(), &self.builtins)
                    .with_lookup(self)
                    .exists(&[Literal::positive(atom.clone())], &Default::default());
                holds.then(|| ProofTree::leaf(Literal::positive(atom)))
            }
        };
        Ok(tree)
    }

    /// Replace the content of `tables` in `target` with `facts`.
    pub fn initialize_tables(
        &mut self,
        tables: &[&str],
        facts: &[Atom],
        target: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let target = self.policy_name(target)?;
        self.notify(&target, tables.iter().copied(), true, |runtime| {
            match target_mut(&mut runtime.policies, &runtime.default_target, Some(target.as_str()))? {
                Policy::Materialized(theory) => {
                    theory.initialize_tables(tables, facts, &runtime.builtins)?
                }
                Policy::Nonrecursive(theory) => theory.initialize_tables(tables, facts)?,
                Policy::Database(database) => {
                    if let Some(atom) = facts.iter().find(|a| !a.is_ground()) {
                        return Err(DatalogError::NonGroundFact(atom.to_string()).into());
                    }
                    for table in tables {
                        database.clear_table(table);
                    }
                    for atom in facts {
                        database.insert_fact(atom)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Stored facts and rules of `target`, optionally restricted to `tables`.
    pub fn content(
        &self,
        tables: Option<&[&str]>,
        target: Option<&str>,
    ) -> Result<Vec<Formula>, RuntimeError> {
        Ok(self.policy(target)?.content(tables))
    }

    /// Every true instance of every rule-defined table of `target`.
    pub fn consequences(&self, target: Option<&str>) -> Result<Vec<Atom>, RuntimeError> {
        let consequences = match self.policy(target)? {
            Policy::Materialized(theory) => theory.consequences(),
            Policy::Nonrecursive(theory) => theory.consequences(&self.builtins, Some(self)),
            Policy::Database(_) => Vec::new(),
        };
        Ok(consequences)
    }

    /// Names listed by `action(name)` in `action_target`.
    fn action_names(&self, action_target: &str) -> Result<BTreeSet<String>, RuntimeError> {
        let query = Formula::Atom(Atom::new("action", vec![Term::var("x")]));
        let names = self
            .answers(&query, Some(action_target))?
            .into_iter()
            .filter_map(|f| match f {
                Formula::Atom(atom) => atom.arguments.into_iter().next(),
                Formula::Rule(_) => None,
            })
            .filter_map(|term| match term {
                Term::Constant(Constant::String(name)) => Some(name),
                Term::Constant(other) => Some(other.to_string()),
                Term::Variable(_) => None,
            })
            .collect();
        Ok(names)
    }

    /// Action invocations that would make the ground `atom` false in
    /// `target`.
    ///
    /// One proof of `atom` is reduced to its base-table leaves. For each leaf
    /// `p(args)` the action policy is asked which actions derive `p-(args)`
    /// (`p+(args)` for a negated leaf). Results read `p-(args) :- act(..)`.
    pub fn remediate(
        &self,
        atom: &(impl ToFormula + ?Sized),
        target: Option<&str>,
        action_target: &str,
    ) -> Result<Vec<String>, RuntimeError> {
        let policy = self.policy(target)?;
        let actions = self.action_names(action_target)?;
        let Some(tree) = self.explain(atom, target)? else {
            return Ok(Vec::new());
        };
        let defined: BTreeSet<String> = policy.rules().iter().map(|r| r.table().to_string()).collect();
        let evaluator = TopDown::new(self.policy(Some(action_target))?.theory(), &self.builtins)
            .with_lookup(self);

        let mut remediations = BTreeSet::new();
        for leaf in tree.leaves() {
            let table = leaf.table();
            if defined.contains(table) || self.builtins.is_builtin(table, Some(leaf.atom.arity())) {
                continue;
            }
            let suffix = if leaf.negated { '+' } else { '-' };
            let goal = Atom::new(format!("{table}{suffix}"), leaf.atom.arguments.clone());
            for rule in evaluator.abduce(&Formula::Atom(goal), &actions, false) {
                remediations.insert(rule.to_string());
            }
        }
        debug!(query = %tree.root, remediations = remediations.len(), "remediate");
        Ok(remediations.into_iter().collect())
    }

    /// Answers to `query` in `target` after applying `sequence`, leaving
    /// this runtime untouched.
    ///
    /// `sequence` lists updates (`p+(..)`, `p-(..)`, or rules with such a
    /// head) and action invocations over the tables `action_target` names in
    /// `action(name)`. An invocation is an atom, or a rule whose body picks
    /// the instance to run. The update rules of `action_target` describe
    /// what each action does, and its `result(..)` facts are visible to the
    /// next invocation. With `delta`, only answers that appeared (suffixed
    /// `+`) or disappeared (suffixed `-`) are returned.
    pub fn simulate(
        &self,
        query: &(impl ToFormula + ?Sized),
        sequence: &str,
        target: Option<&str>,
        action_target: &str,
        delta: bool,
    ) -> Result<Vec<String>, RuntimeError> {
        let target = self.policy_name(target)?;
        let query = query.to_formula()?;
        let sequence = parse(sequence)?;
        let mut scratch = self.scratch(&target, action_target)?;
        let actions = scratch.action_names(action_target)?;
        debug!(query = %query, steps = sequence.len(), actions = actions.len(), "simulate");

        let mut results = Vec::new();
        for formula in &sequence {
            let updates = if actions.contains(formula.table()) {
                scratch.project_action(formula, action_target, &mut results)?
            } else if split_update(formula.table()).is_some() {
                vec![formula.clone()]
            } else {
                return Err(RuntimeError::Simulation(format!(
                    "{formula} is neither an action nor an update"
                )));
            };
            for update in &updates {
                scratch.apply_update(update, &target)?;
            }
        }

        let after = scratch.answers(&query, Some(target.as_str()))?;
        if !delta {
            let rendered: BTreeSet<String> = after.iter().map(ToString::to_string).collect();
            return Ok(rendered.into_iter().collect());
        }
        let before = self.answers(&query, Some(target.as_str()))?;
        let mut changes = BTreeSet::new();
        changes.extend(after.difference(&before).map(|f| mark_update(f, '+')));
        changes.extend(before.difference(&after).map(|f| mark_update(f, '-')));
        Ok(changes.into_iter().collect())
    }

    /// A trigger-free copy of this runtime in which `action_target` also
    /// consults the scratch policy and `target`.
    fn scratch(&self, target: &str, action_target: &str) -> Result<Runtime, RuntimeError> {
        if self.policies.contains_key(SCRATCH_POLICY) {
            return Err(RuntimeError::PolicyExists(SCRATCH_POLICY.to_string()));
        }
        let mut scratch = Runtime {
            policies: self.policies.clone(),
            builtins: self.builtins.clone(),
            default_target: target.to_string(),
            triggers: TriggerRegistry::new(),
        };
        let Policy::Nonrecursive(actions) = target_mut(&mut scratch.policies, target, Some(action_target))?
        else {
            return Err(RuntimeError::Simulation(format!(
                "action policy {action_target} must be non-recursive"
            )));
        };
        let mut includes = vec![SCRATCH_POLICY.to_string()];
        includes.extend(actions.includes().iter().cloned());
        if action_target != target && !includes.iter().any(|i| i == target) {
            includes.push(target.to_string());
        }
        actions.set_includes(includes);
        scratch.policies.insert(
            SCRATCH_POLICY.to_string(),
            Policy::new(SCRATCH_POLICY, PolicyKind::Nonrecursive, Vec::new()),
        );
        Ok(scratch)
    }

    /// Run one action invocation in the scratch policy. Returns the updates
    /// the action policy derives from it and replaces `results` with the
    /// `result(..)` facts for the next invocation.
    fn project_action(
        &mut self,
        formula: &Formula,
        action_target: &str,
        results: &mut Vec<Formula>,
    ) -> Result<Vec<Formula>, RuntimeError> {
        let invocation = match formula {
            Formula::Atom(atom) if atom.is_ground() => Some(atom.clone()),
            Formula::Atom(atom) => {
                return Err(RuntimeError::Simulation(format!("action {atom} is not ground")));
            }
            Formula::Rule(rule) => {
                self.define_scratch(results.as_slice())?;
                let policy = self.policy(Some(action_target))?;
                TopDown::new(policy.theory(), &self.builtins)
                    .with_lookup(self)
                    .evaluate(&rule.body, &rule.variables(), false)
                    .first()
                    .map(|binding| rule.head.plug(binding))
                    .filter(Atom::is_ground)
            }
        };
        let Some(invocation) = invocation else {
            debug!(action = %formula, "action has no instance");
            return Ok(Vec::new());
        };
        trace!(action = %invocation, "project");
        self.define_scratch(&[Formula::Atom(invocation)])?;

        let derived = self
            .consequences(Some(action_target))?
            .into_iter()
            .filter(|a| split_update(&a.table).is_some() && a.is_ground())
            .collect();
        let updates = resolve_conflicts(derived);
        let visible: Vec<(Formula, bool)> = updates
            .iter()
            .map(|a| (Formula::Atom(a.clone()), true))
            .collect();
        self.update(&visible, Some(SCRATCH_POLICY))?;

        *results = self
            .consequences(Some(action_target))?
            .into_iter()
            .filter(|a| a.table == "result" && a.is_ground())
            .map(Formula::Atom)
            .collect();
        Ok(updates.into_iter().map(Formula::Atom).collect())
    }

    fn define_scratch(&mut self, formulas: &[Formula]) -> Result<(), RuntimeError> {
        match self.policies.get_mut(SCRATCH_POLICY) {
            Some(Policy::Nonrecursive(theory)) => Ok(theory.define(formulas, &self.builtins)?),
            _ => Err(RuntimeError::UnknownTarget(SCRATCH_POLICY.to_string())),
        }
    }

    /// Apply `p+(..)` or `p-(..)`, or a rule with such a head, to `target`
    /// as an insertion or deletion over `p`.
    fn apply_update(&mut self, update: &Formula, target: &str) -> Result<(), RuntimeError> {
        let Some((table, insert)) = split_update(update.table()) else {
            return Err(RuntimeError::Simulation(format!("{update} is not an update")));
        };
        let change = match update {
            Formula::Atom(atom) => Formula::Atom(Atom::new(table, atom.arguments.clone())),
            Formula::Rule(rule) => Formula::Rule(Rule::new(
                Atom::new(table, rule.head.arguments.clone()),
                rule.body.clone(),
            )),
        };
        trace!(update = %update, policy = target, "apply update");
        self.update(&[(change, insert)], Some(target))
    }
}

/// Base table of an update table (`p+` or `p-`) and whether it inserts.
fn split_update(table: &str) -> Option<(&str, bool)> {
    if let Some(base) = table.strip_suffix('+') {
        Some((base, true))
    } else {
        table.strip_suffix('-').map(|base| (base, false))
    }
}

/// Drop `p-(args)` wherever `p+(args)` is also present.
fn resolve_conflicts(atoms: Vec<Atom>) -> Vec<Atom> {
    let present: BTreeSet<Atom> = atoms.into_iter().collect();
    present
        .iter()
        .filter(|atom| match atom.table.strip_suffix('-') {
            Some(base) => !present.contains(&Atom::new(format!("{base}+"), atom.arguments.clone())),
            None => true,
        })
        .cloned()
        .collect()
}

/// `formula` rendered with its table suffixed by `suffix`.
fn mark_update(formula: &Formula, suffix: char) -> String {
    match formula {
        Formula::Atom(atom) => {
            Atom::new(format!("{}{suffix}", atom.table), atom.arguments.clone()).to_string()
        }
        Formula::Rule(rule) => rule.to_string(),
    }
}

fn target_mut<'a>(
    policies: &'a mut BTreeMap<String, Policy>,
    default_target: &str,
    target: Option<&str>,
) -> Result<&'a mut Policy, RuntimeError> {
    let target = target.unwrap_or(default_target);
    policies
        .get_mut(target)
        .ok_or_else(|| RuntimeError::UnknownTarget(target.to_string()))
}

impl TheoryLookup for Runtime {
    fn lookup(&self, name: &str) -> Option<&dyn TopDownTheory> {
        self.policies.get(name).map(Policy::theory)
    }
}
