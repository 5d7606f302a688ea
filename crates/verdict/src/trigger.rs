//! Table-change triggers.
//!
//! A trigger watches one table of one policy and is called with the table's
//! contents before and after every update that changes them. Triggers are
//! indexed by every (policy, table) pair the watched table depends on, through
//! rules and through `includes`, so an update only recomputes the tables it
//! can affect.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use verdict_datalog::{Atom, TableDependencyGraph, TopDownTheory};

use crate::runtime::Policy;

/// Called with the old and new contents of a watched table.
pub type TriggerCallback = Arc<dyn Fn(&TableChange) + Send + Sync>;

/// Handle returned by [`Runtime::register_trigger`](crate::Runtime::register_trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trigger-{}", self.0)
    }
}

/// Contents of a watched table around one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChange {
    pub policy: String,
    pub table: String,
    pub before: BTreeSet<Atom>,
    pub after: BTreeSet<Atom>,
}

impl TableChange {
    /// Facts present after the update but not before.
    pub fn added(&self) -> impl Iterator<Item = &Atom> {
        self.after.difference(&self.before)
    }

    /// Facts present before the update but not after.
    pub fn removed(&self) -> impl Iterator<Item = &Atom> {
        self.before.difference(&self.after)
    }
}

/// A watched (policy, table) pair.
pub type TableKey = (String, String);

#[derive(Clone)]
struct Trigger {
    key: TableKey,
    callback: TriggerCallback,
}

/// Registered triggers and the tables each one depends on.
#[derive(Default, Clone)]
pub struct TriggerRegistry {
    triggers: BTreeMap<TriggerId, Trigger>,
    /// (policy, table) -> triggers whose watched table depends on it.
    index: HashMap<TableKey, BTreeSet<TriggerId>>,
    next_id: u64,
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.triggers.iter().map(|(id, t)| (id, &t.key)))
            .finish()
    }
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Watch `table` of `policy`.
    pub fn register(
        &mut self,
        policy: &str,
        table: &str,
        callback: TriggerCallback,
        policies: &BTreeMap<String, Policy>,
    ) -> TriggerId {
        let id = TriggerId(self.next_id);
        self.next_id += 1;
        let key = (policy.to_string(), table.to_string());
        self.index_trigger(id, &key, policies);
        self.triggers.insert(id, Trigger { key, callback });
        debug!(%id, policy, table, "registered trigger");
        id
    }

    /// Stop watching. Returns whether `id` was registered.
    pub fn unregister(&mut self, id: TriggerId) -> bool {
        if self.triggers.remove(&id).is_none() {
            return false;
        }
        self.index.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        debug!(%id, "unregistered trigger");
        true
    }

    /// Rebuild the dependency index after rules or includes changed.
    pub fn reindex(&mut self, policies: &BTreeMap<String, Policy>) {
        self.index.clear();
        let triggers: Vec<(TriggerId, TableKey)> = self
            .triggers
            .iter()
            .map(|(id, t)| (*id, t.key.clone()))
            .collect();
        for (id, key) in triggers {
            self.index_trigger(id, &key, policies);
        }
        trace!(triggers = self.triggers.len(), keys = self.index.len(), "reindexed triggers");
    }

    fn index_trigger(&mut self, id: TriggerId, key: &TableKey, policies: &BTreeMap<String, Policy>) {
        for dependency in dependencies(key, policies) {
            self.index.entry(dependency).or_default().insert(id);
        }
    }

    /// Watched tables that changes to `tables` of `policy` may affect.
    pub fn watching<'a>(
        &self,
        policy: &str,
        tables: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<TableKey> {
        let mut watched = BTreeSet::new();
        for table in tables {
            let key = (policy.to_string(), table.to_string());
            let Some(ids) = self.index.get(&key) else {
                continue;
            };
            watched.extend(
                ids.iter()
                    .filter_map(|id| self.triggers.get(id))
                    .map(|t| t.key.clone()),
            );
        }
        watched
    }

    /// Call every trigger watching the changed table.
    pub fn fire(&self, change: &TableChange) {
        let watchers = self
            .triggers
            .iter()
            .filter(|(_, t)| t.key.0 == change.policy && t.key.1 == change.table);
        for (id, trigger) in watchers {
            debug!(
                %id,
                policy = %change.policy,
                table = %change.table,
                added = change.added().count(),
                removed = change.removed().count(),
                "firing trigger"
            );
            (trigger.callback)(change);
        }
    }
}

/// Every (policy, table) pair whose contents can change what `key` holds,
/// `key` included.
fn dependencies(key: &TableKey, policies: &BTreeMap<String, Policy>) -> BTreeSet<TableKey> {
    let mut graphs: HashMap<&str, TableDependencyGraph> = HashMap::new();
    let mut found = BTreeSet::new();
    let mut pending = vec![key.clone()];

    while let Some((policy_name, table)) = pending.pop() {
        if !found.insert((policy_name.clone(), table.clone())) {
            continue;
        }
        let Some((name, policy)) = policies.get_key_value(&policy_name) else {
            continue;
        };
        let graph = graphs
            .entry(name.as_str())
            .or_insert_with(|| TableDependencyGraph::from_rules(&policy.rules()));
        for required in graph.required_tables([table.as_str()]) {
            for include in policy.theory().includes() {
                pending.push((include.clone(), required.clone()));
            }
            pending.push((policy_name.clone(), required));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyKind;
    use crate::runtime::Runtime;
    use pretty_assertions::assert_eq;

    fn key(policy: &str, table: &str) -> TableKey {
        (policy.to_string(), table.to_string())
    }

    #[test]
    fn test_dependencies_follow_rules_and_includes() {
        let mut runtime = Runtime::new();
        runtime
            .load("p(x) :- q(x)  q(x) :- r(x)  s(x) :- t(x)", Some("classification"))
            .unwrap();
        runtime.load("alarm(x) :- p(x), u(x)", Some("service")).unwrap();

        let found = dependencies(&key("service", "alarm"), runtime.policies());
        for expected in [
            key("service", "alarm"),
            key("service", "u"),
            key("classification", "p"),
            key("classification", "q"),
            key("classification", "r"),
            key("classification", "u"),
        ] {
            assert!(found.contains(&expected), "missing {expected:?}");
        }
        assert!(!found.contains(&key("classification", "t")));
        assert!(!found.contains(&key("action", "p")));
    }

    #[test]
    fn test_register_and_unregister() {
        let mut runtime = Runtime::new();
        runtime
            .create_policy("inventory", PolicyKind::Database, &[])
            .unwrap();
        let mut registry = TriggerRegistry::new();
        let id = registry.register(
            "inventory",
            "host",
            Arc::new(|_: &TableChange| {}),
            runtime.policies(),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.watching("inventory", ["host", "other"]),
            BTreeSet::from([key("inventory", "host")])
        );
        assert!(registry.watching("classification", ["host"]).is_empty());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
        assert!(registry.watching("inventory", ["host"]).is_empty());
    }

    #[test]
    fn test_table_change_diff() {
        let atom = |v: i64| Atom::from_values("p", &[v.into()]);
        let change = TableChange {
            policy: "classification".to_string(),
            table: "p".to_string(),
            before: BTreeSet::from([atom(1), atom(2)]),
            after: BTreeSet::from([atom(2), atom(3)]),
        };
        assert_eq!(change.added().collect::<Vec<_>>(), vec![&atom(3)]);
        assert_eq!(change.removed().collect::<Vec<_>>(), vec![&atom(1)]);
    }
}
