//! Table dependency analysis.
//!
//! Tracks which tables each defined table depends on, so theories can reject
//! rules that would introduce recursion and compute the tables a query needs.

use std::collections::{HashMap, HashSet};

use crate::formula::Rule;

/// Dependency graph between tables.
///
/// An edge `head -> body` exists for every rule defining `head` whose body
/// mentions `body`. Edges are reference counted so removing one of two rules
/// with the same dependency keeps the edge.
#[derive(Debug, Clone, Default)]
pub struct TableDependencyGraph {
    /// Table -> tables it depends on, with the number of rules creating each edge.
    dependencies: HashMap<String, HashMap<String, usize>>,
}

impl TableDependencyGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dependency graph from a set of rules.
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        let mut graph = Self::new();
        for rule in rules {
            graph.add_rule(rule);
        }
        graph
    }

    /// Add the edges contributed by `rule`.
    pub fn add_rule(&mut self, rule: &Rule) {
        if rule.is_fact() {
            return;
        }
        let edges = self.dependencies.entry(rule.table().to_string()).or_default();
        for table in rule.body_tables() {
            *edges.entry(table.to_string()).or_default() += 1;
        }
    }

    /// Remove the edges contributed by `rule`.
    pub fn remove_rule(&mut self, rule: &Rule) {
        let head = rule.table();
        let Some(edges) = self.dependencies.get_mut(head) else {
            return;
        };
        for table in rule.body_tables() {
            if let Some(count) = edges.get_mut(table) {
                *count -= 1;
                if *count == 0 {
                    edges.remove(table);
                }
            }
        }
        if edges.is_empty() {
            self.dependencies.remove(head);
        }
    }

    /// Tables reachable from `roots`, the roots included.
    pub fn required_tables<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
        let mut required = HashSet::new();
        let mut to_process: Vec<String> = roots.into_iter().map(str::to_string).collect();

        while let Some(table) = to_process.pop() {
            if required.contains(&table) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(&table) {
                for dep in deps.keys() {
                    if !required.contains(dep) {
                        to_process.push(dep.clone());
                    }
                }
            }
            required.insert(table);
        }

        required
    }

    /// Whether adding `rule` would close a cycle (including a self loop).
    pub fn would_create_cycle(&self, rule: &Rule) -> bool {
        let head = rule.table();
        let body: Vec<&str> = rule.body_tables().into_iter().collect();
        body.contains(&head) || self.required_tables(body).contains(head)
    }

    /// Whether the graph contains any cycle.
    pub fn has_cycle(&self) -> bool {
        self.dependencies.keys().any(|table| {
            let deps = self.dependencies[table].keys().map(String::as_str);
            self.required_tables(deps).contains(table)
        })
    }

    /// Whether `table` is defined by at least one rule with a body.
    pub fn is_defined(&self, table: &str) -> bool {
        self.dependencies.contains_key(table)
    }
}
