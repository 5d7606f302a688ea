//! Extensional fact store with multi-justification semantics.
//!
//! Every stored tuple carries a set of proofs. Inserting adds proofs,
//! deleting removes them, and a tuple exists exactly as long as its proof set
//! is non-empty.

use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use crate::error::DatalogError;
use crate::formula::{Atom, Constant};
use crate::proof::{Proof, ProofCollection};
use crate::topdown::{Candidate, TopDownTheory};

/// A stored row together with its justifications.
#[derive(Debug, Clone, Copy)]
pub struct DbTuple<'a> {
    /// Argument values.
    pub values: &'a [Constant],
    /// Current justifications; never empty.
    pub proofs: &'a ProofCollection,
}

/// A pending change to one fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The (ground) fact.
    pub atom: Atom,
    /// Insert when `true`, delete otherwise.
    pub insert: bool,
    /// Proofs added or removed.
    pub proofs: ProofCollection,
}

impl Event {
    /// An insertion.
    pub fn insert(atom: Atom, proofs: ProofCollection) -> Self {
        Self {
            atom,
            insert: true,
            proofs,
        }
    }

    /// A deletion.
    pub fn delete(atom: Atom, proofs: ProofCollection) -> Self {
        Self {
            atom,
            insert: false,
            proofs,
        }
    }

    /// An insertion or deletion of a directly asserted fact.
    pub fn asserted(atom: Atom, insert: bool) -> Self {
        let proofs = ProofCollection::single(Proof::asserted(&atom));
        Self {
            atom,
            insert,
            proofs,
        }
    }

    /// Table of the fact.
    pub fn table(&self) -> &str {
        &self.atom.table
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.insert { '+' } else { '-' };
        write!(f, "{}{} ({} proofs)", sign, self.atom, self.proofs.len())
    }
}

type Table = BTreeMap<Vec<Constant>, ProofCollection>;

/// Named collection of tables of justified tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    name: String,
    tables: BTreeMap<String, Table>,
}

fn ground_values(atom: &Atom) -> Result<Vec<Constant>, DatalogError> {
    atom.values()
        .ok_or_else(|| DatalogError::NonGroundFact(atom.to_string()))
}

impl Database {
    /// An empty database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Name of this database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Union `proofs` into the tuple for `atom`, creating it if needed.
    pub fn insert(&mut self, atom: &Atom, proofs: &ProofCollection) -> Result<(), DatalogError> {
        let values = ground_values(atom)?;
        if proofs.is_empty() {
            return Ok(());
        }
        trace!(database = %self.name, atom = %atom, proofs = proofs.len(), "insert");
        self.tables
            .entry(atom.table.clone())
            .or_default()
            .entry(values)
            .or_default()
            .union_with(proofs);
        Ok(())
    }

    /// Remove `proofs` from the tuple for `atom`, dropping it once no proof
    /// is left.
    pub fn delete(&mut self, atom: &Atom, proofs: &ProofCollection) -> Result<(), DatalogError> {
        let values = ground_values(atom)?;
        let Some(table) = self.tables.get_mut(&atom.table) else {
            return Ok(());
        };
        let Some(existing) = table.get_mut(&values) else {
            return Ok(());
        };
        trace!(database = %self.name, atom = %atom, proofs = proofs.len(), "delete");
        existing.difference_with(proofs);
        if existing.is_empty() {
            table.remove(&values);
            if table.is_empty() {
                self.tables.remove(&atom.table);
            }
        }
        Ok(())
    }

    /// Apply an event.
    pub fn modify(&mut self, event: &Event) -> Result<(), DatalogError> {
        if event.insert {
            self.insert(&event.atom, &event.proofs)
        } else {
            self.delete(&event.atom, &event.proofs)
        }
    }

    /// Whether applying `event` would leave every proof set unchanged.
    pub fn is_noop(&self, event: &Event) -> bool {
        let existing = self.proofs(&event.atom);
        if event.insert {
            event.proofs.is_empty() || existing.is_some_and(|p| event.proofs.is_subset(p))
        } else {
            existing.is_none_or(|p| !p.intersects(&event.proofs))
        }
    }

    fn proofs(&self, atom: &Atom) -> Option<&ProofCollection> {
        let values = atom.values()?;
        self.tables.get(&atom.table)?.get(&values)
    }

    /// Current justifications of `atom`; empty if absent or not ground.
    pub fn explain(&self, atom: &Atom) -> ProofCollection {
        self.proofs(atom).cloned().unwrap_or_default()
    }

    /// Whether the ground `atom` is stored.
    pub fn contains(&self, atom: &Atom) -> bool {
        self.proofs(atom).is_some()
    }

    /// Stored tuples of `table`, ordered by value.
    pub fn tuples(&self, table: &str) -> Vec<DbTuple<'_>> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(values, proofs)| DbTuple { values, proofs })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every stored fact, optionally restricted to `tables`.
    pub fn content(&self, tables: Option<&[&str]>) -> Vec<Atom> {
        self.tables
            .iter()
            .filter(|(name, _)| tables.is_none_or(|t| t.contains(&name.as_str())))
            .flat_map(|(name, rows)| rows.keys().map(move |v| Atom::from_values(name.clone(), v)))
            .collect()
    }

    /// Names of non-empty tables.
    pub fn tablenames(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Arity of a non-empty table.
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.tables.get(table)?.keys().next().map(Vec::len)
    }

    /// Number of stored tuples.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Whether no tuple is stored.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop every tuple.
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// Drop every tuple of `table`.
    pub fn clear_table(&mut self, table: &str) {
        self.tables.remove(table);
    }

    /// Assert a fact. Returns whether the database changed.
    pub fn insert_fact(&mut self, atom: &Atom) -> Result<bool, DatalogError> {
        self.assert_fact(atom, true)
    }

    /// Retract an asserted fact. Returns whether the database changed.
    pub fn delete_fact(&mut self, atom: &Atom) -> Result<bool, DatalogError> {
        self.assert_fact(atom, false)
    }

    fn assert_fact(&mut self, atom: &Atom, insert: bool) -> Result<bool, DatalogError> {
        ground_values(atom)?;
        let event = Event::asserted(atom.clone(), insert);
        if self.is_noop(&event) {
            return Ok(false);
        }
        self.modify(&event)?;
        Ok(true)
    }
}

impl TopDownTheory for Database {
    fn name(&self) -> &str {
        &self.name
    }

    fn head_index(&self, table: &str) -> Vec<Candidate<'_>> {
        self.tuples(table).into_iter().map(Candidate::Tuple).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Binding, Literal, Rule, Term, Variable};
    use std::sync::Arc;

    fn fact(table: &str, values: &[i64]) -> Atom {
        let values: Vec<Constant> = values.iter().copied().map(Constant::Int).collect();
        Atom::from_values(table, &values)
    }

    fn derived_proof(body_table: &str, x: i64) -> ProofCollection {
        let rule = Arc::new(Rule::new(
            Atom::new("p", vec![Term::var("x")]),
            vec![Literal::positive(Atom::new(body_table, vec![Term::var("x")]))],
        ));
        let mut binding = Binding::new();
        binding.insert(Variable::new("x"), Constant::Int(x));
        ProofCollection::single(Proof::new(rule, &binding))
    }

    #[test]
    fn test_tuple_survives_until_last_proof_is_removed() {
        let mut db = Database::new("test");
        let p1 = fact("p", &[1]);
        let via_q = derived_proof("q", 1);
        let via_r = derived_proof("r", 1);

        db.insert(&p1, &via_q).unwrap();
        db.insert(&p1, &via_r).unwrap();
        assert_eq!(db.explain(&p1).len(), 2);

        db.delete(&p1, &via_q).unwrap();
        assert!(db.contains(&p1));

        db.delete(&p1, &via_r).unwrap();
        assert!(!db.contains(&p1));
        assert!(db.is_empty());
    }

    #[test]
    fn test_is_noop() {
        let mut db = Database::new("test");
        let p1 = fact("p", &[1]);
        let via_q = derived_proof("q", 1);
        let via_r = derived_proof("r", 1);

        let insert = Event::insert(p1.clone(), via_q.clone());
        assert!(!db.is_noop(&insert));
        db.modify(&insert).unwrap();
        let snapshot = db.clone();
        assert!(db.is_noop(&insert));
        db.modify(&insert).unwrap();
        assert_eq!(db, snapshot);

        assert!(db.is_noop(&Event::insert(p1.clone(), ProofCollection::new())));
        assert!(!db.is_noop(&Event::insert(p1.clone(), via_r.clone())));
        assert!(db.is_noop(&Event::delete(p1.clone(), via_r)));
        assert!(db.is_noop(&Event::delete(fact("p", &[2]), via_q.clone())));
        assert!(!db.is_noop(&Event::delete(p1, via_q)));
    }

    #[test]
    fn test_non_ground_atoms_are_rejected() {
        let mut db = Database::new("test");
        let atom = Atom::new("p", vec![Term::var("x")]);
        assert!(matches!(
            db.insert_fact(&atom),
            Err(DatalogError::NonGroundFact(_))
        ));
        assert!(db.explain(&atom).is_empty());
    }

    #[test]
    fn test_content_and_introspection() {
        let mut db = Database::new("test");
        assert!(db.insert_fact(&fact("q", &[2, 3])).unwrap());
        assert!(db.insert_fact(&fact("q", &[1, 2])).unwrap());
        assert!(!db.insert_fact(&fact("q", &[1, 2])).unwrap());
        assert!(db.insert_fact(&fact("r", &[3])).unwrap());

        let rendered: Vec<String> = db.content(None).iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["q(1, 2)", "q(2, 3)", "r(3)"]);
        assert_eq!(db.content(Some(&["r"][..])).len(), 1);
        assert_eq!(db.arity("q"), Some(2));
        assert_eq!(db.len(), 3);
        assert_eq!(db.head_index("q").len(), 2);

        assert!(db.delete_fact(&fact("r", &[3])).unwrap());
        assert!(!db.delete_fact(&fact("r", &[3])).unwrap());
        assert_eq!(db.tablenames().collect::<Vec<_>>(), vec!["q"]);
    }
}
