//! Dual-context unification.
//!
//! Variables are identified by name *and* context: the `x` of a query and the
//! `x` of a rule being resolved against it live in different contexts and are
//! independent until explicitly bound together. Contexts are stored in an
//! arena ([`Unifiers`]) and addressed by [`UnifierId`] handles, so a binding in
//! one context may point at a variable in another without ownership cycles.
//!
//! Every binding returns an [`Undo`] token; reversing tokens restores the
//! arena exactly, which is what backtracking relies on.

use std::collections::HashMap;

use crate::formula::{Atom, Binding, Constant, Term, Variable};

/// Handle of one unification context inside a [`Unifiers`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnifierId(usize);

/// What a variable is bound to.
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Constant(Constant),
    Variable(Variable, UnifierId),
}

/// Final value of a term after following all bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The term resolves to a constant.
    Constant(Constant),
    /// The term resolves to an unbound variable living in the given context.
    Variable(Variable, UnifierId),
}

/// Token reversing a single binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Undo {
    variable: Variable,
    context: UnifierId,
}

/// Arena of unification contexts.
#[derive(Debug, Default)]
pub struct Unifiers {
    contexts: Vec<HashMap<Variable, Bound>>,
}

impl Unifiers {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new, empty context.
    pub fn fresh(&mut self) -> UnifierId {
        self.contexts.push(HashMap::new());
        UnifierId(self.contexts.len() - 1)
    }

    /// Allocate a context pre-populated with a ground binding.
    pub fn from_binding(&mut self, binding: &Binding) -> UnifierId {
        let id = self.fresh();
        self.contexts[id.0] = binding
            .iter()
            .map(|(v, c)| (v.clone(), Bound::Constant(c.clone())))
            .collect();
        id
    }

    /// Number of allocated contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no context has been allocated.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop every context allocated after the first `len`.
    ///
    /// Callers must first undo any binding in an older context that points
    /// into a dropped one.
    pub fn truncate(&mut self, len: usize) {
        self.contexts.truncate(len);
    }

    /// Dereference a variable through the chain of bindings.
    pub fn apply_full(&self, variable: &Variable, context: UnifierId) -> Resolved {
        let mut var = variable;
        let mut ctx = context;
        loop {
            match self.contexts[ctx.0].get(var) {
                None => return Resolved::Variable(var.clone(), ctx),
                Some(Bound::Constant(c)) => return Resolved::Constant(c.clone()),
                Some(Bound::Variable(next, next_ctx)) => {
                    var = next;
                    ctx = *next_ctx;
                }
            }
        }
    }

    /// Dereference a term: constants resolve to themselves.
    pub fn resolve(&self, term: &Term, context: UnifierId) -> Resolved {
        match term {
            Term::Constant(c) => Resolved::Constant(c.clone()),
            Term::Variable(v) => self.apply_full(v, context),
        }
    }

    /// The constant a term resolves to, if any.
    pub fn value(&self, term: &Term, context: UnifierId) -> Option<Constant> {
        match self.resolve(term, context) {
            Resolved::Constant(c) => Some(c),
            Resolved::Variable(..) => None,
        }
    }

    fn bind(&mut self, variable: Variable, context: UnifierId, value: Bound) -> Undo {
        self.contexts[context.0].insert(variable.clone(), value);
        Undo { variable, context }
    }

    /// Bind `variable` in `context` to `value`.
    pub fn add(&mut self, variable: &Variable, context: UnifierId, value: Constant) -> Undo {
        self.bind(variable.clone(), context, Bound::Constant(value))
    }

    /// Bind `variable` in `context` to `target` living in `target_context`.
    pub fn add_variable(
        &mut self,
        variable: &Variable,
        context: UnifierId,
        target: &Variable,
        target_context: UnifierId,
    ) -> Undo {
        self.bind(
            variable.clone(),
            context,
            Bound::Variable(target.clone(), target_context),
        )
    }

    /// Reverse one binding.
    pub fn undo(&mut self, change: &Undo) {
        if let Some(ctx) = self.contexts.get_mut(change.context.0) {
            ctx.remove(&change.variable);
        }
    }

    /// Reverse bindings in token order.
    pub fn undo_all(&mut self, changes: &[Undo]) {
        for change in changes {
            self.undo(change);
        }
    }

    /// Replace every resolvable variable of `atom` by its value.
    ///
    /// Variables that stay unbound keep their own name.
    pub fn plug_atom(&self, atom: &Atom, context: UnifierId) -> Atom {
        let arguments = atom
            .arguments
            .iter()
            .map(|t| match self.resolve(t, context) {
                Resolved::Constant(c) => Term::Constant(c),
                Resolved::Variable(..) => t.clone(),
            })
            .collect();
        Atom::new(atom.table.clone(), arguments)
    }

    /// Flattened ground substitution for `variables` in `context`.
    ///
    /// Variables that resolve to another unbound variable are omitted.
    pub fn binding<'v>(
        &self,
        variables: impl IntoIterator<Item = &'v Variable>,
        context: UnifierId,
    ) -> Binding {
        variables
            .into_iter()
            .filter_map(|v| match self.apply_full(v, context) {
                Resolved::Constant(c) => Some((v.clone(), c)),
                Resolved::Variable(..) => None,
            })
            .collect()
    }

    /// Unify two terms living in two contexts, appending new bindings to `changes`.
    pub fn unify_terms(
        &mut self,
        left: &Term,
        left_ctx: UnifierId,
        right: &Term,
        right_ctx: UnifierId,
        changes: &mut Vec<Undo>,
    ) -> bool {
        match (self.resolve(left, left_ctx), self.resolve(right, right_ctx)) {
            (Resolved::Constant(a), Resolved::Constant(b)) => a == b,
            (Resolved::Variable(v, ctx), Resolved::Constant(c))
            | (Resolved::Constant(c), Resolved::Variable(v, ctx)) => {
                changes.push(self.add(&v, ctx, c));
                true
            }
            (Resolved::Variable(v1, c1), Resolved::Variable(v2, c2)) => {
                if v1 != v2 || c1 != c2 {
                    changes.push(self.add_variable(&v1, c1, &v2, c2));
                }
                true
            }
        }
    }

    /// Unify a term with a constant.
    pub fn unify_constant(
        &mut self,
        term: &Term,
        context: UnifierId,
        value: &Constant,
        changes: &mut Vec<Undo>,
    ) -> bool {
        match self.resolve(term, context) {
            Resolved::Constant(c) => &c == value,
            Resolved::Variable(v, ctx) => {
                changes.push(self.add(&v, ctx, value.clone()));
                true
            }
        }
    }
}

/// Extend two contexts so `left` and `right` become syntactically equal.
///
/// Returns the bindings made, or `None` (with nothing recorded) on failure.
pub fn bi_unify_atoms(
    left: &Atom,
    left_ctx: UnifierId,
    right: &Atom,
    right_ctx: UnifierId,
    unifiers: &mut Unifiers,
) -> Option<Vec<Undo>> {
    if left.table != right.table || left.arity() != right.arity() {
        return None;
    }
    bi_unify_lists(&left.arguments, left_ctx, &right.arguments, right_ctx, unifiers)
}

/// Pairwise unification of two argument lists of equal length.
pub fn bi_unify_lists(
    left: &[Term],
    left_ctx: UnifierId,
    right: &[Term],
    right_ctx: UnifierId,
    unifiers: &mut Unifiers,
) -> Option<Vec<Undo>> {
    if left.len() != right.len() {
        return None;
    }
    let mut changes = Vec::new();
    for (l, r) in left.iter().zip(right) {
        if !unifiers.unify_terms(l, left_ctx, r, right_ctx, &mut changes) {
            unifiers.undo_all(&changes);
            return None;
        }
    }
    Some(changes)
}

/// Unify the arguments of `atom` against a stored row of values.
pub fn match_tuple(
    values: &[Constant],
    atom: &Atom,
    context: UnifierId,
    unifiers: &mut Unifiers,
) -> Option<Vec<Undo>> {
    if values.len() != atom.arity() {
        return None;
    }
    let mut changes = Vec::new();
    for (term, value) in atom.arguments.iter().zip(values) {
        if !unifiers.unify_constant(term, context, value, &mut changes) {
            unifiers.undo_all(&changes);
            return None;
        }
    }
    Some(changes)
}

/// One-sided match of `pattern` against a ground atom.
pub fn match_atom(pattern: &Atom, ground: &Atom) -> Option<Binding> {
    if pattern.table != ground.table || pattern.arity() != ground.arity() {
        return None;
    }
    let mut binding = Binding::new();
    for (p, g) in pattern.arguments.iter().zip(&ground.arguments) {
        let value = g.as_constant()?;
        match p {
            Term::Constant(c) if c != value => return None,
            Term::Constant(_) => {}
            Term::Variable(v) => match binding.get(v) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    binding.insert(v.clone(), value.clone());
                }
            },
        }
    }
    Some(binding)
}
