//! Lexically scoped variable environments, consumed only by the prep pass.
//!
//! A scope is a map of names introduced at that level plus a link to its
//! parent; lookups walk the chain. If/else branches prep in child scopes whose
//! introduced bindings ("changes") are compared and merged back into the
//! surrounding scope. Eval never touches an environment: it reads the binding
//! stored on each variable node during prep.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::types::ExprType;
use crate::value::Vec3;

/// An external variable supplied by the host resolver. The evaluator is
/// invoked once per sample and may return a different value each time.
pub trait VarRef {
    fn value_type(&self) -> ExprType;
    fn eval(&self) -> Vec3;
}

/// A local variable cell introduced by an assignment. The cell is written by
/// the assignment's eval and read by every variable node bound to it.
#[derive(Debug)]
pub struct LocalVar {
    ty: ExprType,
    val: Cell<Vec3>,
}

impl LocalVar {
    pub fn new(ty: ExprType) -> Self {
        LocalVar {
            ty,
            val: Cell::new(Vec3::ZERO),
        }
    }

    pub fn value_type(&self) -> ExprType {
        self.ty
    }

    pub fn value(&self) -> Vec3 {
        self.val.get()
    }

    pub fn set_value(&self, v: Vec3) {
        self.val.set(v);
    }
}

/// What a name resolves to: a local cell or a host-supplied callback.
/// A local binding always shadows an external one.
#[derive(Clone)]
pub enum Binding {
    Local(Rc<LocalVar>),
    External(Rc<dyn VarRef>),
}

impl Binding {
    pub fn value_type(&self) -> ExprType {
        match self {
            Binding::Local(v) => v.value_type(),
            Binding::External(v) => v.value_type(),
        }
    }

    pub fn eval(&self) -> Vec3 {
        match self {
            Binding::Local(v) => v.value(),
            Binding::External(v) => v.eval(),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Local(v) => f.debug_tuple("Local").field(&v.value_type()).finish(),
            Binding::External(v) => f.debug_tuple("External").field(&v.value_type()).finish(),
        }
    }
}

/// The bindings a child scope introduced, extracted for comparison and merge.
#[derive(Debug, Default)]
pub struct ScopeChanges {
    vars: FxHashMap<String, Binding>,
}

impl ScopeChanges {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.vars.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Default)]
pub struct VarEnv<'p> {
    vars: FxHashMap<String, Binding>,
    parent: Option<&'p VarEnv<'p>>,
}

impl<'p> VarEnv<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty scope whose lookups fall back to `self`.
    pub fn new_scope(&self) -> VarEnv<'_> {
        VarEnv {
            vars: FxHashMap::default(),
            parent: Some(self),
        }
    }

    /// Walk the scope chain, innermost first.
    pub fn find(&self, name: &str) -> Option<Binding> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| self.parent.and_then(|p| p.find(name)))
    }

    /// Insert or overwrite a binding in the current scope.
    pub fn add(&mut self, name: impl Into<String>, binding: Binding) {
        self.vars.insert(name.into(), binding);
    }

    /// Consume a child scope, yielding the bindings it introduced.
    pub fn into_changes(self) -> ScopeChanges {
        ScopeChanges { vars: self.vars }
    }

    /// Promote a child scope's bindings into this scope.
    pub fn merge(&mut self, changes: ScopeChanges) {
        self.vars.extend(changes.vars);
    }

    /// True iff both scopes introduced exactly the same names and each pair
    /// of bindings has matching types.
    pub fn changes_match(a: &ScopeChanges, b: &ScopeChanges) -> bool {
        a.vars.len() == b.vars.len()
            && a.vars.iter().all(|(name, binding)| {
                b.vars
                    .get(name)
                    .is_some_and(|other| other.value_type() == binding.value_type())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FP1, FP3};

    fn local(ty: ExprType) -> Binding {
        Binding::Local(Rc::new(LocalVar::new(ty)))
    }

    #[test]
    fn lookup_walks_the_chain() {
        let mut outer = VarEnv::new();
        outer.add("x", local(FP1));
        let mut inner = outer.new_scope();
        inner.add("y", local(FP3));
        assert_eq!(inner.find("x").unwrap().value_type(), FP1);
        assert_eq!(inner.find("y").unwrap().value_type(), FP3);
        assert!(inner.find("z").is_none());
        assert!(outer.find("y").is_none());
    }

    #[test]
    fn inner_scope_shadows_without_touching_parent() {
        let mut outer = VarEnv::new();
        outer.add("x", local(FP1));
        let mut inner = outer.new_scope();
        inner.add("x", local(FP3));
        assert_eq!(inner.find("x").unwrap().value_type(), FP3);
        let changes = inner.into_changes();
        assert_eq!(outer.find("x").unwrap().value_type(), FP1);
        outer.merge(changes);
        assert_eq!(outer.find("x").unwrap().value_type(), FP3);
    }

    #[test]
    fn changes_match_requires_same_names_and_types() {
        let outer = VarEnv::new();

        let mut a = outer.new_scope();
        a.add("x", local(FP1));
        let a = a.into_changes();

        let mut b = outer.new_scope();
        b.add("x", local(FP1));
        let b = b.into_changes();
        assert!(VarEnv::changes_match(&a, &b));

        let mut c = outer.new_scope();
        c.add("x", local(FP3));
        let c = c.into_changes();
        assert!(!VarEnv::changes_match(&a, &c));

        let mut d = outer.new_scope();
        d.add("x", local(FP1));
        d.add("y", local(FP1));
        let d = d.into_changes();
        assert!(!VarEnv::changes_match(&a, &d));

        let empty = outer.new_scope().into_changes();
        assert!(!VarEnv::changes_match(&a, &empty));
        let empty2 = outer.new_scope().into_changes();
        assert!(VarEnv::changes_match(&empty, &empty2));
    }

    #[test]
    fn local_cell_round_trip() {
        let var = LocalVar::new(FP3);
        assert_eq!(var.value(), Vec3::ZERO);
        var.set_value(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(var.value(), Vec3::new(1.0, 2.0, 3.0));
    }
}
