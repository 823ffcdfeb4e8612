//! The expression facade: owns the tree and drives parse → prep → eval.
//!
//! A host builds an [`Expression`] around source text and a [`Resolver`],
//! preps it once, then evaluates it once per sample. The `Rc`/`Cell` internals
//! make the type `!Send`, so one instance can never be evaluated from two
//! threads; hosts that fan out across threads build one expression per thread.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::Node;
use crate::env::{VarEnv, VarRef};
use crate::errors::Diag;
use crate::eval;
use crate::funcs::FuncDef;
use crate::parser;
use crate::prep::TypeChecker;
use crate::types::ExprType;
use crate::value::Vec3;

/// Host-side name resolution, consulted during prep. Variables resolve here
/// after the lexical environment misses; functions resolve here *before* the
/// process-wide registry, so hosts can shadow builtins.
pub trait Resolver {
    fn resolve_var(&self, _name: &str) -> Option<Rc<dyn VarRef>> {
        None
    }

    fn resolve_func(&self, _name: &str) -> Option<FuncDef> {
        None
    }
}

/// A resolver that resolves nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyResolver;

impl Resolver for EmptyResolver {}

pub struct Expression {
    source: String,
    resolver: Rc<dyn Resolver>,
    root: Option<Node>,
    parse_errors: Vec<Diag>,
    prep_errors: Vec<Diag>,
    ret_type: ExprType,
    thread_unsafe: Vec<String>,
    prepped: bool,
}

impl Expression {
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_resolver(source, Rc::new(EmptyResolver))
    }

    pub fn with_resolver(source: impl Into<String>, resolver: Rc<dyn Resolver>) -> Self {
        Expression {
            source: source.into(),
            resolver,
            root: None,
            parse_errors: Vec::new(),
            prep_errors: Vec::new(),
            ret_type: ExprType::Error,
            thread_unsafe: Vec::new(),
            prepped: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replace the source text, discarding the parsed tree and diagnostics.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.reset();
    }

    /// Replace the resolver; bindings must be re-resolved, so prep state is
    /// discarded along with it.
    pub fn set_resolver(&mut self, resolver: Rc<dyn Resolver>) {
        self.resolver = resolver;
        self.reset();
    }

    fn reset(&mut self) {
        self.root = None;
        self.parse_errors.clear();
        self.prep_errors.clear();
        self.ret_type = ExprType::Error;
        self.thread_unsafe.clear();
        self.prepped = false;
    }

    /// Build the tree from the source text. Returns false on a parse error.
    pub fn parse(&mut self) -> bool {
        self.reset();
        match parser::parse(&self.source) {
            Ok(root) => {
                trace!(bytes = self.source.len(), "parsed expression");
                self.root = Some(root);
                true
            }
            Err(diag) => {
                trace!(error = %diag.message(), "parse failed");
                self.parse_errors.push(diag);
                false
            }
        }
    }

    /// Type-check and bind the tree, parsing first if needed. Safe to call
    /// again: diagnostics are rebuilt, not appended across runs.
    pub fn prep(&mut self) -> bool {
        if self.root.is_none() && self.parse_errors.is_empty() {
            self.parse();
        }
        self.prep_errors.clear();
        self.thread_unsafe.clear();
        self.ret_type = ExprType::Error;

        if let Some(mut root) = self.root.take() {
            let resolver = Rc::clone(&self.resolver);
            let mut checker = TypeChecker::new(&*resolver);
            let mut env = VarEnv::new();
            let ty = checker.prep(&mut root, ExprType::Any, &mut env);
            let (errors, thread_unsafe) = checker.finish();
            self.prep_errors = errors;
            self.thread_unsafe = thread_unsafe;
            self.ret_type = ty;
            self.root = Some(root);
        }
        self.prepped = true;
        debug!(
            errors = self.parse_errors.len() + self.prep_errors.len(),
            ret = %self.ret_type,
            "prepped expression"
        );
        self.is_valid()
    }

    /// True once prep has run with no diagnostics and a valid root type.
    pub fn is_valid(&self) -> bool {
        self.prepped
            && self.parse_errors.is_empty()
            && self.prep_errors.is_empty()
            && self.ret_type.is_valid()
    }

    /// All diagnostics in encounter order: parse errors, then prep errors.
    pub fn errors(&self) -> impl Iterator<Item = &Diag> {
        self.parse_errors.iter().chain(self.prep_errors.iter())
    }

    /// The root type resolved by prep.
    pub fn return_type(&self) -> ExprType {
        self.ret_type
    }

    /// False when any prepped call site resolved to a function that declared
    /// itself thread-unsafe. Advisory: hosts downgrade to serial dispatch.
    pub fn is_thread_safe(&self) -> bool {
        self.thread_unsafe.is_empty()
    }

    pub fn thread_unsafe_functions(&self) -> &[String] {
        &self.thread_unsafe
    }

    /// Access to the prepped tree, for hosts that inspect literals.
    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// Evaluate once. Valid expressions produce the root's value with unset
    /// lanes reading as zero; invalid expressions produce zero.
    pub fn evaluate(&self) -> Vec3 {
        let mut out = Vec3::ZERO;
        if !self.is_valid() {
            return out;
        }
        if let Some(root) = &self.root {
            eval::eval(root, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExprError, ParseError};
    use crate::types::FP1;

    #[test]
    fn lifecycle_parse_prep_eval() {
        let mut e = Expression::new("1 + 2");
        assert!(!e.is_valid());
        assert!(e.prep());
        assert!(e.is_valid());
        assert_eq!(e.return_type(), FP1);
        assert_eq!(e.evaluate()[0], 3.0);
    }

    #[test]
    fn parse_errors_surface_through_the_facade() {
        let mut e = Expression::new("1 +");
        assert!(!e.prep());
        assert!(!e.is_valid());
        let errors: Vec<_> = e.errors().collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].error, ExprError::Parse(_)));
        assert_eq!(e.evaluate(), Vec3::ZERO);
    }

    #[test]
    fn unterminated_string_is_reported() {
        let mut e = Expression::new("printf(\"oops");
        assert!(!e.prep());
        assert!(e.errors().any(|d| matches!(
            d.error,
            ExprError::Parse(ParseError::UnterminatedString { .. })
        )));
    }

    #[test]
    fn set_source_resets_state() {
        let mut e = Expression::new("$missing");
        assert!(!e.prep());
        e.set_source("42");
        assert!(!e.is_valid());
        assert!(e.prep());
        assert_eq!(e.errors().count(), 0);
        assert_eq!(e.evaluate()[0], 42.0);
    }

    #[test]
    fn prep_is_idempotent() {
        let mut e = Expression::new("$x = 2; $x * $x");
        assert!(e.prep());
        let ty = e.return_type();
        assert!(e.prep());
        assert_eq!(e.return_type(), ty);
        assert_eq!(e.errors().count(), 0);

        let mut bad = Expression::new("$a + $b");
        assert!(!bad.prep());
        let n = bad.errors().count();
        assert!(!bad.prep());
        assert_eq!(bad.errors().count(), n);
    }

    #[test]
    fn diagnostics_carry_positions() {
        let mut e = Expression::new("1 +\n$oops");
        assert!(!e.prep());
        let diag = e.errors().next().unwrap();
        assert_eq!(diag.span.line, 2);
        assert!(diag.message().contains("oops"));
    }

    #[test]
    fn evaluate_is_deterministic() {
        let mut e = Expression::new("$x = [1,2,3]; $x * $x");
        assert!(e.prep());
        assert_eq!(e.evaluate(), e.evaluate());
    }
}
