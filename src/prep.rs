//! The typing and name-resolution pass.
//!
//! Prep walks the tree top-down carrying a *wanted* type (the caller's
//! expectation, used to infer numeric widths) and the current environment. It
//! writes a resolved type onto every node, binds variable and call references,
//! and records a diagnostic for every independent failure instead of stopping
//! at the first one: a failed node is demoted to the error type, which
//! propagates to the root, and the walk continues so the author sees all
//! mistakes in one pass.

use std::rc::Rc;

use crate::ast::{Node, NodeKind, Span, UnaryOp};
use crate::env::{Binding, LocalVar, VarEnv};
use crate::errors::{Diag, PrepError};
use crate::expr::Resolver;
use crate::funcs;
use crate::types::{ExprType, FP1, FP3};
use crate::value::Vec3;

pub struct TypeChecker<'a> {
    resolver: &'a dyn Resolver,
    errors: Vec<Diag>,
    thread_unsafe: Vec<String>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(resolver: &'a dyn Resolver) -> Self {
        TypeChecker {
            resolver,
            errors: Vec::new(),
            thread_unsafe: Vec::new(),
        }
    }

    /// The recorded diagnostics and thread-unsafe function names.
    pub fn finish(self) -> (Vec<Diag>, Vec<String>) {
        (self.errors, self.thread_unsafe)
    }

    pub fn add_error(&mut self, error: PrepError, span: Span) {
        self.errors.push(Diag::new(error, span));
    }

    fn type_mismatch(
        &mut self,
        expected: ExprType,
        found: ExprType,
        context: String,
        span: Span,
    ) {
        self.add_error(
            PrepError::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
                context,
                span: span.into(),
            },
            span,
        );
    }

    fn set_thread_unsafe(&mut self, name: &str) {
        if !self.thread_unsafe.iter().any(|n| n == name) {
            self.thread_unsafe.push(name.to_string());
        }
    }

    /// Resolve and annotate `node`, returning its type.
    pub fn prep(&mut self, node: &mut Node, wanted: ExprType, env: &mut VarEnv<'_>) -> ExprType {
        let ty = match node.kind {
            NodeKind::List => self.prep_list(node, env),
            NodeKind::Block => self.prep_block(node, wanted, env),
            NodeKind::IfThenElse { .. } => self.prep_if(node, env),
            NodeKind::Assign { .. } => self.prep_assign(node, env),
            NodeKind::Ternary => self.prep_ternary(node, wanted, env),
            NodeKind::And => self.prep_logical(node, "&&", env),
            NodeKind::Or => self.prep_logical(node, "||", env),
            NodeKind::VecLit => self.prep_vec_lit(node, env),
            NodeKind::Subscript => self.prep_subscript(node, env),
            NodeKind::Unary(op) => self.prep_unary(node, op, wanted, env),
            NodeKind::Compare(op) => self.prep_num_binop(node, op.to_string(), false, env),
            NodeKind::Binary(op) => self.prep_num_binop(node, op.to_string(), true, env),
            NodeKind::Num(_) => FP1,
            NodeKind::Str(_) => ExprType::Str,
            NodeKind::Var { .. } => self.prep_var(node, env),
            NodeKind::Call { .. } => self.prep_call(node, wanted, env),
        };
        node.ty = ty;
        ty
    }

    /// Statement lists and the children of unresolved calls: every child is
    /// prepped with no constraint so nested errors still surface.
    fn prep_list(&mut self, node: &mut Node, env: &mut VarEnv<'_>) -> ExprType {
        let mut error = false;
        for child in &mut node.children {
            error |= !self.prep(child, ExprType::Any, env).is_valid();
        }
        if error {
            ExprType::Error
        } else {
            ExprType::None
        }
    }

    fn prep_block(&mut self, node: &mut Node, wanted: ExprType, env: &mut VarEnv<'_>) -> ExprType {
        let valid = self.prep(&mut node.children[0], ExprType::Any, env).is_valid();
        let ty = self.prep(&mut node.children[1], wanted, env);
        if valid {
            ty
        } else {
            ExprType::Error
        }
    }

    fn prep_if(&mut self, node: &mut Node, env: &mut VarEnv<'_>) -> ExprType {
        let mut error = false;

        let cond_ty = self.prep(&mut node.children[0], FP1, env);
        if !cond_ty.is_valid() {
            error = true;
        } else if !cond_ty.isa(FP1) {
            error = true;
            let span = node.children[0].span;
            self.type_mismatch(FP1, cond_ty, "in condition of if statement".into(), span);
        }

        let (then_changes, then_valid) = {
            let mut branch = env.new_scope();
            let ty = self.prep(&mut node.children[1], ExprType::Any, &mut branch);
            (branch.into_changes(), ty.is_valid())
        };
        let (else_changes, else_valid) = {
            let mut branch = env.new_scope();
            let ty = self.prep(&mut node.children[2], ExprType::Any, &mut branch);
            (branch.into_changes(), ty.is_valid())
        };
        if !then_valid || !else_valid {
            error = true;
        }

        if VarEnv::changes_match(&then_changes, &else_changes) {
            // Promote the then-scope bindings; remember the (then, else) cell
            // pairs so eval can copy values across when the else branch runs.
            let mut merged = Vec::new();
            for (name, binding) in then_changes.iter() {
                if let (Binding::Local(then_var), Some(Binding::Local(else_var))) =
                    (binding, else_changes.get(name))
                {
                    merged.push((Rc::clone(then_var), Rc::clone(else_var)));
                }
            }
            if let NodeKind::IfThenElse { merged: slot } = &mut node.kind {
                *slot = merged;
            }
            env.merge(then_changes);
        } else {
            error = true;
            self.add_error(
                PrepError::BranchMismatch {
                    span: node.span.into(),
                },
                node.span,
            );
        }

        if error {
            ExprType::Error
        } else {
            ExprType::None
        }
    }

    fn prep_assign(&mut self, node: &mut Node, env: &mut VarEnv<'_>) -> ExprType {
        let assigned = self.prep(&mut node.children[0], ExprType::Any, env);
        // The binding is installed even when the right-hand side failed, so a
        // later reference reports one error rather than a second "undefined".
        let var = Rc::new(LocalVar::new(assigned));
        if let NodeKind::Assign { name, var: slot } = &mut node.kind {
            env.add(name.clone(), Binding::Local(Rc::clone(&var)));
            *slot = Some(var);
        }
        if assigned.is_valid() {
            ExprType::None
        } else {
            ExprType::Error
        }
    }

    fn prep_ternary(&mut self, node: &mut Node, wanted: ExprType, env: &mut VarEnv<'_>) -> ExprType {
        let mut error = false;

        let cond_ty = self.prep(&mut node.children[0], FP1, env);
        if !cond_ty.is_valid() {
            error = true;
        } else if !cond_ty.isa(FP1) {
            error = true;
            let span = node.children[0].span;
            self.type_mismatch(
                FP1,
                cond_ty,
                "in condition of ternary expression".into(),
                span,
            );
        }

        let then_ty = self.prep(&mut node.children[1], wanted, env);
        let else_ty = self.prep(&mut node.children[2], wanted, env);

        if !then_ty.is_valid() || !else_ty.is_valid() {
            error = true;
        } else {
            if !then_ty.isa(wanted) {
                error = true;
                let span = node.children[1].span;
                self.type_mismatch(
                    wanted,
                    then_ty,
                    "in then branch of ternary expression".into(),
                    span,
                );
            }
            if !else_ty.isa(wanted) {
                error = true;
                let span = node.children[2].span;
                self.type_mismatch(
                    wanted,
                    else_ty,
                    "in else branch of ternary expression".into(),
                    span,
                );
            }
        }

        if error {
            ExprType::Error
        } else {
            then_ty
        }
    }

    fn prep_logical(&mut self, node: &mut Node, op: &str, env: &mut VarEnv<'_>) -> ExprType {
        let mut error = false;
        for i in 0..2 {
            let ty = self.prep(&mut node.children[i], FP1, env);
            if !ty.is_valid() {
                error = true;
            } else if !ty.isa(FP1) {
                error = true;
                let span = node.children[i].span;
                self.type_mismatch(FP1, ty, format!("in operand {} of `{op}`", i + 1), span);
            }
        }
        if error {
            ExprType::Error
        } else {
            FP1
        }
    }

    fn prep_vec_lit(&mut self, node: &mut Node, env: &mut VarEnv<'_>) -> ExprType {
        let mut error = false;
        let width = node.children.len();
        for i in 0..width {
            let ty = self.prep(&mut node.children[i], FP1, env);
            if !ty.is_valid() {
                error = true;
            } else if !ty.isa(FP1) {
                error = true;
                let span = node.children[i].span;
                self.type_mismatch(
                    FP1,
                    ty,
                    format!("in element {} of vector literal", i + 1),
                    span,
                );
            }
        }
        if error {
            ExprType::Error
        } else {
            ExprType::Fp(width)
        }
    }

    fn prep_subscript(&mut self, node: &mut Node, env: &mut VarEnv<'_>) -> ExprType {
        let mut error = false;

        let vec_ty = self.prep(&mut node.children[0], ExprType::Numeric, env);
        if !vec_ty.is_valid() {
            error = true;
        } else if !vec_ty.isa(ExprType::Numeric) {
            error = true;
            let span = node.children[0].span;
            self.type_mismatch(
                ExprType::Numeric,
                vec_ty,
                "in vector operand of subscript".into(),
                span,
            );
        }

        let index_ty = self.prep(&mut node.children[1], FP1, env);
        if !index_ty.is_valid() {
            error = true;
        } else if !index_ty.isa(FP1) {
            error = true;
            let span = node.children[1].span;
            self.type_mismatch(FP1, index_ty, "in index operand of subscript".into(), span);
        }

        if error {
            ExprType::Error
        } else {
            FP1
        }
    }

    /// Unary operators keep the operand's width, so the wanted type passes
    /// straight through.
    fn prep_unary(
        &mut self,
        node: &mut Node,
        op: UnaryOp,
        wanted: ExprType,
        env: &mut VarEnv<'_>,
    ) -> ExprType {
        let ty = self.prep(&mut node.children[0], wanted, env);
        if ty.is_valid() && !ty.isa(ExprType::Numeric) {
            let span = node.children[0].span;
            self.type_mismatch(
                ExprType::Numeric,
                ty,
                format!("in operand of {} operator", op.describe()),
                span,
            );
            return ExprType::Error;
        }
        ty
    }

    /// Shared arm for comparisons and arithmetic: both operands must be
    /// numeric and width-compatible. Comparisons always produce a scalar;
    /// arithmetic takes the vector side's width.
    fn prep_num_binop(
        &mut self,
        node: &mut Node,
        op: String,
        arithmetic: bool,
        env: &mut VarEnv<'_>,
    ) -> ExprType {
        let mut error = false;
        let mut tys = [ExprType::Error; 2];
        for i in 0..2 {
            let ty = self.prep(&mut node.children[i], ExprType::Numeric, env);
            if !ty.is_valid() {
                error = true;
            } else if !ty.isa(ExprType::Numeric) {
                error = true;
                let span = node.children[i].span;
                self.type_mismatch(
                    ExprType::Numeric,
                    ty,
                    format!("in operand {} of `{op}`", i + 1),
                    span,
                );
            }
            tys[i] = ty;
        }

        if !error && !tys[0].compatible_num(tys[1]) {
            error = true;
            self.add_error(
                PrepError::IncompatibleOperands {
                    op,
                    left: tys[0].to_string(),
                    right: tys[1].to_string(),
                    span: node.span.into(),
                },
                node.span,
            );
        }

        if error {
            ExprType::Error
        } else if arithmetic {
            if tys[0].is_fp1() {
                tys[1]
            } else {
                tys[0]
            }
        } else {
            FP1
        }
    }

    fn prep_var(&mut self, node: &mut Node, env: &mut VarEnv<'_>) -> ExprType {
        let name = match &node.kind {
            NodeKind::Var { name, .. } => name.clone(),
            _ => unreachable!("prep_var on non-var node"),
        };
        let found = env
            .find(&name)
            .or_else(|| self.resolver.resolve_var(&name).map(Binding::External));
        match found {
            None => {
                if let NodeKind::Var { binding: slot, .. } = &mut node.kind {
                    *slot = None;
                }
                self.add_error(
                    PrepError::UndefinedVariable {
                        name,
                        span: node.span.into(),
                    },
                    node.span,
                );
                ExprType::Error
            }
            Some(binding) => {
                let ty = binding.value_type();
                if let NodeKind::Var { binding: slot, .. } = &mut node.kind {
                    // An error-typed binding (from a failed assignment) is
                    // not stored: the type already carries the failure.
                    *slot = ty.is_valid().then_some(binding);
                }
                ty
            }
        }
    }

    fn prep_call(&mut self, node: &mut Node, wanted: ExprType, env: &mut VarEnv<'_>) -> ExprType {
        let name = match &node.kind {
            NodeKind::Call { name, .. } => name.clone(),
            _ => unreachable!("prep_call on non-call node"),
        };

        let resolved = self
            .resolver
            .resolve_func(&name)
            .or_else(|| funcs::lookup(&name));
        let Some(func) = resolved else {
            self.add_error(
                PrepError::UndefinedFunction {
                    name,
                    span: node.span.into(),
                },
                node.span,
            );
            self.prep_list(node, env);
            return ExprType::Error;
        };

        let nargs = node.children.len();
        let mut error = false;
        let mut ty = func.ret_type();

        if nargs < func.min_args() {
            error = true;
            self.add_error(
                PrepError::TooFewArguments {
                    name: name.clone(),
                    expected: func.min_args(),
                    found: nargs,
                    span: node.span.into(),
                },
                node.span,
            );
            self.prep_list(node, env);
        } else if func.max_args().is_some_and(|max| nargs > max) {
            error = true;
            self.add_error(
                PrepError::TooManyArguments {
                    name: name.clone(),
                    expected: func.max_args().unwrap_or(0),
                    found: nargs,
                    span: node.span.into(),
                },
                node.span,
            );
            self.prep_list(node, env);
        } else {
            if let NodeKind::Call { scratch, .. } = &node.kind {
                scratch.vec_args.borrow_mut().resize(nargs, Vec3::ZERO);
                scratch.scalar_args.borrow_mut().resize(nargs, 0.0);
            }
            match func.func_x().cloned() {
                Some(x) => {
                    if !x.is_thread_safe() {
                        self.set_thread_unsafe(&name);
                    }
                    // The handle goes on first so the custom prep can use the
                    // node's argument accessors.
                    if let NodeKind::Call { func: slot, .. } = &mut node.kind {
                        *slot = Some(func.clone());
                    }
                    let custom = x.prep(node, wanted, self, env);
                    if custom.is_valid() {
                        ty = custom;
                    } else {
                        error = true;
                    }
                }
                None => {
                    let arg_wanted = if func.is_scalar() { FP1 } else { FP3 };
                    for i in 0..nargs {
                        let arg_ty = self.prep(&mut node.children[i], arg_wanted, env);
                        if !arg_ty.is_valid() {
                            error = true;
                        } else if !arg_ty.isa(arg_wanted) {
                            error = true;
                            let span = node.children[i].span;
                            self.type_mismatch(
                                arg_wanted,
                                arg_ty,
                                format!("in argument {} of '{name}'", i + 1),
                                span,
                            );
                        }
                    }
                }
            }
        }

        if let NodeKind::Call { func: slot, .. } = &mut node.kind {
            *slot = if error { None } else { Some(func) };
        }
        if error {
            ExprType::Error
        } else {
            ty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExprError;
    use crate::expr::EmptyResolver;
    use crate::parser::parse;

    fn check(src: &str) -> (ExprType, Vec<Diag>) {
        let mut root = parse(src).expect("parse failed");
        let resolver = EmptyResolver;
        let mut checker = TypeChecker::new(&resolver);
        let mut env = VarEnv::new();
        let ty = checker.prep(&mut root, ExprType::Any, &mut env);
        let (errors, _) = checker.finish();
        (ty, errors)
    }

    fn prep_err(src: &str) -> PrepError {
        let (ty, errors) = check(src);
        assert_eq!(ty, ExprType::Error, "expected failed prep for {src:?}");
        match &errors.first().expect("no diagnostics").error {
            ExprError::Prep(e) => e.clone(),
            other => panic!("expected prep error, got {other:?}"),
        }
    }

    #[test]
    fn literals_and_arithmetic_are_scalar() {
        assert_eq!(check("1 + 2 * 3").0, FP1);
        assert_eq!(check("2 ^ 8").0, FP1);
    }

    #[test]
    fn vector_arithmetic_takes_the_vector_width() {
        assert_eq!(check("[1,2,3] + [4,5,6]").0, FP3);
        assert_eq!(check("[1,2,3] + 10").0, FP3);
        assert_eq!(check("10 * [1,2,3]").0, FP3);
    }

    #[test]
    fn comparisons_are_scalar_even_on_vectors() {
        assert_eq!(check("[1,2,3] == [1,2,3]").0, FP1);
        assert_eq!(check("1 < 2").0, FP1);
    }

    #[test]
    fn assignment_binds_and_the_block_types_through() {
        assert_eq!(check("$x = 2; $x * $x").0, FP1);
        assert_eq!(check("$x = [1,2,3]; $x").0, FP3);
    }

    #[test]
    fn undefined_variable_is_reported() {
        assert!(matches!(
            prep_err("$missing"),
            PrepError::UndefinedVariable { name, .. } if name == "missing"
        ));
    }

    #[test]
    fn undefined_function_still_checks_children() {
        let (ty, errors) = check("nosuch($missing)");
        assert_eq!(ty, ExprType::Error);
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            errors[0].error,
            ExprError::Prep(PrepError::UndefinedFunction { .. })
        ));
        assert!(matches!(
            errors[1].error,
            ExprError::Prep(PrepError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn arity_is_enforced() {
        assert!(matches!(prep_err("sin()"), PrepError::TooFewArguments { .. }));
        assert!(matches!(
            prep_err("sin(1, 2)"),
            PrepError::TooManyArguments { expected: 1, found: 2, .. }
        ));
    }

    #[test]
    fn string_operand_is_a_type_mismatch() {
        assert!(matches!(
            prep_err("\"abc\" + 1"),
            PrepError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn scalar_functions_reject_vector_args() {
        assert!(matches!(
            prep_err("sin([1,2,3])"),
            PrepError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn vector_functions_accept_scalars_by_broadcast() {
        assert_eq!(check("length(1)").0, FP1);
        assert_eq!(check("norm([1,2,3])").0, FP3);
    }

    #[test]
    fn if_condition_must_be_scalar() {
        assert!(matches!(
            prep_err("if ([1,2,3]) { $x = 1; } else { $x = 2; } $x"),
            PrepError::TypeMismatch { context, .. } if context.contains("condition of if")
        ));
    }

    #[test]
    fn matching_branches_promote_the_binding() {
        assert_eq!(check("if (1) { $x = 1; } else { $x = 2; } $x").0, FP1);
        assert_eq!(
            check("if (1) { $x = [1,2,3]; } else { $x = [4,5,6]; } $x").0,
            FP3
        );
    }

    #[test]
    fn diverging_branches_are_an_error() {
        assert!(matches!(
            prep_err("if (1) { $x = 1; } else { $x = [1,2,3]; } $x"),
            PrepError::BranchMismatch { .. }
        ));
    }

    #[test]
    fn one_sided_assignment_is_divergence() {
        assert!(matches!(
            prep_err("if (1) { $x = 1; } else { } $x"),
            PrepError::BranchMismatch { .. }
        ));
    }

    #[test]
    fn empty_branches_match() {
        assert_eq!(check("if (1) { } else { } 7").0, FP1);
    }

    #[test]
    fn ternary_branch_must_satisfy_the_wanted_type() {
        // The ternary lands in an if condition, so the wanted type is scalar
        // and the vector then-branch cannot satisfy it.
        assert!(matches!(
            prep_err("if (1 ? [1,2,3] : 2) { } else { } 1"),
            PrepError::TypeMismatch { context, .. } if context.contains("then branch")
        ));
    }

    #[test]
    fn logical_operands_must_be_scalar() {
        assert!(matches!(
            prep_err("[1,2,3] && 1"),
            PrepError::TypeMismatch { context, .. } if context.contains("operand 1")
        ));
    }

    #[test]
    fn subscript_types() {
        assert_eq!(check("[1,2,3][0]").0, FP1);
        assert_eq!(check("5[0]").0, FP1);
        assert!(matches!(
            prep_err("\"s\"[0]"),
            PrepError::TypeMismatch { context, .. } if context.contains("vector operand")
        ));
    }

    #[test]
    fn unary_keeps_the_operand_width() {
        assert_eq!(check("-[1,2,3]").0, FP3);
        assert_eq!(check("!0").0, FP1);
        assert_eq!(check("~0.25").0, FP1);
        assert!(matches!(
            prep_err("-\"abc\""),
            PrepError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn error_nodes_do_not_cascade_extra_diagnostics() {
        // One undefined variable inside an arithmetic chain: exactly one
        // diagnostic, and the error type reaches the root.
        let (ty, errors) = check("1 + $missing * 2");
        assert_eq!(ty, ExprType::Error);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn every_independent_error_is_reported() {
        let (_, errors) = check("$a + $b");
        assert_eq!(errors.len(), 2);
    }
}
