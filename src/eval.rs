//! The tree-walking evaluator.
//!
//! Called once per sample on a successfully prepped tree. Scalar nodes write
//! only lane 0 of the out-parameter; vector consumers broadcast scalar
//! children by their static type. Eval never fails: numeric pathologies
//! follow IEEE, and the floored modulus yields 0 on a zero divisor.

use crate::ast::{BinaryOp, CompareOp, Node, NodeKind, UnaryOp};
use crate::funcs::{FuncDef, FuncImpl};
use crate::value::Vec3;

/// Floored modulus: `a - floor(a/b)*b`, 0 when `b` is 0.
fn nice_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a - (a / b).floor() * b
    }
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => nice_mod(a, b),
        BinaryOp::Pow => a.powf(b),
    }
}

fn apply_unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Not => {
            if x == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        UnaryOp::Invert => 1.0 - x,
    }
}

/// Evaluate an argument of a call node, broadcasting scalar children so all
/// three lanes are usable. This is the accessor extended functions use.
pub fn eval_arg(node: &Node, i: usize) -> Vec3 {
    let child = node.child(i);
    let mut v = Vec3::ZERO;
    eval(child, &mut v);
    if child.is_vec() {
        v
    } else {
        v.broadcast()
    }
}

/// Evaluate `node` into `result`.
pub fn eval(node: &Node, result: &mut Vec3) {
    match &node.kind {
        NodeKind::List => {
            let mut tmp = Vec3::ZERO;
            for child in &node.children {
                eval(child, &mut tmp);
            }
            *result = Vec3::ZERO;
        }

        NodeKind::Block => {
            let mut tmp = Vec3::ZERO;
            eval(node.child(0), &mut tmp);
            eval(node.child(1), result);
        }

        NodeKind::IfThenElse { merged } => {
            let mut cond = Vec3::ZERO;
            eval(node.child(0), &mut cond);
            let mut tmp = Vec3::ZERO;
            if cond[0] != 0.0 {
                eval(node.child(1), &mut tmp);
            } else {
                eval(node.child(2), &mut tmp);
                // The promoted cells are the then-branch's; carry the else
                // values across so statements after the if read this branch.
                for (then_var, else_var) in merged {
                    then_var.set_value(else_var.value());
                }
            }
            *result = Vec3::ZERO;
        }

        NodeKind::Assign { var, .. } => {
            if let Some(var) = var {
                let mut v = Vec3::ZERO;
                eval(node.child(0), &mut v);
                var.set_value(v);
            } else {
                *result = Vec3::ZERO;
            }
        }

        NodeKind::Ternary => {
            let mut cond = Vec3::ZERO;
            eval(node.child(0), &mut cond);
            let picked = if cond[0] != 0.0 {
                node.child(1)
            } else {
                node.child(2)
            };
            eval(picked, result);
            if node.is_vec() && !picked.is_vec() {
                *result = result.broadcast();
            }
        }

        NodeKind::And => {
            let mut a = Vec3::ZERO;
            eval(node.child(0), &mut a);
            if a[0] == 0.0 {
                result[0] = 0.0;
            } else {
                let mut b = Vec3::ZERO;
                eval(node.child(1), &mut b);
                result[0] = f64::from(b[0] != 0.0);
            }
        }

        NodeKind::Or => {
            let mut a = Vec3::ZERO;
            eval(node.child(0), &mut a);
            if a[0] != 0.0 {
                result[0] = 1.0;
            } else {
                let mut b = Vec3::ZERO;
                eval(node.child(1), &mut b);
                result[0] = f64::from(b[0] != 0.0);
            }
        }

        NodeKind::VecLit => {
            if node.is_vec() {
                let mut v = Vec3::ZERO;
                for (i, child) in node.children.iter().take(3).enumerate() {
                    eval(child, &mut v);
                    result[i] = v[0];
                }
            } else {
                eval(node.child(0), result);
            }
        }

        NodeKind::Subscript => {
            let mut a = Vec3::ZERO;
            let mut b = Vec3::ZERO;
            eval(node.child(0), &mut a);
            eval(node.child(1), &mut b);
            let idx = b[0].floor();
            result[0] = if !(0.0..=2.0).contains(&idx) {
                0.0
            } else if node.child(0).is_vec() {
                a[idx as usize]
            } else {
                a[0]
            };
        }

        NodeKind::Unary(op) => {
            let mut a = Vec3::ZERO;
            eval(node.child(0), &mut a);
            result[0] = apply_unary(*op, a[0]);
            if node.is_vec() {
                result[1] = apply_unary(*op, a[1]);
                result[2] = apply_unary(*op, a[2]);
            }
        }

        NodeKind::Compare(op) => {
            let mut a = Vec3::ZERO;
            let mut b = Vec3::ZERO;
            eval(node.child(0), &mut a);
            eval(node.child(1), &mut b);
            result[0] = match op {
                CompareOp::Eq | CompareOp::Ne => {
                    if !node.child(0).is_vec() {
                        a = a.broadcast();
                    }
                    if !node.child(1).is_vec() {
                        b = b.broadcast();
                    }
                    let eq = a[0] == b[0] && a[1] == b[1] && a[2] == b[2];
                    f64::from(if *op == CompareOp::Eq { eq } else { !eq })
                }
                CompareOp::Lt => f64::from(a[0] < b[0]),
                CompareOp::Gt => f64::from(a[0] > b[0]),
                CompareOp::Le => f64::from(a[0] <= b[0]),
                CompareOp::Ge => f64::from(a[0] >= b[0]),
            };
        }

        NodeKind::Binary(op) => {
            let mut a = Vec3::ZERO;
            let mut b = Vec3::ZERO;
            eval(node.child(0), &mut a);
            eval(node.child(1), &mut b);
            if !node.is_vec() {
                result[0] = apply_binary(*op, a[0], b[0]);
            } else {
                if !node.child(0).is_vec() {
                    a = a.broadcast();
                }
                if !node.child(1).is_vec() {
                    b = b.broadcast();
                }
                for i in 0..3 {
                    result[i] = apply_binary(*op, a[i], b[i]);
                }
            }
        }

        NodeKind::Num(v) => result[0] = *v,

        // Consumed only through the string accessors of a call node.
        NodeKind::Str(_) => *result = Vec3::ZERO,

        NodeKind::Var { binding, .. } => {
            *result = match binding {
                Some(binding) => binding.eval(),
                None => Vec3::ZERO,
            };
        }

        NodeKind::Call { func, scratch, .. } => {
            let Some(func) = func else {
                *result = Vec3::ZERO;
                return;
            };
            if let Some(x) = func.func_x() {
                x.eval(node, result);
                return;
            }
            eval_standard_call(node, func, scratch, result);
        }
    }
}

fn eval_standard_call(
    node: &Node,
    func: &FuncDef,
    scratch: &crate::ast::CallScratch,
    result: &mut Vec3,
) {
    // A scalar function in a vector context runs once per lane.
    let niter = if node.is_vec() && func.is_scalar() {
        3
    } else {
        1
    };

    let mut args = scratch.vec_args.borrow_mut();
    for (i, child) in node.children.iter().enumerate() {
        let mut v = Vec3::ZERO;
        eval(child, &mut v);
        args[i] = if child.is_vec() { v } else { v.broadcast() };
    }

    for i in 0..niter {
        match func.imp() {
            FuncImpl::Func0(f) => result[i] = f(),
            FuncImpl::Func1(f) => result[i] = f(args[0][i]),
            FuncImpl::Func2(f) => result[i] = f(args[0][i], args[1][i]),
            FuncImpl::Func3(f) => result[i] = f(args[0][i], args[1][i], args[2][i]),
            FuncImpl::Func4(f) => {
                result[i] = f(args[0][i], args[1][i], args[2][i], args[3][i])
            }
            FuncImpl::Func5(f) => {
                result[i] = f(args[0][i], args[1][i], args[2][i], args[3][i], args[4][i])
            }
            FuncImpl::Func6(f) => {
                result[i] = f(
                    args[0][i], args[1][i], args[2][i], args[3][i], args[4][i], args[5][i],
                )
            }
            FuncImpl::FuncN(f) => {
                let mut flat = scratch.scalar_args.borrow_mut();
                for (n, arg) in args.iter().enumerate() {
                    flat[n] = arg[i];
                }
                result[i] = f(&flat[..]);
            }
            FuncImpl::Func1v(f) => result[i] = f(args[0]),
            FuncImpl::Func2v(f) => result[i] = f(args[0], args[1]),
            FuncImpl::FuncNv(f) => result[i] = f(&args[..]),
            FuncImpl::Func1vv(f) => *result = f(args[0]),
            FuncImpl::Func2vv(f) => *result = f(args[0], args[1]),
            FuncImpl::FuncNvv(f) => *result = f(&args[..]),
            FuncImpl::FuncX(_) => unreachable!("extended functions dispatch above"),
        }
    }
}
