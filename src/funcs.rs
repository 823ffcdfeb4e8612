//! Function descriptors and the registry the prep pass resolves calls against.
//!
//! A call site is resolved to a [`FuncDef`]: the declared return type, the
//! accepted argument count, and the callable behind one of the signature tags
//! in [`FuncImpl`]. Most intrinsics are plain function pointers dispatched
//! uniformly by eval; extended functions ([`FuncX`]) supply their own prep and
//! eval and consume their argument nodes directly.
//!
//! Resolution order at a call site: the host resolver first, then the
//! process-wide registry. The process-wide table is seeded with the builtin
//! math library on first use.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use rustc_hash::FxHashMap;

use crate::ast::Node;
use crate::env::VarEnv;
use crate::prep::TypeChecker;
use crate::types::{ExprType, FP1, FP3};
use crate::value::Vec3;

/// An intrinsic that performs its own argument checking and evaluation.
///
/// `prep` is handed the whole call node and must prep the argument children
/// itself (via [`TypeChecker::prep`]), returning the call's resolved type.
/// `eval` pulls argument values with [`crate::eval::eval_arg`] or the string
/// accessors on [`Node`].
pub trait FuncX: Send + Sync {
    /// Extended functions that keep mutable internal state report false;
    /// the owning expression records the name so hosts can serialize.
    fn is_thread_safe(&self) -> bool {
        true
    }

    fn prep(
        &self,
        node: &mut Node,
        wanted: ExprType,
        checker: &mut TypeChecker<'_>,
        env: &mut VarEnv<'_>,
    ) -> ExprType;

    fn eval(&self, node: &Node, result: &mut Vec3);
}

/// Signature tag plus callable. Scalar-argument kinds (`Func0`..`FuncN`) are
/// called once per lane when a scalar function lands in a vector context;
/// vector kinds receive whole values, and the `*Vv` kinds write all three
/// result lanes in one call.
#[derive(Clone)]
pub enum FuncImpl {
    Func0(fn() -> f64),
    Func1(fn(f64) -> f64),
    Func2(fn(f64, f64) -> f64),
    Func3(fn(f64, f64, f64) -> f64),
    Func4(fn(f64, f64, f64, f64) -> f64),
    Func5(fn(f64, f64, f64, f64, f64) -> f64),
    Func6(fn(f64, f64, f64, f64, f64, f64) -> f64),
    FuncN(fn(&[f64]) -> f64),
    Func1v(fn(Vec3) -> f64),
    Func2v(fn(Vec3, Vec3) -> f64),
    FuncNv(fn(&[Vec3]) -> f64),
    Func1vv(fn(Vec3) -> Vec3),
    Func2vv(fn(Vec3, Vec3) -> Vec3),
    FuncNvv(fn(&[Vec3]) -> Vec3),
    FuncX(Arc<dyn FuncX>),
}

impl FuncImpl {
    /// True for the kinds whose arguments are prepped against the scalar
    /// type and fed to the callable one lane at a time.
    pub fn takes_scalar_args(&self) -> bool {
        matches!(
            self,
            FuncImpl::Func0(_)
                | FuncImpl::Func1(_)
                | FuncImpl::Func2(_)
                | FuncImpl::Func3(_)
                | FuncImpl::Func4(_)
                | FuncImpl::Func5(_)
                | FuncImpl::Func6(_)
                | FuncImpl::FuncN(_)
        )
    }
}

impl fmt::Debug for FuncImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FuncImpl::Func0(_) => "Func0",
            FuncImpl::Func1(_) => "Func1",
            FuncImpl::Func2(_) => "Func2",
            FuncImpl::Func3(_) => "Func3",
            FuncImpl::Func4(_) => "Func4",
            FuncImpl::Func5(_) => "Func5",
            FuncImpl::Func6(_) => "Func6",
            FuncImpl::FuncN(_) => "FuncN",
            FuncImpl::Func1v(_) => "Func1v",
            FuncImpl::Func2v(_) => "Func2v",
            FuncImpl::FuncNv(_) => "FuncNv",
            FuncImpl::Func1vv(_) => "Func1vv",
            FuncImpl::Func2vv(_) => "Func2vv",
            FuncImpl::FuncNvv(_) => "FuncNvv",
            FuncImpl::FuncX(_) => "FuncX",
        })
    }
}

/// A resolved function: return type, arity bounds, and the callable.
#[derive(Debug, Clone)]
pub struct FuncDef {
    ret: ExprType,
    min_args: usize,
    /// `None` means unbounded.
    max_args: Option<usize>,
    imp: FuncImpl,
}

impl FuncDef {
    pub fn func0(f: fn() -> f64) -> Self {
        Self::fixed(FP1, 0, FuncImpl::Func0(f))
    }

    pub fn func1(f: fn(f64) -> f64) -> Self {
        Self::fixed(FP1, 1, FuncImpl::Func1(f))
    }

    pub fn func2(f: fn(f64, f64) -> f64) -> Self {
        Self::fixed(FP1, 2, FuncImpl::Func2(f))
    }

    pub fn func3(f: fn(f64, f64, f64) -> f64) -> Self {
        Self::fixed(FP1, 3, FuncImpl::Func3(f))
    }

    pub fn func4(f: fn(f64, f64, f64, f64) -> f64) -> Self {
        Self::fixed(FP1, 4, FuncImpl::Func4(f))
    }

    pub fn func5(f: fn(f64, f64, f64, f64, f64) -> f64) -> Self {
        Self::fixed(FP1, 5, FuncImpl::Func5(f))
    }

    pub fn func6(f: fn(f64, f64, f64, f64, f64, f64) -> f64) -> Self {
        Self::fixed(FP1, 6, FuncImpl::Func6(f))
    }

    pub fn funcn(f: fn(&[f64]) -> f64, min_args: usize, max_args: Option<usize>) -> Self {
        FuncDef {
            ret: FP1,
            min_args,
            max_args,
            imp: FuncImpl::FuncN(f),
        }
    }

    pub fn func1v(f: fn(Vec3) -> f64) -> Self {
        Self::fixed(FP1, 1, FuncImpl::Func1v(f))
    }

    pub fn func2v(f: fn(Vec3, Vec3) -> f64) -> Self {
        Self::fixed(FP1, 2, FuncImpl::Func2v(f))
    }

    pub fn funcnv(f: fn(&[Vec3]) -> f64, min_args: usize, max_args: Option<usize>) -> Self {
        FuncDef {
            ret: FP1,
            min_args,
            max_args,
            imp: FuncImpl::FuncNv(f),
        }
    }

    pub fn func1vv(f: fn(Vec3) -> Vec3) -> Self {
        Self::fixed(FP3, 1, FuncImpl::Func1vv(f))
    }

    pub fn func2vv(f: fn(Vec3, Vec3) -> Vec3) -> Self {
        Self::fixed(FP3, 2, FuncImpl::Func2vv(f))
    }

    pub fn funcnvv(f: fn(&[Vec3]) -> Vec3, min_args: usize, max_args: Option<usize>) -> Self {
        FuncDef {
            ret: FP3,
            min_args,
            max_args,
            imp: FuncImpl::FuncNvv(f),
        }
    }

    pub fn funcx(
        f: Arc<dyn FuncX>,
        ret: ExprType,
        min_args: usize,
        max_args: Option<usize>,
    ) -> Self {
        FuncDef {
            ret,
            min_args,
            max_args,
            imp: FuncImpl::FuncX(f),
        }
    }

    fn fixed(ret: ExprType, nargs: usize, imp: FuncImpl) -> Self {
        FuncDef {
            ret,
            min_args: nargs,
            max_args: Some(nargs),
            imp,
        }
    }

    pub fn ret_type(&self) -> ExprType {
        self.ret
    }

    pub fn min_args(&self) -> usize {
        self.min_args
    }

    pub fn max_args(&self) -> Option<usize> {
        self.max_args
    }

    pub fn imp(&self) -> &FuncImpl {
        &self.imp
    }

    pub fn is_scalar(&self) -> bool {
        self.imp.takes_scalar_args()
    }

    pub fn func_x(&self) -> Option<&Arc<dyn FuncX>> {
        match &self.imp {
            FuncImpl::FuncX(x) => Some(x),
            _ => None,
        }
    }

    pub fn is_thread_safe(&self) -> bool {
        match &self.imp {
            FuncImpl::FuncX(x) => x.is_thread_safe(),
            _ => true,
        }
    }
}

/// A name → descriptor table. Hosts that want isolation from the process-wide
/// table build their own and resolve through [`crate::expr::Resolver`].
#[derive(Debug, Default)]
pub struct FuncRegistry {
    funcs: FxHashMap<String, FuncDef>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the builtin math library.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        crate::builtins::register_all(&mut reg);
        reg
    }

    pub fn register(&mut self, name: &str, def: FuncDef) {
        self.funcs.insert(name.to_string(), def);
    }

    pub fn lookup(&self, name: &str) -> Option<FuncDef> {
        self.funcs.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(|s| s.as_str())
    }
}

static REGISTRY: OnceLock<RwLock<FuncRegistry>> = OnceLock::new();

fn global() -> &'static RwLock<FuncRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(FuncRegistry::with_builtins()))
}

/// Add or replace a descriptor in the process-wide registry.
pub fn register(name: &str, def: FuncDef) {
    let mut reg = global().write().unwrap_or_else(|e| e.into_inner());
    reg.register(name, def);
}

/// Look up a descriptor in the process-wide registry.
pub fn lookup(name: &str) -> Option<FuncDef> {
    let reg = global().read().unwrap_or_else(|e| e.into_inner());
    reg.lookup(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(x: f64) -> f64 {
        x * 2.0
    }

    #[test]
    fn fixed_arity_constructors() {
        let def = FuncDef::func1(double);
        assert_eq!(def.ret_type(), FP1);
        assert_eq!(def.min_args(), 1);
        assert_eq!(def.max_args(), Some(1));
        assert!(def.is_scalar());
        assert!(def.is_thread_safe());
    }

    #[test]
    fn variadic_and_vector_constructors() {
        fn sum(args: &[f64]) -> f64 {
            args.iter().sum()
        }
        let def = FuncDef::funcn(sum, 1, None);
        assert_eq!(def.max_args(), None);
        assert!(def.is_scalar());

        let def = FuncDef::func1vv(Vec3::normalized);
        assert_eq!(def.ret_type(), FP3);
        assert!(!def.is_scalar());
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut reg = FuncRegistry::new();
        assert!(reg.lookup("dbl").is_none());
        reg.register("dbl", FuncDef::func1(double));
        let def = reg.lookup("dbl").expect("registered");
        assert!(matches!(def.imp(), FuncImpl::Func1(_)));
    }

    #[test]
    fn process_wide_registry_serves_builtins() {
        assert!(lookup("sin").is_some());
        assert!(lookup("no_such_function").is_none());
    }

    #[test]
    fn registered_functions_shadow_builtins() {
        register("test_shadow_abs", FuncDef::func1(double));
        assert!(matches!(
            lookup("test_shadow_abs").unwrap().imp(),
            FuncImpl::Func1(_)
        ));
    }
}
