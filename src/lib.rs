//! An embeddable scalar/vector expression language for graphics pipelines.
//!
//! Artists write short expressions; the host preps them once (typing and name
//! resolution) and evaluates them once per sample (pixel, particle, vertex).
//! Values are 3-lane float vectors with scalar broadcast, scoping is lexical,
//! `&&`/`||` short-circuit, and the intrinsic table is extensible through a
//! registry and a host resolver.
//!
//! ```
//! use vexl::Expression;
//!
//! let mut e = Expression::new("$x = 2; $x * [1, 2, 3]");
//! assert!(e.prep());
//! assert_eq!(e.evaluate(), vexl::Vec3::new(2.0, 4.0, 6.0));
//! ```

pub mod ast;
pub mod builtins;
pub mod env;
pub mod errors;
pub mod eval;
pub mod expr;
pub mod funcs;
pub mod parser;
pub mod prep;
pub mod types;
pub mod value;

pub use ast::{BinaryOp, CompareOp, Node, NodeKind, Span, UnaryOp};
pub use env::{Binding, LocalVar, ScopeChanges, VarEnv, VarRef};
pub use errors::{Diag, ExprError, ParseError, PrepError};
pub use eval::{eval, eval_arg};
pub use expr::{EmptyResolver, Expression, Resolver};
pub use funcs::{FuncDef, FuncImpl, FuncRegistry, FuncX};
pub use prep::TypeChecker;
pub use types::{ExprType, FP1, FP3};
pub use value::Vec3;
