//! The expression tree.
//!
//! Nodes are built by the parser with the error type and no bindings; the
//! prep pass fills in resolved types, variable bindings, and function
//! handles, and the eval pass walks the finished tree once per sample. The
//! tree is structurally frozen after parsing: prep annotates, never
//! restructures.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::env::{Binding, LocalVar};
use crate::funcs::FuncDef;
use crate::types::ExprType;
use crate::value::Vec3;

/// Source location of a token or node, in bytes plus 1-indexed line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Span {
            start,
            end,
            line,
            column,
        }
    }

    /// Cover both spans, keeping the left-hand line/column.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
            line: self.line,
            column: self.column,
        }
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end.saturating_sub(span.start)).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`: 1 where x is 0, else 0
    Not,
    /// `~x`: 1 - x
    Invert,
}

impl UnaryOp {
    pub fn describe(self) -> &'static str {
        match self {
            UnaryOp::Neg => "negation",
            UnaryOp::Not => "not",
            UnaryOp::Invert => "inversion",
        }
    }
}

/// Scratch storage reserved on a call node by prep and reused by every eval.
#[derive(Debug, Default)]
pub struct CallScratch {
    pub vec_args: RefCell<SmallVec<[Vec3; 4]>>,
    pub scalar_args: RefCell<SmallVec<[f64; 4]>>,
}

pub enum NodeKind {
    /// Statement list; also the body of an if/else branch.
    List,
    /// Two children: a statement list for side effects, then the value.
    Block,
    /// Three children: condition, then-list, else-list. `merged` pairs the
    /// promoted then-branch cells with their else-branch counterparts.
    IfThenElse {
        merged: Vec<(Rc<LocalVar>, Rc<LocalVar>)>,
    },
    /// One child: the right-hand side. `var` is the cell eval writes.
    Assign {
        name: String,
        var: Option<Rc<LocalVar>>,
    },
    /// Three children: condition, then-value, else-value.
    Ternary,
    And,
    Or,
    /// N children, each a scalar lane.
    VecLit,
    /// Two children: operand, index.
    Subscript,
    Unary(UnaryOp),
    Compare(CompareOp),
    Binary(BinaryOp),
    Num(f64),
    Str(String),
    Var {
        name: String,
        binding: Option<Binding>,
    },
    Call {
        name: String,
        func: Option<FuncDef>,
        scratch: CallScratch,
    },
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::List => f.write_str("List"),
            NodeKind::Block => f.write_str("Block"),
            NodeKind::IfThenElse { .. } => f.write_str("IfThenElse"),
            NodeKind::Assign { name, .. } => write!(f, "Assign({name})"),
            NodeKind::Ternary => f.write_str("Ternary"),
            NodeKind::And => f.write_str("And"),
            NodeKind::Or => f.write_str("Or"),
            NodeKind::VecLit => f.write_str("VecLit"),
            NodeKind::Subscript => f.write_str("Subscript"),
            NodeKind::Unary(op) => write!(f, "Unary({op:?})"),
            NodeKind::Compare(op) => write!(f, "Compare({op:?})"),
            NodeKind::Binary(op) => write!(f, "Binary({op:?})"),
            NodeKind::Num(v) => write!(f, "Num({v})"),
            NodeKind::Str(s) => write!(f, "Str({s:?})"),
            NodeKind::Var { name, binding } => {
                write!(f, "Var({name}, bound: {})", binding.is_some())
            }
            NodeKind::Call { name, func, .. } => {
                write!(f, "Call({name}, resolved: {})", func.is_some())
            }
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Resolved by prep; the error type until then.
    pub ty: ExprType,
    pub span: Span,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Node {
            kind,
            ty: ExprType::Error,
            span,
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: NodeKind, span: Span, children: Vec<Node>) -> Self {
        Node {
            kind,
            ty: ExprType::Error,
            span,
            children,
        }
    }

    pub fn child(&self, i: usize) -> &Node {
        &self.children[i]
    }

    /// True when the resolved type is a vector wider than one lane.
    pub fn is_vec(&self) -> bool {
        matches!(self.ty, ExprType::Fp(n) if n > 1)
    }

    /// True when argument `i` of a call is a string literal.
    pub fn is_str_arg(&self, i: usize) -> bool {
        matches!(self.children.get(i).map(|c| &c.kind), Some(NodeKind::Str(_)))
    }

    /// The string literal at argument `i` of a call, if it is one.
    pub fn str_arg(&self, i: usize) -> Option<&str> {
        match self.children.get(i).map(|c| &c.kind) {
            Some(NodeKind::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Constant-fold query for literal nodes. A number literal yields its
    /// value in lane 0; a vector literal whose components are all number
    /// literals yields the folded vector; anything else yields zero. Nothing
    /// in prep or eval depends on this; it exists for hosts that inspect
    /// literal defaults.
    pub fn literal_value(&self) -> Vec3 {
        match &self.kind {
            NodeKind::Num(v) => Vec3::scalar(*v),
            NodeKind::VecLit => {
                let mut out = Vec3::ZERO;
                for (i, child) in self.children.iter().take(3).enumerate() {
                    match child.kind {
                        NodeKind::Num(v) => out[i] = v,
                        _ => return Vec3::ZERO,
                    }
                }
                out
            }
            _ => Vec3::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: f64) -> Node {
        Node::new(NodeKind::Num(v), Span::default())
    }

    #[test]
    fn nodes_start_with_the_error_type() {
        let n = num(1.0);
        assert_eq!(n.ty, ExprType::Error);
        assert!(!n.is_vec());
    }

    #[test]
    fn literal_value_folds_all_numeric_vectors() {
        let vec = Node::with_children(
            NodeKind::VecLit,
            Span::default(),
            vec![num(1.0), num(2.0), num(3.0)],
        );
        assert_eq!(vec.literal_value(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn literal_value_is_zero_when_any_component_is_dynamic() {
        let var = Node::new(
            NodeKind::Var {
                name: "x".into(),
                binding: None,
            },
            Span::default(),
        );
        let vec = Node::with_children(
            NodeKind::VecLit,
            Span::default(),
            vec![num(1.0), var, num(3.0)],
        );
        assert_eq!(vec.literal_value(), Vec3::ZERO);
    }

    #[test]
    fn string_argument_accessors() {
        let call = Node::with_children(
            NodeKind::Call {
                name: "f".into(),
                func: None,
                scratch: CallScratch::default(),
            },
            Span::default(),
            vec![
                Node::new(NodeKind::Str("linear".into()), Span::default()),
                num(2.0),
            ],
        );
        assert!(call.is_str_arg(0));
        assert!(!call.is_str_arg(1));
        assert_eq!(call.str_arg(0), Some("linear"));
        assert_eq!(call.str_arg(1), None);
        assert_eq!(call.str_arg(7), None);
    }

    #[test]
    fn span_join_covers_both_ends() {
        let a = Span::new(0, 3, 1, 1);
        let b = Span::new(8, 12, 1, 9);
        assert_eq!(a.to(b), Span::new(0, 12, 1, 1));
    }
}
