//! Diagnostics for the parse and prep phases.
//!
//! Neither phase aborts on the first failure: every problem is recorded as a
//! [`Diag`] on the owning expression and the offending node is demoted to the
//! error type, so a user sees every independent mistake in one pass.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::ast::Span;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParseError {
    #[error("unexpected token {found}")]
    #[diagnostic(code(E1001))]
    UnexpectedToken {
        found: String,
        #[label("unexpected")]
        span: SourceSpan,
    },

    #[error("expected {expected}, found {found}")]
    #[diagnostic(code(E1002))]
    ExpectedToken {
        expected: String,
        found: String,
        #[label("expected {expected}")]
        span: SourceSpan,
    },

    #[error("unterminated string literal")]
    #[diagnostic(code(E1003))]
    UnterminatedString {
        #[label("string starts here")]
        span: SourceSpan,
    },

    #[error("vector literal must have exactly 3 components")]
    #[diagnostic(code(E1004))]
    BadVectorArity {
        #[label("expected [x, y, z]")]
        span: SourceSpan,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum PrepError {
    #[error("expected {expected} {context}, found {found}")]
    #[diagnostic(code(E2001))]
    TypeMismatch {
        expected: String,
        found: String,
        context: String,
        #[label("type mismatch")]
        span: SourceSpan,
    },

    #[error("operands of `{op}` have incompatible types {left} and {right}")]
    #[diagnostic(code(E2002))]
    IncompatibleOperands {
        op: String,
        left: String,
        right: String,
        #[label("incompatible widths")]
        span: SourceSpan,
    },

    #[error("undefined variable '${name}'")]
    #[diagnostic(code(E2003))]
    UndefinedVariable {
        name: String,
        #[label("not found in scope")]
        span: SourceSpan,
    },

    #[error("undefined function '{name}'")]
    #[diagnostic(code(E2004))]
    UndefinedFunction {
        name: String,
        #[label("no definition")]
        span: SourceSpan,
    },

    #[error("too few arguments to '{name}': expected at least {expected}, found {found}")]
    #[diagnostic(code(E2005))]
    TooFewArguments {
        name: String,
        expected: usize,
        found: usize,
        #[label("wrong number of arguments")]
        span: SourceSpan,
    },

    #[error("too many arguments to '{name}': expected at most {expected}, found {found}")]
    #[diagnostic(code(E2006))]
    TooManyArguments {
        name: String,
        expected: usize,
        found: usize,
        #[label("wrong number of arguments")]
        span: SourceSpan,
    },

    #[error("if and else branches bind variables with mismatched types")]
    #[diagnostic(code(E2007))]
    BranchMismatch {
        #[label("branches disagree")]
        span: SourceSpan,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ExprError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Prep(#[from] PrepError),
}

/// A recorded diagnostic: the error plus the source span it anchors to.
#[derive(Debug, Clone)]
pub struct Diag {
    pub error: ExprError,
    pub span: Span,
}

impl Diag {
    pub fn new(error: impl Into<ExprError>, span: Span) -> Self {
        Diag {
            error: error.into(),
            span,
        }
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_with_context() {
        let err = PrepError::TypeMismatch {
            expected: "Float".into(),
            found: "Float[3]".into(),
            context: "in condition of if statement".into(),
            span: (0, 1).into(),
        };
        assert_eq!(
            err.to_string(),
            "expected Float in condition of if statement, found Float[3]"
        );

        let err = PrepError::UndefinedVariable {
            name: "u".into(),
            span: (0, 1).into(),
        };
        assert_eq!(err.to_string(), "undefined variable '$u'");
    }

    #[test]
    fn diag_wraps_both_phases() {
        let parse = Diag::new(
            ParseError::UnterminatedString { span: (2, 1).into() },
            Span::new(2, 3, 1, 3),
        );
        assert!(matches!(parse.error, ExprError::Parse(_)));
        let prep = Diag::new(
            PrepError::BranchMismatch { span: (0, 4).into() },
            Span::new(0, 4, 1, 1),
        );
        assert!(matches!(prep.error, ExprError::Prep(_)));
        assert!(!prep.message().is_empty());
    }
}
