//! Unified diagnostic type for every stage of the preprocessor pipeline.
//!
//! All fallible operations in this crate - the lexical prepass, the
//! invocation scanner, the edit reconciler, the sandbox, and the expansion
//! driver - report through the single [`UppError`] enum below. Two macros,
//! [`err_msg!`] and [`err_ctx!`], keep call sites free of boilerplate: reach
//! for `err_msg!` when there is no source span to attach, `err_ctx!` once
//! you have a [`SourceSpan`] (and, optionally, a help string).
//!
//! The `kind(...)` codes on each variant correspond 1:1 to the diagnostic
//! kinds enumerated in the design: `arity-mismatch`, `consume-type-mismatch`,
//! `edit-conflict`, `unresolved-macro`, `iteration-limit`, `sandbox-error`,
//! `user-error`, plus `syntax-at-boundary` for the lexical prepass.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

/// Byte-range location used throughout the crate. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn as_source_span(&self) -> SourceSpan {
        (self.start, self.end.saturating_sub(self.start)).into()
    }
}

/// Source text plus a name, kept around so diagnostics can render a snippet.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub name: String,
    pub content: Arc<String>,
}

impl SourceContext {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Arc::new(content.into()),
        }
    }

    pub fn to_named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name.clone(), (*self.content).clone())
    }
}

/// The single error type produced anywhere in the engine.
///
/// Every variant carries the data needed to format the `path:line:col:
/// kind: message` diagnostic line required by the external-interface
/// contract, plus a `#[diagnostic]` attribute so `miette`'s fancy renderer
/// can underline the offending span when stderr is a tty.
#[derive(Debug, Error, Diagnostic)]
pub enum UppError {
    #[error("malformed @define: {message}")]
    #[diagnostic(code(upp::syntax_at_boundary))]
    SyntaxAtBoundary {
        message: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("arity mismatch: expected {expected}, got {got}")]
    #[diagnostic(code(upp::arity_mismatch))]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        #[label("invoked here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("consume-type-mismatch: {message}")]
    #[diagnostic(code(upp::consume_type_mismatch))]
    ConsumeTypeMismatch {
        message: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("edit-conflict: overlapping edits")]
    #[diagnostic(code(upp::edit_conflict))]
    EditConflict {
        #[label("first edit")]
        first: SourceSpan,
        #[label("second edit")]
        second: SourceSpan,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("unresolved-macro: no definition for '@{name}'")]
    #[diagnostic(code(upp::unresolved_macro))]
    UnresolvedMacro {
        name: String,
        #[label("invoked here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("iteration-limit: no fixed point after {phases} phases")]
    #[diagnostic(code(upp::iteration_limit))]
    IterationLimit { phases: usize },

    #[error("sandbox-error: {message}")]
    #[diagnostic(code(upp::sandbox_error))]
    SandboxError {
        message: String,
        #[label("invocation")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("user-error: {message}")]
    #[diagnostic(code(upp::user_error))]
    UserError {
        message: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },
}

impl UppError {
    /// Render as the `path:line:col: kind: message` line required by the
    /// external-interface contract, independent of whether stderr is a tty.
    pub fn to_diagnostic_line(&self, path: &str, src: &str) -> String {
        let (span, kind, message) = self.line_parts();
        let (line, col) = span
            .map(|s| byte_offset_to_line_col(src, s.start))
            .unwrap_or((1, 1));
        format!("{path}:{line}:{col}: {kind}: {message}")
    }

    fn line_parts(&self) -> (Option<ByteRange>, &'static str, String) {
        match self {
            UppError::SyntaxAtBoundary { message, span, .. } => (
                span.map(span_to_range),
                "syntax-at-boundary",
                message.clone(),
            ),
            UppError::ArityMismatch {
                expected, got, span, ..
            } => (
                span.map(span_to_range),
                "arity-mismatch",
                format!("expected {expected}, got {got}"),
            ),
            UppError::ConsumeTypeMismatch { message, span, .. } => (
                span.map(span_to_range),
                "consume-type-mismatch",
                message.clone(),
            ),
            UppError::EditConflict { first, .. } => (
                Some(span_to_range(*first)),
                "edit-conflict",
                "conflicting edits over the same range".to_string(),
            ),
            UppError::UnresolvedMacro { name, span, .. } => (
                span.map(span_to_range),
                "unresolved-macro",
                format!("@{name}"),
            ),
            UppError::IterationLimit { phases } => (
                None,
                "iteration-limit",
                format!("exceeded {phases} phases"),
            ),
            UppError::SandboxError { message, span, .. } => {
                (span.map(span_to_range), "sandbox-error", message.clone())
            }
            UppError::UserError { message, span, .. } => {
                (span.map(span_to_range), "user-error", message.clone())
            }
        }
    }
}

fn span_to_range(span: SourceSpan) -> ByteRange {
    ByteRange {
        start: span.offset(),
        end: span.offset() + span.len(),
    }
}

fn byte_offset_to_line_col(src: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(src.len());
    let mut line = 1;
    let mut col = 1;
    for ch in src[..offset].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Build a [`UppError`] with no source span or snippet attached.
///
/// ```ignore
/// return Err(err_msg!(UnresolvedMacro, name = "foo".to_string()));
/// ```
#[macro_export]
macro_rules! err_msg {
    (SyntaxAtBoundary, $msg:expr) => {
        $crate::diagnostics::UppError::SyntaxAtBoundary {
            message: $msg.to_string(),
            span: None,
            src: None,
        }
    };
    (ArityMismatch, $name:expr, $expected:expr, $got:expr) => {
        $crate::diagnostics::UppError::ArityMismatch {
            name: $name.to_string(),
            expected: $expected,
            got: $got,
            span: None,
            src: None,
        }
    };
    (UnresolvedMacro, $name:expr) => {
        $crate::diagnostics::UppError::UnresolvedMacro {
            name: $name.to_string(),
            span: None,
            src: None,
        }
    };
    (IterationLimit, $phases:expr) => {
        $crate::diagnostics::UppError::IterationLimit { phases: $phases }
    };
    (SandboxError, $msg:expr) => {
        $crate::diagnostics::UppError::SandboxError {
            message: $msg.to_string(),
            span: None,
            src: None,
        }
    };
    (UserError, $msg:expr) => {
        $crate::diagnostics::UppError::UserError {
            message: $msg.to_string(),
            span: None,
            src: None,
        }
    };
    (ConsumeTypeMismatch, $msg:expr) => {
        $crate::diagnostics::UppError::ConsumeTypeMismatch {
            message: $msg.to_string(),
            span: None,
            src: None,
        }
    };
}

/// Build a [`UppError`] with a source span (and, optionally, a pre-rendered
/// source snippet) attached, for errors that point at a specific location.
#[macro_export]
macro_rules! err_ctx {
    (SyntaxAtBoundary, $msg:expr, $range:expr) => {
        $crate::diagnostics::UppError::SyntaxAtBoundary {
            message: $msg.to_string(),
            span: Some(($range.start, $range.end.saturating_sub($range.start)).into()),
            src: None,
        }
    };
    (ArityMismatch, $name:expr, $expected:expr, $got:expr, $range:expr) => {
        $crate::diagnostics::UppError::ArityMismatch {
            name: $name.to_string(),
            expected: $expected,
            got: $got,
            span: Some(($range.start, $range.end.saturating_sub($range.start)).into()),
            src: None,
        }
    };
    (ConsumeTypeMismatch, $msg:expr, $range:expr) => {
        $crate::diagnostics::UppError::ConsumeTypeMismatch {
            message: $msg.to_string(),
            span: Some(($range.start, $range.end.saturating_sub($range.start)).into()),
            src: None,
        }
    };
    (EditConflict, $first:expr, $second:expr) => {
        $crate::diagnostics::UppError::EditConflict {
            first: ($first.start, $first.end.saturating_sub($first.start)).into(),
            second: ($second.start, $second.end.saturating_sub($second.start)).into(),
            src: None,
        }
    };
    (UnresolvedMacro, $name:expr, $range:expr) => {
        $crate::diagnostics::UppError::UnresolvedMacro {
            name: $name.to_string(),
            span: Some(($range.start, $range.end.saturating_sub($range.start)).into()),
            src: None,
        }
    };
    (SandboxError, $msg:expr, $range:expr) => {
        $crate::diagnostics::UppError::SandboxError {
            message: $msg.to_string(),
            span: Some(($range.start, $range.end.saturating_sub($range.start)).into()),
            src: None,
        }
    };
    (UserError, $msg:expr, $range:expr) => {
        $crate::diagnostics::UppError::UserError {
            message: $msg.to_string(),
            span: Some(($range.start, $range.end.saturating_sub($range.start)).into()),
            src: None,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_diagnostic_line_with_line_and_column() {
        let src = "line one\nline two @bad";
        let err = err_ctx!(
            UnresolvedMacro,
            "bad",
            ByteRange {
                start: 9 + 9,
                end: 9 + 13
            }
        );
        let line = err.to_diagnostic_line("file.c", src);
        assert!(line.starts_with("file.c:2:"));
        assert!(line.contains("unresolved-macro"));
    }

    #[test]
    fn byte_range_overlap_detection() {
        let a = ByteRange { start: 0, end: 5 };
        let b = ByteRange { start: 4, end: 8 };
        let c = ByteRange { start: 5, end: 8 };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
