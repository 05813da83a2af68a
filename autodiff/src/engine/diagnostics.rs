//! Differentiability diagnostics: severity, spans, notes, caret rendering.

use super::ir::Span;
use std::fmt;

pub const NOT_DIFFERENTIABLE: &str = "function is not differentiable";
pub const NON_DIFFERENTIABLE_RESULT: &str =
    "cannot differentiate through a non-differentiable result; do you want to use 'withoutDerivative(at:)'?";
pub const GLOBAL_WRITE: &str = "cannot differentiate writes to global variables";
pub const INOUT: &str = "cannot differentiate through 'inout' arguments";
pub const ENUM: &str = "differentiating enum values is not yet supported";
pub const OPAQUE: &str =
    "cannot differentiate functions that have not been marked '@differentiable' and that are defined in other files";
pub const CLASS_MEMBER: &str =
    "member is not differentiable because the corresponding class member is not '@differentiable'";
pub const PROTOCOL_REQUIREMENT: &str =
    "member is not differentiable because the corresponding protocol requirement is not '@differentiable'";
pub const NO_DERIVATIVE_FIELD: &str =
    "cannot differentiate through a '@noDerivative' stored property; do you want to use 'withoutDerivative(at:)'?";
pub const NONDIFF_PARAM: &str = "cannot differentiate with respect to a '@nondiff' parameter";
pub const MISSING_RETURN: &str = "missing return for differentiation";
pub const CALL_SITE: &str = "when differentiating this function call";
pub const NONVARIED_RESULT: &str = "result does not depend on differentiation arguments and will always have a zero derivative; do you want to use 'withoutDerivative(at:)'?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A secondary message attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub message: String,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message, span)
        }
    }

    pub fn with_note(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.notes.push(Note {
            message: message.into(),
            span,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Whether this diagnostic or one of its notes says `message`.
    pub fn mentions(&self, message: &str) -> bool {
        self.message == message || self.notes.iter().any(|note| note.message == message)
    }

    /// Renders the diagnostic against `source`, with a caret line under
    /// each span that falls inside it.
    pub fn render(&self, source: &str) -> String {
        let mut out = format!("{}: {}", self.severity, self.message);
        push_snippet(&mut out, source, self.span.as_ref());
        for note in &self.notes {
            out.push_str(&format!("\nnote: {}", note.message));
            push_snippet(&mut out, source, note.span.as_ref());
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        for note in &self.notes {
            write!(f, "\n  note: {}", note.message)?;
        }
        Ok(())
    }
}

struct Location {
    line: usize,
    col: usize,
}

fn offset_to_loc(src: &str, offset: usize) -> Location {
    let before = &src[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    Location { line, col }
}

fn push_snippet(out: &mut String, src: &str, span: Option<&Span>) {
    let Some(span) = span else { return };
    if span.start > src.len() || !src.is_char_boundary(span.start) {
        return;
    }
    let line_start = src[..span.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = src[span.start..]
        .find('\n')
        .map_or(src.len(), |i| span.start + i);
    let loc = offset_to_loc(src, span.start);
    let caret_len = span.end.min(line_end).saturating_sub(span.start).max(1);
    out.push_str(&format!(
        "\n--> line {}, col {}\n{}\n{}{}",
        loc.line,
        loc.col,
        &src[line_start..line_end],
        " ".repeat(span.start - line_start),
        "^".repeat(caret_len)
    ));
}

/// A rejected differentiation request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{summary}{}", render_notes(.diagnostics))]
pub struct DifferentiationError {
    pub summary: String,
    pub diagnostics: Vec<Diagnostic>,
}

fn render_notes(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| format!("\n{diagnostic}"))
        .collect()
}

impl DifferentiationError {
    /// Whether any diagnostic says `message`, as primary text or note.
    pub fn mentions(&self, message: &str) -> bool {
        self.diagnostics.iter().any(|d| d.mentions(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_carets_under_spans() {
        let src = "fn f(x) {\n  g(x)\n}";
        let diag = Diagnostic::error(NOT_DIFFERENTIABLE, Some(0..4)).with_note(CALL_SITE, Some(12..16));
        let rendered = diag.render(src);
        assert_eq!(
            rendered,
            "error: function is not differentiable\n--> line 1, col 1\nfn f(x) {\n^^^^\n\
             note: when differentiating this function call\n--> line 2, col 3\n  g(x)\n  ^^^^"
        );
    }

    #[test]
    fn spans_outside_the_source_are_skipped() {
        let diag = Diagnostic::warning(NONVARIED_RESULT, Some(100..101));
        assert_eq!(diag.render("x"), format!("warning: {NONVARIED_RESULT}"));
    }

    #[test]
    fn errors_list_every_note() {
        let err = DifferentiationError {
            summary: "cannot differentiate 'f'".into(),
            diagnostics: vec![Diagnostic::error(NOT_DIFFERENTIABLE, None).with_note(INOUT, None)],
        };
        let text = err.to_string();
        assert!(text.starts_with("cannot differentiate 'f'\nerror: function is not differentiable"));
        assert!(text.contains(INOUT));
        assert!(err.mentions(INOUT));
        assert!(!err.mentions(ENUM));
    }
}
