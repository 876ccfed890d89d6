//! Lexical prepass: finds and lifts `@define name(params) { body }` blocks
//! out of the raw source text before the host grammar ever sees them.
//!
//! The host's CST parser has no notion of `@define`; per the external
//! interfaces contract, macro definitions are "captured verbatim by a
//! lexical preprocess that balances `{…}`" rather than by the real parser.
//! This module is a small hand-rolled scanner - comment- and string-aware so
//! it does not mistake an `@define`-looking run of text inside a string
//! literal or a `//`/`/* */` comment for a real definition, and brace- and
//! nesting-aware so a body containing its own `{ }` blocks is captured in
//! full. Malformed input here is a *syntax-at-boundary* error (§7.1): fatal,
//! reported before any parse is attempted.
//!
//! Consumed regions are replaced with a matching run of newlines rather
//! than deleted outright, so line numbers in the remaining buffer stay
//! aligned with the original file for diagnostics.

use crate::diagnostics::{ByteRange, UppError};
use crate::err_ctx;
use crate::registry::MacroDefinition;

/// Result of running the prepass over one source file.
pub struct PrepassResult {
    /// Macro definitions found, in source order.
    pub definitions: Vec<MacroDefinition>,
    /// The buffer with every `@define` block blanked out. This is the
    /// initial working buffer the expansion driver parses.
    pub cleaned_source: String,
}

/// Extracts every `@define` block in `source`, returning the definitions
/// and a cleaned buffer with those blocks replaced by blank lines.
pub fn run(source: &str, declaring_source: &str) -> Result<PrepassResult, UppError> {
    let mut scanner = Scanner::new(source);
    let mut out = String::with_capacity(source.len());
    let mut definitions = Vec::new();

    loop {
        let before = scanner.pos;
        match scanner.state {
            State::Normal => {
                if scanner.starts_with("//") {
                    out.push_str(&source[scanner.pos..scanner.pos + 2]);
                    scanner.pos += 2;
                    scanner.state = State::LineComment;
                } else if scanner.starts_with("/*") {
                    out.push_str(&source[scanner.pos..scanner.pos + 2]);
                    scanner.pos += 2;
                    scanner.state = State::BlockComment;
                } else if scanner.peek() == Some('"') {
                    out.push('"');
                    scanner.bump();
                    scanner.state = State::StringLit;
                } else if scanner.peek() == Some('\'') {
                    out.push('\'');
                    scanner.bump();
                    scanner.state = State::CharLit;
                } else if scanner.at_word("@define") {
                    let start = scanner.pos;
                    let (def, newlines) = parse_define(&mut scanner, source, declaring_source)?;
                    definitions.push(def);
                    for _ in 0..newlines {
                        out.push('\n');
                    }
                    let _ = start;
                } else if let Some(c) = scanner.bump() {
                    out.push(c);
                } else {
                    break;
                }
            }
            State::LineComment => {
                if let Some(c) = scanner.bump() {
                    out.push(c);
                    if c == '\n' {
                        scanner.state = State::Normal;
                    }
                } else {
                    break;
                }
            }
            State::BlockComment => {
                if scanner.starts_with("*/") {
                    out.push_str("*/");
                    scanner.pos += 2;
                    scanner.state = State::Normal;
                } else if let Some(c) = scanner.bump() {
                    out.push(c);
                } else {
                    break;
                }
            }
            State::StringLit => {
                if scanner.peek() == Some('\\') {
                    out.push('\\');
                    scanner.bump();
                    if let Some(c) = scanner.bump() {
                        out.push(c);
                    }
                } else if let Some(c) = scanner.bump() {
                    out.push(c);
                    if c == '"' {
                        scanner.state = State::Normal;
                    }
                } else {
                    break;
                }
            }
            State::CharLit => {
                if scanner.peek() == Some('\\') {
                    out.push('\\');
                    scanner.bump();
                    if let Some(c) = scanner.bump() {
                        out.push(c);
                    }
                } else if let Some(c) = scanner.bump() {
                    out.push(c);
                    if c == '\'' {
                        scanner.state = State::Normal;
                    }
                } else {
                    break;
                }
            }
        }
        if scanner.pos == before && scanner.eof() {
            break;
        }
    }

    Ok(PrepassResult {
        definitions,
        cleaned_source: out,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    LineComment,
    BlockComment,
    StringLit,
    CharLit,
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    state: State,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            state: State::Normal,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.src[self.pos..].starts_with(pat)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// Matches a bare keyword at the current position with a word boundary
    /// on both sides (so `@defined` does not match `@define`).
    fn at_word(&self, word: &str) -> bool {
        if !self.starts_with(word) {
            return false;
        }
        let after = &self.src[self.pos + word.len()..];
        let before_ok = self.pos == 0
            || !self.src[..self.pos]
                .chars()
                .next_back()
                .map(is_ident_char)
                .unwrap_or(false);
        let after_ok = !after.chars().next().map(is_ident_char).unwrap_or(false);
        before_ok && after_ok
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_define(
    scanner: &mut Scanner,
    full_source: &str,
    declaring_source: &str,
) -> Result<(MacroDefinition, usize), UppError> {
    let def_start = scanner.pos;
    scanner.pos += "@define".len();
    scanner.skip_ws();

    let name_start = scanner.pos;
    while matches!(scanner.peek(), Some(c) if is_ident_char(c)) {
        scanner.bump();
    }
    if scanner.pos == name_start {
        return Err(boundary_error(
            "@define must be followed by a macro name",
            def_start,
            scanner.pos,
        ));
    }
    let name = full_source[name_start..scanner.pos].to_string();
    scanner.skip_ws();

    if scanner.peek() != Some('(') {
        return Err(boundary_error(
            "@define name must be followed by '(' parameter list ')'",
            def_start,
            scanner.pos,
        ));
    }
    scanner.bump();
    let params_start = scanner.pos;
    let mut depth = 1usize;
    while depth > 0 {
        match scanner.bump() {
            Some('(') => depth += 1,
            Some(')') => depth -= 1,
            Some(_) => {}
            None => {
                return Err(boundary_error(
                    "unbalanced '(' in @define parameter list",
                    def_start,
                    scanner.pos,
                ))
            }
        }
    }
    let params_text = &full_source[params_start..scanner.pos - 1];
    let params: Vec<String> = if params_text.trim().is_empty() {
        Vec::new()
    } else {
        params_text
            .split(',')
            .map(|p| p.trim().to_string())
            .collect()
    };

    scanner.skip_ws();
    if scanner.peek() != Some('{') {
        return Err(boundary_error(
            "@define parameter list must be followed by '{ body }'",
            def_start,
            scanner.pos,
        ));
    }
    scanner.bump();
    let body_start = scanner.pos;
    let body_end = scan_balanced_body(scanner, def_start)?;
    let body = full_source[body_start..body_end].to_string();

    let consumed = &full_source[def_start..scanner.pos];
    let newlines = consumed.chars().filter(|&c| c == '\n').count();

    Ok((
        MacroDefinition {
            name,
            params,
            body,
            declaring_source: declaring_source.to_string(),
        },
        newlines,
    ))
}

/// Scans a `{`-balanced body (comment/string aware, like the top-level
/// scanner) and leaves `scanner.pos` just past the matching closing `}`.
/// Returns the byte offset of that closing `}` (exclusive end of the body).
fn scan_balanced_body(scanner: &mut Scanner, def_start: usize) -> Result<usize, UppError> {
    let mut depth = 1usize;
    loop {
        if scanner.starts_with("//") {
            scanner.pos += 2;
            while !matches!(scanner.peek(), Some('\n') | None) {
                scanner.bump();
            }
            continue;
        }
        if scanner.starts_with("/*") {
            scanner.pos += 2;
            while !scanner.starts_with("*/") {
                if scanner.bump().is_none() {
                    return Err(boundary_error(
                        "unterminated block comment in @define body",
                        def_start,
                        scanner.pos,
                    ));
                }
            }
            scanner.pos += 2;
            continue;
        }
        match scanner.peek() {
            Some('"') => {
                scanner.bump();
                loop {
                    match scanner.peek() {
                        Some('\\') => {
                            scanner.bump();
                            scanner.bump();
                        }
                        Some('"') => {
                            scanner.bump();
                            break;
                        }
                        Some(_) => {
                            scanner.bump();
                        }
                        None => {
                            return Err(boundary_error(
                                "unterminated string literal in @define body",
                                def_start,
                                scanner.pos,
                            ))
                        }
                    }
                }
            }
            Some('\'') => {
                scanner.bump();
                loop {
                    match scanner.peek() {
                        Some('\\') => {
                            scanner.bump();
                            scanner.bump();
                        }
                        Some('\'') => {
                            scanner.bump();
                            break;
                        }
                        Some(_) => {
                            scanner.bump();
                        }
                        None => {
                            return Err(boundary_error(
                                "unterminated char literal in @define body",
                                def_start,
                                scanner.pos,
                            ))
                        }
                    }
                }
            }
            Some('{') => {
                depth += 1;
                scanner.bump();
            }
            Some('}') => {
                let end = scanner.pos;
                scanner.bump();
                depth -= 1;
                if depth == 0 {
                    return Ok(end);
                }
            }
            Some(_) => {
                scanner.bump();
            }
            None => {
                return Err(boundary_error(
                    "unbalanced '{' in @define body",
                    def_start,
                    scanner.pos,
                ))
            }
        }
    }
}

fn boundary_error(message: &str, start: usize, end: usize) -> UppError {
    err_ctx!(SyntaxAtBoundary, message, ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_definition() {
        let src = "@define double(x) { return x * 2; }\nint y;";
        let result = run(src, "<test>").unwrap();
        assert_eq!(result.definitions.len(), 1);
        let def = &result.definitions[0];
        assert_eq!(def.name, "double");
        assert_eq!(def.params, vec!["x".to_string()]);
        assert!(def.body.contains("return x * 2;"));
        assert!(result.cleaned_source.contains("int y;"));
        assert!(!result.cleaned_source.contains("@define"));
    }

    #[test]
    fn preserves_line_count() {
        let src = "@define foo() {\n  return 1;\n}\nint y;";
        let result = run(src, "<test>").unwrap();
        assert_eq!(
            result.cleaned_source.matches('\n').count(),
            src.matches('\n').count()
        );
    }

    #[test]
    fn nested_braces_in_body_are_balanced() {
        let src = "@define foo() { if (1) { return 2; } return 0; }\nint z;";
        let result = run(src, "<test>").unwrap();
        assert_eq!(result.definitions.len(), 1);
        assert!(result.definitions[0].body.contains("if (1) { return 2; }"));
    }

    #[test]
    fn ignores_at_define_inside_string_literal() {
        let src = "const char *s = \"@define not real\";\nint y;";
        let result = run(src, "<test>").unwrap();
        assert!(result.definitions.is_empty());
        assert!(result.cleaned_source.contains("@define not real"));
    }

    #[test]
    fn zero_arg_macro_has_empty_param_list() {
        let src = "@define go() { return 1; }";
        let result = run(src, "<test>").unwrap();
        assert!(result.definitions[0].params.is_empty());
    }

    #[test]
    fn unbalanced_body_is_syntax_at_boundary_error() {
        let src = "@define foo() { return 1;";
        let err = run(src, "<test>").unwrap_err();
        assert!(matches!(err, UppError::SyntaxAtBoundary { .. }));
    }
}
