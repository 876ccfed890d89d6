//! Invocation scanner (§4.1).
//!
//! The host grammar has no notion of the `@` sigil, so invocation sites are
//! found lexically - the same comment/string-aware scanning style as
//! [`crate::prepass`] - rather than by asking the CST for a node kind that
//! does not exist. Once every invocation's byte range is known, each one is
//! bound to a **context node** by looking at the freshly parsed tree: find
//! the innermost block (`compound_statement` or `translation_unit`)
//! enclosing the invocation, then take the first child of that block whose
//! end lies after the invocation's start. That single rule covers both
//! halves of the §9 disambiguation contract: if the chosen child's own span
//! already covers the invocation (it starts at or before the invocation),
//! the invocation is bound to the declaration it sits inside; otherwise the
//! chosen child is simply the next sibling.

use crate::cst::CstNode;
use crate::diagnostics::{ByteRange, UppError};
use crate::err_ctx;
use crate::registry::MacroDefinition;

/// One recognized `@name` / `@name(args)` site. `range` is mutable after
/// binding - a macro body may widen `start`/`end` (§3, "mutable invocation
/// range"), and later edit submission always uses the current range.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub macro_name: String,
    pub args: Vec<String>,
    pub range: ByteRange,
    pub context_node: Option<CstNode>,
    /// Position in source order within the phase; the driver processes
    /// invocations in ascending order of this field (equivalently, of
    /// `range.start` at scan time).
    pub ordinal: usize,
}

/// Scans `source` for invocation sites and binds each one's context node
/// against `root`, which must be the CST of this exact `source`.
pub fn scan(source: &str, root: &CstNode) -> Vec<Invocation> {
    let mut invocations = scan_lexical(source);
    bind_contexts(&mut invocations, root);
    invocations
}

/// The lexical half of [`scan`], split out so it can be tested without a
/// real parse.
pub fn scan_lexical(source: &str) -> Vec<Invocation> {
    let mut pos = 0usize;
    let mut state = LexState::Normal;
    let mut invocations = Vec::new();
    let mut ordinal = 0usize;
    let len = source.len();

    while pos < len {
        match state {
            LexState::Normal => {
                if source[pos..].starts_with("//") {
                    state = LexState::LineComment;
                    pos += 2;
                } else if source[pos..].starts_with("/*") {
                    state = LexState::BlockComment;
                    pos += 2;
                } else if source.as_bytes()[pos] == b'"' {
                    state = LexState::StringLit;
                    pos += 1;
                } else if source.as_bytes()[pos] == b'\'' {
                    state = LexState::CharLit;
                    pos += 1;
                } else if source.as_bytes()[pos] == b'@' {
                    if let Some((inv, next)) = try_scan_invocation(source, pos, ordinal) {
                        invocations.push(inv);
                        ordinal += 1;
                        pos = next;
                        continue;
                    }
                    pos += 1;
                } else {
                    pos += char_len_at(source, pos);
                }
            }
            LexState::LineComment => {
                if source.as_bytes()[pos] == b'\n' {
                    state = LexState::Normal;
                }
                pos += char_len_at(source, pos);
            }
            LexState::BlockComment => {
                if source[pos..].starts_with("*/") {
                    pos += 2;
                    state = LexState::Normal;
                } else {
                    pos += char_len_at(source, pos);
                }
            }
            LexState::StringLit => {
                if source.as_bytes()[pos] == b'\\' && pos + 1 < len {
                    pos += 2;
                } else if source.as_bytes()[pos] == b'"' {
                    pos += 1;
                    state = LexState::Normal;
                } else {
                    pos += char_len_at(source, pos);
                }
            }
            LexState::CharLit => {
                if source.as_bytes()[pos] == b'\\' && pos + 1 < len {
                    pos += 2;
                } else if source.as_bytes()[pos] == b'\'' {
                    pos += 1;
                    state = LexState::Normal;
                } else {
                    pos += char_len_at(source, pos);
                }
            }
        }
    }

    invocations
}

/// Binds `context_node` on every invocation against `root`.
pub fn bind_contexts(invocations: &mut [Invocation], root: &CstNode) {
    for inv in invocations.iter_mut() {
        inv.context_node = find_context_node(root, inv.range.start);
    }
}

/// Arity check (§4.1): a single invocation binds exactly one context node
/// regardless of arity, but a parameter-count mismatch is always an error.
pub fn check_arity(inv: &Invocation, def: &MacroDefinition) -> Result<(), UppError> {
    if inv.args.len() != def.arity() {
        return Err(err_ctx!(
            ArityMismatch,
            inv.macro_name.clone(),
            def.arity(),
            inv.args.len(),
            inv.range
        ));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LexState {
    Normal,
    LineComment,
    BlockComment,
    StringLit,
    CharLit,
}

fn char_len_at(source: &str, pos: usize) -> usize {
    source[pos..].chars().next().map(|c| c.len_utf8()).unwrap_or(1)
}

/// Attempts to parse an invocation starting at `source[at] == '@'`. Returns
/// the invocation and the byte offset just past it, or `None` if `@` is not
/// followed by an identifier (not an invocation - leave the `@` untouched).
fn try_scan_invocation(source: &str, at: usize, ordinal: usize) -> Option<(Invocation, usize)> {
    let after_sigil = at + 1;
    if after_sigil >= source.len() {
        return None;
    }
    let rest = &source[after_sigil..];
    let mut name_end = after_sigil;
    for c in rest.chars() {
        if c.is_alphanumeric() || c == '_' {
            name_end += c.len_utf8();
        } else {
            break;
        }
    }
    if name_end == after_sigil {
        return None;
    }
    let name = &source[after_sigil..name_end];
    if name.chars().next().unwrap().is_ascii_digit() {
        return None;
    }
    let name = name.to_string();

    let mut end = name_end;
    let mut args = Vec::new();
    if source[end..].starts_with('(') {
        let (commas, close) = find_arg_list(source, end)?;
        args = split_args(source, end + 1, &commas, close);
        end = close + 1;
    }

    Some((
        Invocation {
            macro_name: name,
            args,
            range: ByteRange { start: at, end },
            context_node: None,
            ordinal,
        },
        end,
    ))
}

/// Scans a `(`-balanced argument list starting at `source[open] == '('`.
/// Returns the byte offsets of every top-level (depth-1) comma plus the
/// offset of the matching `)`, or `None` if unbalanced.
fn find_arg_list(source: &str, open: usize) -> Option<(Vec<usize>, usize)> {
    let bytes = source.as_bytes();
    let mut pos = open + 1;
    let mut depth = 1i32;
    let mut commas = Vec::new();
    while pos < bytes.len() {
        match bytes[pos] {
            b'(' => {
                depth += 1;
                pos += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((commas, pos));
                }
                pos += 1;
            }
            b',' if depth == 1 => {
                commas.push(pos);
                pos += 1;
            }
            b'"' => {
                pos += 1;
                while pos < bytes.len() && bytes[pos] != b'"' {
                    pos += if bytes[pos] == b'\\' { 2 } else { 1 };
                }
                pos += 1;
            }
            b'\'' => {
                pos += 1;
                while pos < bytes.len() && bytes[pos] != b'\'' {
                    pos += if bytes[pos] == b'\\' { 2 } else { 1 };
                }
                pos += 1;
            }
            _ => pos += char_len_at(source, pos),
        }
    }
    None
}

fn split_args(source: &str, args_start: usize, commas: &[usize], close: usize) -> Vec<String> {
    if commas.is_empty() {
        let full = source[args_start..close].trim();
        return if full.is_empty() {
            Vec::new()
        } else {
            vec![full.to_string()]
        };
    }
    let mut args = Vec::new();
    let mut start = args_start;
    for &c in commas {
        args.push(source[start..c].trim().to_string());
        start = c + 1;
    }
    args.push(source[start..close].trim().to_string());
    args
}

fn find_context_node(root: &CstNode, invocation_start: usize) -> Option<CstNode> {
    let block = enclosing_block(root, invocation_start);
    block
        .named_children()
        .into_iter()
        .find(|c| c.end() > invocation_start)
}

/// The innermost `compound_statement`/`field_declaration_list`/
/// `translation_unit` whose span covers `pos`. Shared with
/// [`crate::sandbox`], which walks forward from this same block to
/// implement sequential `upp.consume`. `field_declaration_list` is a block
/// boundary too, so an invocation inside a struct body (e.g. `@fieldsof`)
/// binds to a sibling field rather than jumping out to the enclosing
/// top-level declaration.
pub(crate) fn enclosing_block(root: &CstNode, pos: usize) -> CstNode {
    let anchor = smallest_node_containing(root, pos);
    nearest_block(&anchor)
}

fn smallest_node_containing(node: &CstNode, pos: usize) -> CstNode {
    for child in node.children() {
        if child.start() <= pos && pos < child.end() {
            return smallest_node_containing(&child, pos);
        }
    }
    node.clone()
}

fn nearest_block(node: &CstNode) -> CstNode {
    let mut current = node.clone();
    loop {
        if matches!(
            current.kind(),
            "compound_statement" | "field_declaration_list" | "translation_unit"
        ) {
            return current;
        }
        match current.parent() {
            Some(p) => current = p,
            None => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_c;

    #[test]
    fn scans_name_and_args() {
        let invs = scan_lexical("@foo(1, 2) rest of code");
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].macro_name, "foo");
        assert_eq!(invs[0].args, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(invs[0].range, ByteRange { start: 0, end: 10 });
    }

    #[test]
    fn zero_arg_and_bare_forms() {
        let invs = scan_lexical("@bar() rest @baz rest");
        assert_eq!(invs.len(), 2);
        assert!(invs[0].args.is_empty());
        assert_eq!(invs[1].macro_name, "baz");
        assert!(invs[1].args.is_empty());
    }

    #[test]
    fn nested_parens_inside_an_argument_are_preserved() {
        let invs = scan_lexical("@m(foo(1,2), bar)");
        assert_eq!(invs[0].args, vec!["foo(1,2)".to_string(), "bar".to_string()]);
    }

    #[test]
    fn at_sigil_inside_string_literal_is_not_an_invocation() {
        let invs = scan_lexical("\"@fake\" @real(1)");
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].macro_name, "real");
    }

    #[test]
    fn preserves_source_order_via_ordinal() {
        let invs = scan_lexical("@a() @b() @c()");
        let ordinals: Vec<usize> = invs.iter().map(|i| i.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn context_node_binds_to_next_top_level_declaration() {
        let src = "int a;\nint b;\n";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let gap = src.find("int b").unwrap();
        let ctx = find_context_node(&root, gap).unwrap();
        assert!(ctx.text().starts_with("int b"));
    }

    #[test]
    fn context_node_is_none_past_the_last_top_level_form() {
        let src = "int a;\n";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        assert!(find_context_node(&root, src.len()).is_none());
    }

    #[test]
    fn check_arity_reports_mismatch() {
        let inv = Invocation {
            macro_name: "foo".into(),
            args: vec!["1".into()],
            range: ByteRange { start: 0, end: 6 },
            context_node: None,
            ordinal: 0,
        };
        let def = MacroDefinition {
            name: "foo".into(),
            params: vec![],
            body: String::new(),
            declaring_source: "<test>".into(),
        };
        let err = check_arity(&inv, &def).unwrap_err();
        assert!(matches!(err, UppError::ArityMismatch { .. }));
    }
}
