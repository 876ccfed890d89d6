//! CST pattern matching (§4.7).
//!
//! Two matchers share this module: `query`'s s-expression form (node kinds
//! and field names, tree-sitter-query-flavored) and the linearized textual
//! form `matchReplace` uses (`if ($cond) $then__NOT_compound_statement;`).
//! The linearized form is implemented by substituting each `$name`
//! placeholder with a synthetic identifier, running the *real* parser over
//! the result, and structurally diffing the resulting pattern tree against
//! candidate nodes - reusing the grammar rather than hand-rolling a second
//! tokenizer for host-language syntax.

use std::collections::HashMap;

use crate::cst::CstNode;
use crate::diagnostics::UppError;
use crate::err_msg;
use crate::parser::parse_c;

/// A parsed s-expression query pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Node {
        kind: Option<String>,
        children: Vec<(Option<String>, Pattern)>,
        capture: Option<String>,
    },
    Wildcard {
        capture: Option<String>,
    },
}

fn set_capture(pattern: &mut Pattern, name: String) {
    match pattern {
        Pattern::Node { capture, .. } => *capture = Some(name),
        Pattern::Wildcard { capture } => *capture = Some(name),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Colon,
    Ident(String),
    Capture(String),
}

fn tokenize(src: &str) -> Vec<Token> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == ':' {
            tokens.push(Token::Colon);
            i += 1;
        } else if c == '@' {
            let start = i + 1;
            let mut j = start;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            tokens.push(Token::Capture(chars[start..j].iter().collect()));
            i = j;
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            tokens.push(Token::Ident(chars[start..j].iter().collect()));
            i = j;
        } else {
            i += 1;
        }
    }
    tokens
}

struct Tokens {
    items: Vec<Token>,
    pos: usize,
}

impl Tokens {
    fn peek(&self) -> Option<&Token> {
        self.items.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.items.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }
}

/// Parses a full s-expression query pattern, e.g.
/// `(call_expression function: (identifier) @id)`.
pub fn parse_query_pattern(src: &str) -> Result<Pattern, UppError> {
    let mut tokens = Tokens {
        items: tokenize(src),
        pos: 0,
    };
    let mut pattern = parse_pattern(&mut tokens)?;
    if let Some(Token::Capture(name)) = tokens.peek().cloned() {
        tokens.bump();
        set_capture(&mut pattern, name);
    }
    if tokens.peek().is_some() {
        return Err(err_msg!(UserError, "trailing tokens after query pattern"));
    }
    Ok(pattern)
}

fn parse_pattern(tokens: &mut Tokens) -> Result<Pattern, UppError> {
    match tokens.bump() {
        Some(Token::LParen) => {
            let kind = match tokens.bump() {
                Some(Token::Ident(k)) => k,
                _ => {
                    return Err(err_msg!(
                        UserError,
                        "expected a node kind after '(' in query pattern"
                    ))
                }
            };
            let mut children = Vec::new();
            loop {
                match tokens.peek() {
                    Some(Token::RParen) => {
                        tokens.bump();
                        break;
                    }
                    Some(Token::Ident(_)) => {
                        let ident = match tokens.bump() {
                            Some(Token::Ident(s)) => s,
                            _ => unreachable!(),
                        };
                        if matches!(tokens.peek(), Some(Token::Colon)) {
                            tokens.bump();
                            let mut child = parse_pattern(tokens)?;
                            if let Some(Token::Capture(name)) = tokens.peek().cloned() {
                                tokens.bump();
                                set_capture(&mut child, name);
                            }
                            children.push((Some(ident), child));
                        } else if ident == "_" {
                            let mut child = Pattern::Wildcard { capture: None };
                            if let Some(Token::Capture(name)) = tokens.peek().cloned() {
                                tokens.bump();
                                set_capture(&mut child, name);
                            }
                            children.push((None, child));
                        } else {
                            return Err(err_msg!(
                                UserError,
                                format!("unexpected bare identifier '{ident}' in query pattern")
                            ));
                        }
                    }
                    Some(Token::LParen) => {
                        let mut child = parse_pattern(tokens)?;
                        if let Some(Token::Capture(name)) = tokens.peek().cloned() {
                            tokens.bump();
                            set_capture(&mut child, name);
                        }
                        children.push((None, child));
                    }
                    _ => return Err(err_msg!(UserError, "unterminated query pattern")),
                }
            }
            Ok(Pattern::Node {
                kind: Some(kind),
                children,
                capture: None,
            })
        }
        Some(Token::Ident(s)) if s == "_" => Ok(Pattern::Wildcard { capture: None }),
        _ => Err(err_msg!(UserError, "expected '(' or '_' in query pattern")),
    }
}

fn matches_shallow(pattern: &Pattern, node: &CstNode) -> bool {
    match pattern {
        Pattern::Wildcard { .. } => true,
        Pattern::Node { kind, .. } => kind.as_deref().map_or(true, |k| node.kind() == k),
    }
}

fn match_node(pattern: &Pattern, node: &CstNode, captures: &mut HashMap<String, CstNode>) -> bool {
    match pattern {
        Pattern::Wildcard { capture } => {
            if let Some(name) = capture {
                captures.insert(name.clone(), node.clone());
            }
            true
        }
        Pattern::Node {
            kind,
            children,
            capture,
        } => {
            if let Some(k) = kind {
                if node.kind() != k {
                    return false;
                }
            }
            let named = node.named_children();
            let mut cursor = 0usize;
            for (field, child_pattern) in children {
                let candidate = match field {
                    Some(f) => node.child_for_field_name(f),
                    None => {
                        let found = named[cursor..]
                            .iter()
                            .position(|c| matches_shallow(child_pattern, c));
                        found.map(|offset| {
                            let idx = cursor + offset;
                            cursor = idx + 1;
                            named[idx].clone()
                        })
                    }
                };
                let Some(candidate) = candidate else {
                    return false;
                };
                if !match_node(child_pattern, &candidate, captures) {
                    return false;
                }
            }
            if let Some(name) = capture {
                captures.insert(name.clone(), node.clone());
            }
            true
        }
    }
}

/// Runs an s-expression `pattern` against every node in the subtree rooted
/// at `root`, returning one capture map per match.
pub fn query(
    pattern_src: &str,
    root: &CstNode,
) -> Result<Vec<HashMap<String, CstNode>>, UppError> {
    let pattern = parse_query_pattern(pattern_src)?;
    let mut results = Vec::new();
    root.walk(|n| {
        let mut captures = HashMap::new();
        if match_node(&pattern, n, &mut captures) {
            results.push(captures);
        }
    });
    Ok(results)
}

struct PlaceholderSpec {
    name: String,
    not_type: Option<String>,
}

fn substitute_placeholders(src: &str) -> (String, HashMap<String, PlaceholderSpec>) {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut placeholders = HashMap::new();
    let mut i = 0;
    let mut counter = 0usize;
    while i < chars.len() {
        if chars[i] == '$' {
            let start = i + 1;
            let mut j = start;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let raw: String = chars[start..j].iter().collect();
            let (name, not_type) = match raw.find("__NOT_") {
                Some(idx) => (raw[..idx].to_string(), Some(raw[idx + 6..].to_string())),
                None => (raw.clone(), None),
            };
            let synthetic = format!("uppcap{counter}");
            counter += 1;
            placeholders.insert(synthetic.clone(), PlaceholderSpec { name, not_type });
            out.push_str(&synthetic);
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    (out, placeholders)
}

fn placeholder_spec<'a>(
    node: &CstNode,
    placeholders: &'a HashMap<String, PlaceholderSpec>,
) -> Option<&'a PlaceholderSpec> {
    if node.kind() == "identifier" {
        return placeholders.get(node.text());
    }
    if node.kind() == "expression_statement" {
        let children = node.named_children();
        if children.len() == 1 && children[0].kind() == "identifier" {
            return placeholders.get(children[0].text());
        }
    }
    None
}

fn structural_match(
    pattern: &CstNode,
    candidate: &CstNode,
    placeholders: &HashMap<String, PlaceholderSpec>,
    captures: &mut HashMap<String, CstNode>,
) -> bool {
    if let Some(spec) = placeholder_spec(pattern, placeholders) {
        if let Some(not_type) = &spec.not_type {
            if candidate.kind() == not_type.as_str() {
                return false;
            }
        }
        captures.insert(spec.name.clone(), candidate.clone());
        return true;
    }
    if pattern.kind() != candidate.kind() {
        return false;
    }
    let pattern_children = pattern.named_children();
    let candidate_children = candidate.named_children();
    if pattern_children.len() != candidate_children.len() {
        return false;
    }
    pattern_children
        .iter()
        .zip(candidate_children.iter())
        .all(|(p, c)| structural_match(p, c, placeholders, captures))
}

/// Parses `pattern_src` (with `$name`/`$name__NOT_TYPE` placeholders) once,
/// then matches it against either every node in the subtree (`deep`) or
/// only `root`'s direct children.
pub fn find_text_pattern_matches(
    pattern_src: &str,
    root: &CstNode,
    deep: bool,
) -> Result<Vec<(CstNode, HashMap<String, CstNode>)>, UppError> {
    let (placeholder_source, placeholders) = substitute_placeholders(pattern_src);
    let cst = parse_c(&placeholder_source)
        .map_err(|e| err_msg!(UserError, format!("matchReplace pattern did not parse: {e}")))?;
    let pattern_root = cst.root();
    let pattern_node = pattern_root.named_children().into_iter().next().ok_or_else(|| {
        err_msg!(UserError, "matchReplace pattern did not parse to any node")
    })?;

    let mut results = Vec::new();
    let mut visit = |n: &CstNode| {
        let mut captures = HashMap::new();
        if structural_match(&pattern_node, n, &placeholders, &mut captures) {
            results.push((n.clone(), captures));
        }
    };
    if deep {
        root.walk(visit);
    } else {
        for child in root.children() {
            visit(&child);
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_matches_call_expressions_and_binds_callee() {
        let cst = parse_c("foo(1); bar(2);").unwrap();
        let root = cst.root();
        let matches = query("(call_expression function: (identifier) @id)", &root).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["id"].text(), "foo");
        assert_eq!(matches[1]["id"].text(), "bar");
    }

    #[test]
    fn query_wildcard_binds_either_operand() {
        let cst = parse_c("int x = 1 + 2;").unwrap();
        let root = cst.root();
        let matches = query(
            "(binary_expression left: (_) @l right: (_) @r)",
            &root,
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["l"].text(), "1");
        assert_eq!(matches[0]["r"].text(), "2");
    }

    #[test]
    fn text_pattern_matches_non_compound_consequence() {
        let cst = parse_c("if (x) return 1;").unwrap();
        let root = cst.root();
        let matches = find_text_pattern_matches(
            "if ($cond) $then__NOT_compound_statement;",
            &root,
            false,
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1["cond"].text(), "x");
        assert_eq!(matches[0].1["then"].kind(), "return_statement");
    }

    #[test]
    fn text_pattern_rejects_compound_consequence() {
        let cst = parse_c("if (x) { return 1; }").unwrap();
        let root = cst.root();
        let matches =
            find_text_pattern_matches("if ($cond) $then__NOT_compound_statement;", &root, false)
                .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn deep_search_finds_nested_matches() {
        let cst = parse_c("void f(void) { if (1) { if (2) return 3; } }").unwrap();
        let root = cst.root();
        let matches =
            find_text_pattern_matches("if ($cond) $then__NOT_compound_statement;", &root, true)
                .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1["cond"].text(), "2");
    }
}
