//! Parser adapter.
//!
//! Wraps the external, black-box CST parser - `tree-sitter` with the C
//! grammar - behind the small surface the rest of the engine needs: parse
//! text, get back a [`crate::cst::Cst`] snapshot, or a
//! [`crate::diagnostics::UppError`] if tree-sitter could not produce a
//! tree at all (it essentially never fails outright; malformed input shows
//! up as `ERROR`/`MISSING` nodes inside the tree rather than a `Result::Err`,
//! which downstream components are free to inspect via `kind()`).

use std::sync::Arc;

use crate::cst::Cst;
use crate::diagnostics::UppError;
use crate::err_msg;

/// Parse `source` as a C translation unit and return an owned CST snapshot.
pub fn parse_c(source: &str) -> Result<Arc<Cst>, UppError> {
    let mut parser = tree_sitter::Parser::new();
    let language = tree_sitter_c::language();
    parser
        .set_language(&language)
        .map_err(|e| err_msg!(SandboxError, format!("failed to load C grammar: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| err_msg!(SandboxError, "tree-sitter produced no tree"))?;

    Ok(Arc::new(Cst::from_tree_sitter(&tree, Arc::new(source.to_string()))))
}

/// True if `source` parsed without any `ERROR`/`MISSING` node. Macro authors
/// are responsible for well-formed output (non-goal: the engine does not
/// guarantee emitted output is well-formed), but this is useful for tests
/// and for the CLI's `--verbose` summary.
pub fn has_parse_errors(cst: &Cst) -> bool {
    let mut found = false;
    cst.root().walk(|n| {
        if n.kind() == "ERROR" || n.kind() == "MISSING" {
            found = true;
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_translation_unit() {
        let cst = parse_c("int main(void) { return 0; }").unwrap();
        assert!(!has_parse_errors(&cst));
        assert_eq!(cst.root().kind(), "translation_unit");
    }
}
