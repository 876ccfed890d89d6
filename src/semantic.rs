//! Semantic services (§4.5): a deliberately lightweight identifier
//! resolver over the CST - definition lookup, reference enumeration, type
//! extraction, function signatures. These are approximations sized to what
//! the `upp` runtime API and the bundled standard macros need, not a real
//! semantic analysis pass; the engine does not type-check the host
//! language (§1 non-goals).

use crate::cst::CstNode;

/// `{ returnType, name, params }` as produced by `getFunctionSignature`.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub return_type: String,
    pub name: String,
    pub params: Vec<String>,
}

fn is_scope_node(kind: &str) -> bool {
    matches!(
        kind,
        "compound_statement" | "translation_unit" | "field_declaration_list" | "function_definition"
    )
}

/// Nearest enclosing scope-bearing node: compound statement, function
/// (so parameter declarations are visible to the body), translation unit,
/// or record body.
pub fn enclosing_scope(node: &CstNode) -> CstNode {
    let mut current = node.parent();
    while let Some(n) = current {
        if is_scope_node(n.kind()) {
            return n;
        }
        current = n.parent();
    }
    node.root()
}

/// Every definition identifier introduced directly within `scope` (not in
/// any nested scope).
pub fn definitions_in_scope(scope: &CstNode) -> Vec<CstNode> {
    let mut defs = Vec::new();
    match scope.kind() {
        "function_definition" => {
            if let Some(declarator) = scope.child_for_field_name("declarator") {
                collect_parameter_definitions(&declarator, &mut defs);
            }
        }
        "field_declaration_list" | "compound_statement" | "translation_unit" => {
            for child in scope.named_children() {
                collect_declaration_definitions(&child, &mut defs);
            }
        }
        _ => {}
    }
    defs
}

/// Resolves a reference identifier to the definition it refers to, walking
/// outward through enclosing scopes until one has a matching spelling.
pub fn get_definition(reference: &CstNode) -> Option<CstNode> {
    let name = reference.text();
    let mut scope = enclosing_scope(reference);
    loop {
        for def in definitions_in_scope(&scope) {
            if def.text() == name {
                return Some(def);
            }
        }
        if scope.kind() == "translation_unit" {
            return None;
        }
        scope = enclosing_scope(&scope);
    }
}

/// Every identifier node in the translation unit that resolves to
/// `def_node`. Shadowing-aware by construction, since resolution always
/// walks from the reference's own scope outward.
pub fn find_references(def_node: &CstNode) -> Vec<CstNode> {
    let root = def_node.root();
    let mut refs = Vec::new();
    root.walk(|n| {
        if n.kind() == "identifier" && n.id() != def_node.id() && n.text() == def_node.text() {
            if let Some(resolved) = get_definition(n) {
                if resolved.id() == def_node.id() {
                    refs.push(n.clone());
                }
            }
        }
    });
    refs
}

/// Textual type expression for a definition, e.g. `"const int *"`.
/// Falls back to `"void *"` when the surrounding structure isn't one of
/// the recognized declaration shapes.
pub fn get_type(def_node: &CstNode) -> String {
    let mut node = def_node.clone();
    let mut suffix = String::new();
    loop {
        let Some(parent) = node.parent() else {
            return "void *".to_string();
        };
        match parent.kind() {
            "pointer_declarator" => {
                suffix.push('*');
                node = parent;
            }
            "array_declarator" => {
                suffix.push_str("[]");
                node = parent;
            }
            "init_declarator" | "parenthesized_declarator" | "function_declarator" => {
                node = parent;
            }
            _ => break,
        }
    }

    let Some(decl) = node.parent() else {
        return "void *".to_string();
    };
    if !matches!(
        decl.kind(),
        "declaration" | "parameter_declaration" | "field_declaration"
    ) {
        return "void *".to_string();
    }

    let base_type = decl
        .child_for_field_name("type")
        .map(|t| t.text().to_string())
        .unwrap_or_else(|| "void".to_string());

    let prefixes: Vec<String> = decl
        .named_children()
        .into_iter()
        .filter(|c| matches!(c.kind(), "type_qualifier" | "storage_class_specifier"))
        .map(|c| c.text().to_string())
        .collect();

    let mut result = String::new();
    if !prefixes.is_empty() {
        result.push_str(&prefixes.join(" "));
        result.push(' ');
    }
    result.push_str(&base_type);
    if !suffix.is_empty() {
        result.push(' ');
        result.push_str(&suffix);
    }
    result
}

/// `{ returnType, name, params }` for a `function_definition` node.
pub fn get_function_signature(fn_node: &CstNode) -> FunctionSignature {
    let return_type = fn_node
        .child_for_field_name("type")
        .map(|t| t.text().to_string())
        .unwrap_or_else(|| "void".to_string());

    let declarator = fn_node.child_for_field_name("declarator");
    let name = declarator
        .as_ref()
        .and_then(innermost_identifier)
        .map(|n| n.text().to_string())
        .unwrap_or_default();

    let params = declarator
        .as_ref()
        .and_then(find_parameter_list)
        .map(|list| {
            list.named_children()
                .into_iter()
                .filter(|p| p.kind() == "parameter_declaration")
                .map(|p| p.text().to_string())
                .collect()
        })
        .unwrap_or_default();

    FunctionSignature {
        return_type,
        name,
        params,
    }
}

/// Nearest ancestor of `node` whose kind is `kind`.
pub fn find_enclosing(node: &CstNode, kind: &str) -> Option<CstNode> {
    let mut current = node.parent();
    while let Some(n) = current {
        if n.kind() == kind {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

fn is_declarator_shape(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "field_identifier"
            | "pointer_declarator"
            | "array_declarator"
            | "function_declarator"
            | "init_declarator"
            | "parenthesized_declarator"
            | "abstract_pointer_declarator"
    )
}

/// Descends through declarator wrappers (pointer/array/init/function/
/// parenthesized) to the identifier a declarator ultimately names.
fn innermost_identifier(node: &CstNode) -> Option<CstNode> {
    match node.kind() {
        "identifier" | "field_identifier" | "type_identifier" => Some(node.clone()),
        _ => node
            .child_for_field_name("declarator")
            .and_then(|c| innermost_identifier(&c))
            .or_else(|| {
                node.named_children()
                    .into_iter()
                    .find_map(|c| innermost_identifier(&c))
            }),
    }
}

fn find_parameter_list(node: &CstNode) -> Option<CstNode> {
    if node.kind() == "function_declarator" {
        return node.child_for_field_name("parameters");
    }
    node.named_children()
        .into_iter()
        .find_map(|c| find_parameter_list(&c))
}

fn collect_parameter_definitions(declarator: &CstNode, out: &mut Vec<CstNode>) {
    let Some(params) = find_parameter_list(declarator) else {
        return;
    };
    for p in params.named_children() {
        if p.kind() == "parameter_declaration" {
            if let Some(d) = p.child_for_field_name("declarator") {
                if let Some(id) = innermost_identifier(&d) {
                    out.push(id);
                }
            }
        }
    }
}

fn collect_declaration_definitions(node: &CstNode, out: &mut Vec<CstNode>) {
    match node.kind() {
        "declaration" | "field_declaration" => {
            for child in node.named_children() {
                if is_declarator_shape(child.kind()) {
                    if let Some(id) = innermost_identifier(&child) {
                        out.push(id);
                    }
                }
            }
        }
        "type_definition" => {
            if let Some(d) = node.child_for_field_name("declarator") {
                if let Some(id) = innermost_identifier(&d) {
                    out.push(id);
                }
            }
        }
        "function_definition" => {
            if let Some(d) = node.child_for_field_name("declarator") {
                if let Some(id) = innermost_identifier(&d) {
                    out.push(id);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_c;

    fn find_first(root: &CstNode, kind: &str) -> CstNode {
        let mut found = None;
        root.walk(|n| {
            if found.is_none() && n.kind() == kind {
                found = Some(n.clone());
            }
        });
        found.unwrap_or_else(|| panic!("no {kind} node found"))
    }

    #[test]
    fn resolves_local_variable_reference() {
        let src = "int main(void) { int x = 1; return x; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let return_stmt = find_first(&root, "return_statement");
        let reference = return_stmt
            .named_children()
            .into_iter()
            .find(|n| n.kind() == "identifier")
            .unwrap();
        let def = get_definition(&reference).unwrap();
        assert_eq!(def.text(), "x");
    }

    #[test]
    fn resolves_function_parameter() {
        let src = "int square(int n) { return n * n; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let return_stmt = find_first(&root, "return_statement");
        let mut refs = Vec::new();
        return_stmt.walk(|n| {
            if n.kind() == "identifier" {
                refs.push(n.clone());
            }
        });
        let def = get_definition(&refs[0]).unwrap();
        assert_eq!(def.text(), "n");
    }

    #[test]
    fn find_references_collects_every_use() {
        let src = "int main(void) { int x = 1; x = x + 1; return x; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let func = find_first(&root, "function_definition");
        let body = func.child_for_field_name("body").unwrap();
        let decl_stmt = body
            .named_children()
            .into_iter()
            .find(|n| n.kind() == "declaration")
            .unwrap();
        let def = decl_stmt
            .named_children()
            .into_iter()
            .find_map(|c| {
                if c.kind() == "init_declarator" {
                    c.child_for_field_name("declarator")
                } else {
                    None
                }
            })
            .unwrap();
        let refs = find_references(&def);
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn extracts_pointer_type_with_qualifier() {
        let src = "void f(void) { const int *p; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let decl = find_first(&root, "declaration");
        let declarator = decl
            .named_children()
            .into_iter()
            .find(|n| n.kind() == "pointer_declarator")
            .unwrap();
        let id = innermost_identifier(&declarator).unwrap();
        assert_eq!(get_type(&id), "const int *");
    }

    #[test]
    fn function_signature_reports_name_return_type_and_params() {
        let src = "int add(int a, int b) { return a + b; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let func = find_first(&root, "function_definition");
        let sig = get_function_signature(&func);
        assert_eq!(sig.name, "add");
        assert_eq!(sig.return_type, "int");
        assert_eq!(sig.params.len(), 2);
    }
}
