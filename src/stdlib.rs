//! Bundled standard macro library (§4.9): `method`, `defer`, `fieldsof`,
//! `lambda`, `async`, reimplemented in Rhai against the `upp` API from
//! [`crate::sandbox`], grounded in `original_source/std/*.h`. These are
//! ordinary [`MacroDefinition`]s with `declaring_source: "<stdlib>"` - the
//! registry shadowing rule in [`crate::registry`] lets a user `@define`
//! override any of them by name.
//!
//! Differences from the original JavaScript source are deliberate, not
//! oversights, and are recorded in `DESIGN.md`: there is no `upp.invocation`
//! sub-object (flattened to `upp.invocationStart`/`invocationEnd`), no
//! `upp.registry.sourceCode` (use `upp.root.text` instead), and every
//! accessor the original calls as `upp.foo(node, ...)` is called here as
//! `node.foo(...)`, matching the method-call shape this crate's sandbox
//! actually registers.

use crate::registry::MacroDefinition;

pub fn load() -> Vec<MacroDefinition> {
    vec![defer(), method(), fieldsof(), lambda(), async_(), ]
}

fn def(name: &str, params: &[&str], body: &str) -> MacroDefinition {
    MacroDefinition {
        name: name.to_string(),
        params: params.iter().map(|s| s.to_string()).collect(),
        body: body.to_string(),
        declaring_source: "<stdlib>".to_string(),
    }
}

/// `@defer` (original_source/std/defer.h): consumes the following
/// statement and re-emits it immediately before every `return` in the
/// enclosing scope, plus before the scope's closing brace if its last
/// statement isn't already a `return`.
fn defer() -> MacroDefinition {
    def(
        "defer",
        &[],
        r#"
        let node = upp.consume("compound_statement");
        let scope = upp.findEnclosing(node, "compound_statement");
        if scope == () {
            return "";
        }

        upp.walk(scope, |n| {
            if n.type == "break_statement" || n.type == "continue_statement" || n.type == "goto_statement" {
                let kind = n.type;
                if kind.ends_with("_statement") {
                    kind = kind.sub_string(0, kind.len() - "_statement".len());
                }
                upp.error(n, "@defer cannot be used in a scope containing " + kind);
            }
        });

        upp.walk(scope, |n| {
            if n.type == "return_statement" && n.startIndex > node.startIndex {
                upp.replace(#{start: n.startIndex, end: n.startIndex}, node.text + " ");
            }
        });

        let lastStmt = scope.lastNamedChild;
        if lastStmt != () && lastStmt.type != "return_statement" {
            let endBrace = scope.endIndex - 1;
            upp.replace(#{start: endBrace, end: endBrace}, node.text + " ");
        }

        return "";
        "#,
    )
}

/// `@method(targetType)` (original_source/std/method.h): renames the
/// annotated function definition to `_Type_method_name` and rewrites
/// `obj.name(args)` / `obj->name(args)` call sites whose receiver resolves
/// to `targetType` into `_Type_method_name(&obj, args)` /
/// `_Type_method_name(obj, args)`.
fn method() -> MacroDefinition {
    def(
        "method",
        &["targetType"],
        r#"
        let funcDef = upp.contextNode;
        let funcDecl = funcDef.childForFieldName("declarator");
        while funcDecl != () && funcDecl.type == "pointer_declarator" {
            funcDecl = funcDecl.childForFieldName("declarator");
        }
        let funcIdentifier = funcDecl.childForFieldName("declarator");
        if funcIdentifier == () {
            return "";
        }
        let originalName = funcIdentifier.text;

        let cleanTarget = targetType.trim();
        if cleanTarget.starts_with("struct ") {
            cleanTarget = cleanTarget.sub_string(7).trim();
        }
        let newName = "_" + cleanTarget + "_method_" + originalName;

        upp.replace(funcIdentifier, newName);

        let refs = upp.findReferences(funcIdentifier);
        for r in refs {
            if r == funcIdentifier {
                continue;
            }
            let fnNode = r.parent;
            if fnNode == () || fnNode.type != "field_expression" { continue; }
            let callNode = fnNode.parent;
            if callNode == () || callNode.type != "call_expression" { continue; }

            let objectNode = fnNode.childForFieldName("argument");
            let argsNode = callNode.childForFieldName("arguments");
            let operatorToken = fnNode.children()[1].text;

            let objRef = objectNode.text;
            let argsList = argsNode.text.sub_string(1, argsNode.text.len() - 2).trim();
            let finalArgs = if argsList.len() > 0 { objRef + ", " + argsList } else { objRef };

            let objDef = upp.getDefinition(objectNode);
            let matches = false;
            if objDef != () {
                let objType = upp.getType(objDef);
                let cleanObjType = objType.replace("*", "").replace("struct ", "").trim();
                matches = cleanObjType == cleanTarget;
            } else {
                matches = true;
            }

            if matches {
                if operatorToken == "." {
                    finalArgs = "&(" + objRef + ")" + (if argsList.len() > 0 { ", " + argsList } else { "" });
                }
                upp.replace(callNode, newName + "(" + finalArgs + ")");
            }
        }
        return "";
        "#,
    )
}

/// `@fieldsof(targetStruct)` (original_source/std/fieldsof.h): splices the
/// field declarations of a previously-defined struct or struct-backed
/// typedef into the struct body the invocation sits in, and consumes a
/// trailing `;` if present.
fn fieldsof() -> MacroDefinition {
    def(
        "fieldsof",
        &["targetStruct"],
        r#"
        let ctx = upp.contextNode;
        while ctx != () && ctx.type != "field_declaration_list" && ctx.type != "translation_unit" {
            ctx = ctx.parent;
        }
        if ctx == () || ctx.type != "field_declaration_list" {
            upp.error(upp.root, "@fieldsof must be used inside a struct definition");
            return "";
        }

        let source = upp.root.text;
        let end = upp.invocationEnd;
        while end < source.len() && (source[end] == ' ' || source[end] == '\t' || source[end] == '\n' || source[end] == '\r') {
            end += 1;
        }
        if end < source.len() && source[end] == ';' {
            upp.invocationEnd = end + 1;
        }

        let targetName = targetStruct.trim();
        let isStructTag = false;
        if targetName.starts_with("struct ") {
            targetName = targetName.sub_string(7).trim();
            isStructTag = true;
        }

        let structDef = ();
        upp.walk(upp.root, |node| {
            if structDef != () { return; }
            if node.type == "struct_specifier" {
                let nameNode = node.childForFieldName("name");
                if nameNode != () && nameNode.text == targetName {
                    structDef = node;
                }
            }
            if !isStructTag && node.type == "type_definition" {
                let declarator = node.childForFieldName("declarator");
                if declarator != () && declarator.text == targetName {
                    let typeNode = node.childForFieldName("type");
                    if typeNode != () && typeNode.type == "struct_specifier" {
                        structDef = typeNode;
                    }
                }
            }
        });

        if structDef == () {
            upp.error(upp.root, "could not find definition for struct/type " + targetName);
            return "";
        }

        let fieldList = structDef.childForFieldName("body");
        if fieldList == () {
            return "";
        }

        let fields = "";
        for child in fieldList.namedChildren() {
            if child.type == "field_declaration" {
                fields += child.text + "\n    ";
            }
        }
        return fields;
        "#,
    )
}

/// `@lambda` (original_source/std/lambda.h): turns the following
/// function definition into a closure - captured outer identifiers become
/// fields of a generated context struct, the function body is hoisted to
/// an `_impl` function taking that struct, and every call site is rewired
/// to pass `&ctx`. Reference rewriting follows the original's
/// `processReferences` recursively: a direct call becomes
/// `implName(&ctx, ...)`, and an alias introduced by a plain declaration
/// (`T f = name;`) or assignment (`f = name;`) is retyped with
/// `typeof(&implName)` and then walked itself, so call sites reached only
/// through the alias get rewritten too. Arbitrary aliasing through other
/// expression shapes is out of scope, matching the original (see
/// DESIGN.md).
fn lambda() -> MacroDefinition {
    def(
        "lambda",
        &[],
        r#"
        let fnNode = upp.contextNode;
        if fnNode == () || fnNode.type != "function_definition" {
            upp.error(upp.root, "@lambda expected function_definition");
            return "";
        }

        let fnDecl = fnNode.childForFieldName("declarator");
        let nameNode = fnDecl.childForFieldName("declarator");
        let fnName = if nameNode != () { nameNode.text } else { "lambda_unknown" };

        let paramListNode = fnDecl.childForFieldName("parameters");
        let paramsContent = if paramListNode != () { paramListNode.text } else { "" };
        let bodyNode = fnNode.childForFieldName("body");

        let typeNode = fnNode.childForFieldName("type");
        let returnType = if typeNode != () { typeNode.text } else { "void" };

        let paramsText = "";
        let trimmedParams = paramsContent.trim();
        if trimmedParams.len() > 2 {
            let inner = trimmedParams.sub_string(1, trimmedParams.len() - 2).trim();
            if inner.len() > 0 {
                paramsText = ", " + inner;
            }
        }

        let fnStart = fnNode.startIndex;
        let fnEnd = fnNode.endIndex;

        let captureNames = [];
        let captureTypes = #{};
        upp.walk(bodyNode, |node| {
            if node.type == "identifier" {
                let d = upp.getDefinition(node);
                if d != () && !(d.startIndex >= fnStart && d.endIndex <= fnEnd) {
                    if !(node.text in captureTypes) {
                        captureNames.push(node.text);
                        captureTypes[node.text] = upp.getType(d);
                    }
                }
            }
        });

        let ctxName = upp.createUniqueIdentifier("lambda_ctx");
        let structFields = "";
        for name in captureNames {
            structFields += "    " + captureTypes[name] + " *" + name + ";\n";
        }
        let structDef = "struct " + ctxName + " {\n" + structFields + "\n};\n";

        let implName = upp.createUniqueIdentifier(fnName + "_impl");

        let bodyText = bodyNode.text;
        for name in captureNames {
            bodyText = bodyText.replace(name, "(*ctx->" + name + ")");
        }

        let implCode = "\n" + returnType + " " + implName + "(struct " + ctxName + " *ctx" + paramsText + ") " + bodyText + "\n";
        upp.hoist("\n" + structDef + implCode);

        fn lambda_process_refs(upp, refText, isOriginal, implName, fnStart, fnEnd, depth) {
            if depth > 16 {
                return;
            }
            upp.walk(upp.root, |ref_| {
                if ref_.type != "identifier" || ref_.text != refText { return; }
                if isOriginal && ref_.startIndex >= fnStart && ref_.endIndex <= fnEnd { return; }
                let refParent = ref_.parent;
                if refParent == () { return; }

                if refParent.type == "call_expression" && refParent.childForFieldName("function") == ref_ {
                    let args = refParent.childForFieldName("arguments");
                    let argsText = args.text;
                    let inner = argsText.sub_string(1, argsText.len() - 2);
                    let newArgs = if inner.trim().len() > 0 { "(&ctx, " + inner + ")" } else { "(&ctx)" };
                    let replacementName = if isOriginal { implName } else { ref_.text };
                    upp.replace(refParent, replacementName + newArgs);
                    return;
                }

                if refParent.type == "init_declarator" && refParent.childForFieldName("value") == ref_ {
                    let declStmt = refParent.parent;
                    let decl = refParent.childForFieldName("declarator");
                    let aliasId = ();
                    upp.walk(decl, |n| {
                        if n.type == "identifier" && aliasId == () {
                            aliasId = n;
                        }
                    });

                    if isOriginal && aliasId != () && declStmt != () && declStmt.type == "declaration" {
                        let prefix = "";
                        for c in declStmt.children() {
                            if c.type == "storage_class_specifier" || c.type == "type_qualifier" {
                                prefix += c.text + " ";
                            }
                        }
                        let newDecl = prefix + "typeof(&" + implName + ") " + aliasId.text + " = " + implName + ";";
                        upp.replace(declStmt, newDecl);
                        lambda_process_refs(upp, aliasId.text, false, implName, fnStart, fnEnd, depth + 1);
                    } else if aliasId != () {
                        lambda_process_refs(upp, aliasId.text, false, implName, fnStart, fnEnd, depth + 1);
                    }
                    return;
                }

                if refParent.type == "assignment_expression" && refParent.childForFieldName("right") == ref_ {
                    let left = refParent.childForFieldName("left");
                    let aliasId = if left != () && left.type == "identifier" { left } else { () };
                    if isOriginal {
                        upp.replace(ref_, implName);
                    }
                    if aliasId != () {
                        let def = upp.getDefinition(aliasId);
                        if def != () {
                            lambda_process_refs(upp, def.text, false, implName, fnStart, fnEnd, depth + 1);
                        }
                    }
                    return;
                }

                if isOriginal {
                    upp.replace(ref_, implName);
                }
            });
        }

        lambda_process_refs(upp, fnName, true, implName, fnStart, fnEnd, 0);

        let initFields = "";
        for name in captureNames {
            if initFields.len() > 0 { initFields += ", "; }
            initFields += "." + name + " = &" + name;
        }
        let initCode = "struct " + ctxName + " ctx = { " + initFields + " };";

        upp.replace(fnNode, "");
        return initCode;
        "#,
    )
}

/// `@async` (original_source/std/async.h): registers a transform that
/// rewrites every call site of the annotated function to `os_start(name)`,
/// leaving the definition itself untouched. The transform runs once the
/// invocation's own phase re-parses, per the registered-transform ordering
/// contract (§4.6).
fn async_() -> MacroDefinition {
    def(
        "async",
        &[],
        r#"
        let node = upp.contextNode;
        if node == () || node.type != "function_definition" {
            upp.error(upp.root, "@async must be applied to a function definition");
            return "";
        }
        let declarator = node.childForFieldName("declarator");
        let idMatches = upp.query("(identifier) @id", declarator);
        let name = "";
        if idMatches.len() > 0 {
            name = idMatches[0].id.text;
        }

        if name.len() > 0 {
            upp.registerTransform(|root, helpers| {
                let matches = helpers.query("(call_expression function: (identifier) @id) @call", root);
                for m in matches {
                    if m.id.text == name {
                        let callNode = m.call;
                        let parentType = if callNode.parent != () { callNode.parent.type } else { "" };
                        if parentType == "function_declarator" { continue; }
                        helpers.replace(callNode, "os_start(" + name + ")");
                    }
                }
            });
        }

        return "";
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_five_standard_macros() {
        let defs = load();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"defer"));
        assert!(names.contains(&"method"));
        assert!(names.contains(&"fieldsof"));
        assert!(names.contains(&"lambda"));
        assert!(names.contains(&"async"));
        for d in &defs {
            assert_eq!(d.declaring_source, "<stdlib>");
        }
    }

    #[test]
    fn defer_and_method_take_the_expected_arity() {
        let defs = load();
        let defer = defs.iter().find(|d| d.name == "defer").unwrap();
        assert_eq!(defer.arity(), 0);
        let method = defs.iter().find(|d| d.name == "method").unwrap();
        assert_eq!(method.arity(), 1);
    }
}
