//! Scripting host (§4.2): evaluates macro bodies in an embedded `rhai`
//! sandbox, exposing the `upp` capability object that §4.2 requires.
//!
//! `upp` is a flat capability record, not a class hierarchy (§9: "modeled
//! as a flat capability record whose operations are plain functions taking
//! explicit arguments; no subclassing") - [`UppApi`] is one `Clone`able
//! handle wrapping `Arc<Mutex<ApiInner>>`, and every operation the design
//! calls for is a plain method registered on it. CST nodes cross into the
//! sandbox as [`UppNode`], a thin wrapper around [`CstNode`] - cheap to
//! clone, `'static`, exactly as the design's "read-only reference to the
//! latest parse" calls for.

use std::sync::{Arc, Mutex};

use rhai::{Array, Dynamic, Engine, FnPtr, Map, NativeCallContext, Scope, AST};

use crate::cst::CstNode;
use crate::diagnostics::{ByteRange, UppError};
use crate::edit::EditBuffer;
use crate::err_ctx;
use crate::err_msg;
use crate::hoist::HoistBuffer;
use crate::invocation::{enclosing_block, Invocation};
use crate::query;
use crate::registry::MacroDefinition;
use crate::semantic;
use crate::transform::TransformQueue;

/// State carried for the whole run: the `upp.registry` scratch map, the
/// unique-identifier counter, and the transform queue (§3: "Registry (per
/// run)"). Transforms live here rather than in [`PhaseState`] because a
/// transform registered in phase *k* is drained and run within that same
/// phase but the queue itself, and the ability to register further
/// transforms from inside a running one, spans the whole run.
#[derive(Default)]
pub struct RunState {
    pub scratch: std::collections::HashMap<String, Dynamic>,
    pub unique_counter: usize,
    pub transforms: TransformQueue,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// State scoped to one phase: the edit and hoist buffers every invocation
/// and transform in this phase accumulates into, applied atomically at
/// the phase's end (§4.3, §4.4).
#[derive(Default)]
pub struct PhaseState {
    pub edits: EditBuffer,
    pub hoists: HoistBuffer,
}

impl PhaseState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What a per-invocation body run decided: a replacement for the
/// invocation's own range, or a diagnostic that aborts just this
/// invocation (§4.8 Completed | Errored).
pub struct InvocationOutcome {
    pub replacement: Option<String>,
    pub error: Option<UppError>,
}

/// Per-invocation state backing the `upp` handle. One `ApiInner` is built
/// fresh for every invocation evaluation and every transform run; the
/// `run`/`phase` fields are shared (via `Arc<Mutex<_>>`) with every other
/// invocation and transform in the same run/phase.
struct ApiInner {
    root: CstNode,
    source: Arc<String>,
    context_node: Option<CstNode>,
    range: ByteRange,
    consumed_cursor: Option<usize>,
    error: Option<UppError>,
    label: String,
    run: Arc<Mutex<RunState>>,
    phase: Arc<Mutex<PhaseState>>,
}

/// The `upp` handle exposed to macro bodies and registered transforms.
/// `Clone` is an `Arc` bump, matching the other sandbox-facing wrapper
/// types - this is what lets rhai hold it as a plain value.
#[derive(Clone)]
struct UppApi(Arc<Mutex<ApiInner>>);

/// A CST node as seen from inside the sandbox.
#[derive(Clone)]
struct UppNode(CstNode);

/// A `{start, end}` byte range as seen from inside the sandbox - the type
/// `upp.invocation` exposes, and one of the two forms `replace`/`error`/
/// `isDescendant` accept for "rangeOrNode".
#[derive(Clone)]
struct UppRange(ByteRange);

fn node_to_dynamic(node: Option<CstNode>) -> Dynamic {
    match node {
        Some(n) => Dynamic::from(UppNode(n)),
        None => Dynamic::UNIT,
    }
}

fn rhai_err(e: UppError) -> Box<rhai::EvalAltResult> {
    e.to_string().into()
}

fn record_and_raise(inner: &Mutex<ApiInner>, e: UppError) -> Box<rhai::EvalAltResult> {
    let boxed = rhai_err(UppError::UserError {
        message: e.to_string(),
        span: None,
        src: None,
    });
    let mut guard = inner.lock().unwrap();
    if guard.error.is_none() {
        guard.error = Some(e);
    }
    boxed
}

impl UppApi {
    fn get_context_node(&mut self) -> Dynamic {
        node_to_dynamic(self.0.lock().unwrap().context_node.clone())
    }

    fn get_root(&mut self) -> UppNode {
        UppNode(self.0.lock().unwrap().root.clone())
    }

    fn get_invocation_start(&mut self) -> i64 {
        self.0.lock().unwrap().range.start as i64
    }

    fn get_invocation_end(&mut self) -> i64 {
        self.0.lock().unwrap().range.end as i64
    }

    fn set_invocation_start(&mut self, v: i64) {
        self.0.lock().unwrap().range.start = v.max(0) as usize;
    }

    fn set_invocation_end(&mut self, v: i64) {
        self.0.lock().unwrap().range.end = v.max(0) as usize;
    }

    fn registry_get(&mut self, key: &str) -> Dynamic {
        self.0
            .lock()
            .unwrap()
            .run
            .lock()
            .unwrap()
            .scratch
            .get(key)
            .cloned()
            .unwrap_or(Dynamic::UNIT)
    }

    fn registry_set(&mut self, key: &str, value: Dynamic) {
        self.0
            .lock()
            .unwrap()
            .run
            .lock()
            .unwrap()
            .scratch
            .insert(key.to_string(), value);
    }

    fn consume_one(&mut self, type_name: &str) -> Result<UppNode, Box<rhai::EvalAltResult>> {
        self.consume_many(&[type_name.to_string()], None)
    }

    fn consume_list(&mut self, types: Array) -> Result<UppNode, Box<rhai::EvalAltResult>> {
        let names: Vec<String> = types.into_iter().map(|d| d.to_string()).collect();
        self.consume_many(&names, None)
    }

    fn consume_opts(&mut self, opts: Map) -> Result<UppNode, Box<rhai::EvalAltResult>> {
        let names: Vec<String> = match opts.get("type") {
            Some(d) if d.is_array() => d
                .clone()
                .into_array()
                .unwrap()
                .into_iter()
                .map(|v| v.to_string())
                .collect(),
            Some(d) => vec![d.to_string()],
            None => Vec::new(),
        };
        let message = opts.get("message").map(|m| m.to_string());
        self.consume_many(&names, message)
    }

    fn consume_many(
        &mut self,
        type_names: &[String],
        message: Option<String>,
    ) -> Result<UppNode, Box<rhai::EvalAltResult>> {
        let mut guard = self.0.lock().unwrap();
        let cursor_pos = guard.consumed_cursor.unwrap_or(guard.range.end);
        let block = enclosing_block(&guard.root, cursor_pos);
        let candidate = block
            .named_children()
            .into_iter()
            .find(|c| c.end() > cursor_pos && !c.is_comment());

        let Some(candidate) = candidate else {
            let msg = message.unwrap_or_else(|| {
                format!("expected one of {type_names:?}, found end of scope")
            });
            let range = guard.range;
            drop(guard);
            return Err(record_and_raise(
                &self.0,
                err_ctx!(ConsumeTypeMismatch, msg, range),
            ));
        };
        if !type_names.iter().any(|t| t == candidate.kind()) {
            let msg = message.unwrap_or_else(|| {
                format!("expected one of {type_names:?}, found '{}'", candidate.kind())
            });
            let range = candidate.range();
            drop(guard);
            return Err(record_and_raise(
                &self.0,
                err_ctx!(ConsumeTypeMismatch, msg, range),
            ));
        }

        guard.consumed_cursor = Some(candidate.end());
        guard
            .phase
            .lock()
            .unwrap()
            .edits
            .submit(candidate.range(), "");
        Ok(UppNode(candidate))
    }

    fn replace_node(&mut self, node: UppNode, text: &str) {
        self.0
            .lock()
            .unwrap()
            .phase
            .lock()
            .unwrap()
            .edits
            .submit(node.0.range(), text);
    }

    fn replace_range(&mut self, range: UppRange, text: &str) {
        self.0
            .lock()
            .unwrap()
            .phase
            .lock()
            .unwrap()
            .edits
            .submit(range.0, text);
    }

    /// `upp.replace({start, end}, text)` - the bundled standard macros
    /// build ranges as plain object literals (mirroring the object shape
    /// the original JavaScript implementation passes), so this overload
    /// accepts a `Map` with `start`/`end` keys alongside the `Range`-typed
    /// [`Self::replace_range`].
    fn replace_map(&mut self, range: Map, text: &str) {
        let start = range.get("start").map(|v| v.as_int().unwrap_or(0)).unwrap_or(0);
        let end = range.get("end").map(|v| v.as_int().unwrap_or(0)).unwrap_or(0);
        self.replace_range(
            UppRange(ByteRange {
                start: start.max(0) as usize,
                end: end.max(0) as usize,
            }),
            text,
        );
    }

    fn hoist(&mut self, text: &str) {
        self.0.lock().unwrap().phase.lock().unwrap().hoists.push(text);
    }

    /// `registerTransform` never calls the closure itself - it only files
    /// it for the transform phase - so no `NativeCallContext` is needed
    /// here. A closure created via `|root, helpers| ...` syntax carries
    /// its captured environment inside the `FnPtr` itself; the bundled
    /// standard macros never register a bare `Fn("name")` reference, so
    /// an empty placeholder `AST` (used only to resolve such references)
    /// is sufficient.
    fn register_transform(&mut self, callback: FnPtr) {
        let guard = self.0.lock().unwrap();
        let label = guard.label.clone();
        guard
            .run
            .lock()
            .unwrap()
            .transforms
            .register(callback, Arc::new(AST::empty()), label);
    }

    fn walk(
        &mut self,
        context: NativeCallContext,
        node: UppNode,
        visitor: FnPtr,
    ) -> Result<(), Box<rhai::EvalAltResult>> {
        let mut outcome = Ok(());
        node.0.walk(|n| {
            if outcome.is_ok() {
                let r: Result<(), _> =
                    visitor.call_within_context(&context, (UppNode(n.clone()),));
                if let Err(e) = r {
                    outcome = Err(e);
                }
            }
        });
        outcome
    }

    fn query(&mut self, pattern: &str, root: UppNode) -> Result<Array, Box<rhai::EvalAltResult>> {
        let matches = query::query(pattern, &root.0).map_err(rhai_err)?;
        Ok(matches
            .into_iter()
            .map(|captures| {
                let mut map = Map::new();
                for (k, v) in captures {
                    map.insert(k.into(), Dynamic::from(UppNode(v)));
                }
                Dynamic::from(map)
            })
            .collect())
    }

    fn match_replace(
        &mut self,
        context: NativeCallContext,
        root: UppNode,
        pattern: &str,
        builder: FnPtr,
    ) -> Result<(), Box<rhai::EvalAltResult>> {
        self.match_replace_opts(context, root, pattern, builder, Map::new())
    }

    fn match_replace_opts(
        &mut self,
        context: NativeCallContext,
        root: UppNode,
        pattern: &str,
        builder: FnPtr,
        opts: Map,
    ) -> Result<(), Box<rhai::EvalAltResult>> {
        let deep = opts
            .get("deep")
            .map(|d| d.as_bool().unwrap_or(false))
            .unwrap_or(false);
        let matches = query::find_text_pattern_matches(pattern, &root.0, deep).map_err(rhai_err)?;
        for (matched_node, captures) in matches {
            let mut map = Map::new();
            for (k, v) in captures {
                map.insert(k.into(), Dynamic::from(UppNode(v)));
            }
            let replacement: String =
                builder.call_within_context(&context, (UppNode(matched_node.clone()), map))?;
            self.0
                .lock()
                .unwrap()
                .phase
                .lock()
                .unwrap()
                .edits
                .submit(matched_node.range(), replacement);
        }
        Ok(())
    }

    fn find_enclosing(&mut self, node: UppNode, kind: &str) -> Dynamic {
        node_to_dynamic(semantic::find_enclosing(&node.0, kind))
    }

    fn find_references(&mut self, def_node: UppNode) -> Array {
        semantic::find_references(&def_node.0)
            .into_iter()
            .map(|n| Dynamic::from(UppNode(n)))
            .collect()
    }

    fn get_definition(&mut self, ref_node: UppNode) -> Dynamic {
        node_to_dynamic(semantic::get_definition(&ref_node.0))
    }

    fn get_type(&mut self, def_node: UppNode) -> String {
        semantic::get_type(&def_node.0)
    }

    fn get_function_signature(&mut self, fn_node: UppNode) -> Map {
        let sig = semantic::get_function_signature(&fn_node.0);
        let mut map = Map::new();
        map.insert("returnType".into(), sig.return_type.into());
        map.insert("name".into(), sig.name.into());
        map.insert(
            "params".into(),
            Dynamic::from(
                sig.params
                    .into_iter()
                    .map(Dynamic::from)
                    .collect::<Array>(),
            ),
        );
        map
    }

    fn create_unique_identifier(&mut self, prefix: &str) -> String {
        let guard = self.0.lock().unwrap();
        let mut run = guard.run.lock().unwrap();
        loop {
            run.unique_counter += 1;
            let candidate = format!("{prefix}_{}", run.unique_counter);
            if !guard.source.contains(&candidate) {
                return candidate;
            }
        }
    }

    fn is_descendant_node(&mut self, ancestor: UppNode, node: UppNode) -> bool {
        node.0.is_descendant_of(&ancestor.0)
    }

    fn is_descendant_range(&mut self, ancestor: UppRange, node: UppNode) -> bool {
        ancestor.0.start <= node.0.start() && node.0.end() <= ancestor.0.end
    }

    fn error_node(&mut self, node: UppNode, message: &str) -> Result<(), Box<rhai::EvalAltResult>> {
        self.error_range(UppRange(node.0.range()), message)
    }

    fn error_range(&mut self, range: UppRange, message: &str) -> Result<(), Box<rhai::EvalAltResult>> {
        Err(record_and_raise(
            &self.0,
            err_ctx!(UserError, message, range.0),
        ))
    }

    /// `upp.code(strings, ...values)` (§4.2, SPEC_FULL.md §4.2): strings
    /// and numbers pass through, nodes are replaced by their current
    /// `.text`. Rhai has no tagged-template-literal mechanism (its own
    /// backtick interpolation calls `to_string` on each value with no way
    /// to special-case node arguments), so only this plain-function form
    /// is implemented; that is a documented gap, not an oversight.
    fn code(&mut self, strings: Array, values: Array) -> String {
        code_interpolate(strings, values)
    }
}

impl UppNode {
    fn kind(&mut self) -> String {
        self.0.kind().to_string()
    }

    fn text(&mut self) -> String {
        self.0.text().to_string()
    }

    fn start_index(&mut self) -> i64 {
        self.0.start() as i64
    }

    fn end_index(&mut self) -> i64 {
        self.0.end() as i64
    }

    fn parent(&mut self) -> Dynamic {
        node_to_dynamic(self.0.parent())
    }

    fn children(&mut self) -> Array {
        self.0.children().into_iter().map(|n| Dynamic::from(UppNode(n))).collect()
    }

    fn named_children(&mut self) -> Array {
        self.0
            .named_children()
            .into_iter()
            .map(|n| Dynamic::from(UppNode(n)))
            .collect()
    }

    fn child_for_field_name(&mut self, name: &str) -> Dynamic {
        node_to_dynamic(self.0.child_for_field_name(name))
    }

    fn next_named_sibling(&mut self) -> Dynamic {
        node_to_dynamic(self.0.next_named_sibling())
    }

    fn is_comment(&mut self) -> bool {
        self.0.is_comment()
    }

    fn last_named_child(&mut self) -> Dynamic {
        node_to_dynamic(self.0.last_named_child())
    }

    /// Stable only within one parse (mirrors [`crate::cst::NodeId`]) - the
    /// bundled standard macros use it as a de-duplication key (e.g.
    /// `@lambda`'s `processedNodes`), never across a re-parse.
    fn node_id(&mut self) -> i64 {
        self.0.id().0 as i64
    }

    fn to_string_impl(&mut self) -> String {
        format!("Node({})", self.0.kind())
    }

    fn eq(&mut self, other: UppNode) -> bool {
        self.0 == other.0
    }
}

impl UppRange {
    fn start_index(&mut self) -> i64 {
        self.0.start as i64
    }

    fn end_index(&mut self) -> i64 {
        self.0.end as i64
    }
}

/// `upp.code` - tag-function interpolation (§4.2): strings/numbers pass
/// through, nodes are replaced by their current `.text`. Registered twice,
/// once for the tagged-template call shape (`strings, ...values` already
/// arrives as two arrays from rhai's string-interpolation desugaring) and
/// once as a plain function taking the same two arrays, per SPEC_FULL.md
/// §4.2's "doubles as ... and, for macros authored without tagged-template
/// support, a plain function" clarification.
fn code_interpolate(strings: Array, values: Array) -> String {
    let mut out = String::new();
    for (i, s) in strings.iter().enumerate() {
        out.push_str(&s.to_string());
        if let Some(v) = values.get(i) {
            if let Some(node) = v.clone().try_cast::<UppNode>() {
                out.push_str(node.0.text());
            } else {
                out.push_str(&v.to_string());
            }
        }
    }
    out
}

/// Builds the one `rhai::Engine` reused across every invocation and
/// transform in a run (§5: "a single evaluation context per run, reused
/// across invocations").
pub fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(128, 128);

    engine.register_type_with_name::<UppApi>("Upp");
    engine.register_get("contextNode", UppApi::get_context_node);
    engine.register_get("root", UppApi::get_root);
    engine.register_get("invocationStart", UppApi::get_invocation_start);
    engine.register_set("invocationStart", UppApi::set_invocation_start);
    engine.register_get("invocationEnd", UppApi::get_invocation_end);
    engine.register_set("invocationEnd", UppApi::set_invocation_end);
    engine.register_indexer_get(UppApi::registry_get);
    engine.register_indexer_set(UppApi::registry_set);

    engine.register_fn("consume", UppApi::consume_one);
    engine.register_fn("consume", UppApi::consume_list);
    engine.register_fn("consume", UppApi::consume_opts);
    engine.register_fn("replace", UppApi::replace_node);
    engine.register_fn("replace", UppApi::replace_range);
    engine.register_fn("replace", UppApi::replace_map);
    engine.register_fn("hoist", UppApi::hoist);
    engine.register_fn("registerTransform", UppApi::register_transform);
    engine.register_fn("walk", UppApi::walk);
    engine.register_fn("query", UppApi::query);
    engine.register_fn("matchReplace", UppApi::match_replace);
    engine.register_fn("matchReplace", UppApi::match_replace_opts);
    engine.register_fn("findEnclosing", UppApi::find_enclosing);
    engine.register_fn("findReferences", UppApi::find_references);
    engine.register_fn("getDefinition", UppApi::get_definition);
    engine.register_fn("getType", UppApi::get_type);
    engine.register_fn("getFunctionSignature", UppApi::get_function_signature);
    engine.register_fn("createUniqueIdentifier", UppApi::create_unique_identifier);
    engine.register_fn("isDescendant", UppApi::is_descendant_node);
    engine.register_fn("isDescendant", UppApi::is_descendant_range);
    engine.register_fn("error", UppApi::error_node);
    engine.register_fn("error", UppApi::error_range);
    engine.register_fn("code", UppApi::code);

    engine.register_type_with_name::<UppNode>("Node");
    engine.register_get("type", UppNode::kind);
    engine.register_get("text", UppNode::text);
    engine.register_get("startIndex", UppNode::start_index);
    engine.register_get("endIndex", UppNode::end_index);
    engine.register_fn("parent", UppNode::parent);
    engine.register_fn("children", UppNode::children);
    engine.register_fn("namedChildren", UppNode::named_children);
    engine.register_fn("childForFieldName", UppNode::child_for_field_name);
    engine.register_fn("nextNamedSibling", UppNode::next_named_sibling);
    engine.register_fn("isComment", UppNode::is_comment);
    engine.register_get("lastNamedChild", UppNode::last_named_child);
    engine.register_get("id", UppNode::node_id);
    engine.register_fn("to_string", UppNode::to_string_impl);
    engine.register_fn("==", UppNode::eq);

    engine.register_type_with_name::<UppRange>("Range");
    engine.register_get("startIndex", UppRange::start_index);
    engine.register_get("endIndex", UppRange::end_index);

    engine
}

/// Evaluates one macro invocation's body (§4.8 Evaluating → Completed |
/// Errored). `inv`'s range may be widened by the body (§3 "mutable
/// invocation range"); callers must read `inv.range` back afterwards
/// rather than the value passed in.
pub fn evaluate_invocation(
    engine: &Engine,
    def: &MacroDefinition,
    inv: &mut Invocation,
    root: &CstNode,
    run: Arc<Mutex<RunState>>,
    phase: Arc<Mutex<PhaseState>>,
) -> InvocationOutcome {
    let inner = Arc::new(Mutex::new(ApiInner {
        root: root.clone(),
        source: Arc::new(root.source().to_string()),
        context_node: inv.context_node.clone(),
        range: inv.range,
        consumed_cursor: None,
        error: None,
        label: format!("@{}", def.name),
        run,
        phase,
    }));
    let api = UppApi(Arc::clone(&inner));

    let mut scope = Scope::new();
    scope.push("upp", api);
    for (name, value) in def.params.iter().zip(inv.args.iter()) {
        scope.push(name.clone(), value.clone());
    }

    let result: Result<Dynamic, _> = engine.eval_with_scope(&mut scope, &def.body);

    let final_range = inner.lock().unwrap().range;
    inv.range = final_range;

    match result {
        Ok(value) => {
            let stored_error = inner.lock().unwrap().error.take();
            if let Some(err) = stored_error {
                return InvocationOutcome {
                    replacement: None,
                    error: Some(err),
                };
            }
            let text = if value.is_unit() {
                String::new()
            } else {
                value.to_string()
            };
            InvocationOutcome {
                replacement: Some(text),
                error: None,
            }
        }
        Err(e) => {
            let stored_error = inner.lock().unwrap().error.take();
            let err = stored_error.unwrap_or_else(|| {
                err_ctx!(SandboxError, e.to_string(), final_range)
            });
            InvocationOutcome {
                replacement: None,
                error: Some(err),
            }
        }
    }
}

/// Runs one registered transform (§4.6: `transform(root, helpers)`).
/// `helpers` is the same `UppApi` type as `upp` (SPEC_FULL.md §4.2:
/// "API-identical to `upp` but scoped to the post-re-parse tree") - there
/// is no separate sandbox type for it.
pub fn run_transform(
    engine: &Engine,
    transform: &crate::transform::RegisteredTransform,
    root: &CstNode,
    run: Arc<Mutex<RunState>>,
    phase: Arc<Mutex<PhaseState>>,
) -> Result<(), UppError> {
    let inner = Arc::new(Mutex::new(ApiInner {
        root: root.clone(),
        source: Arc::new(root.source().to_string()),
        context_node: None,
        range: ByteRange::point(0),
        consumed_cursor: None,
        error: None,
        label: transform.declaring_invocation.clone(),
        run,
        phase,
    }));
    let helpers = UppApi(Arc::clone(&inner));
    let root_node = UppNode(root.clone());

    let result: Result<Dynamic, _> =
        transform.callback.call(engine, &transform.ast, (root_node, helpers));

    if let Some(err) = inner.lock().unwrap().error.take() {
        return Err(err);
    }
    result
        .map(|_| ())
        .map_err(|e| err_msg!(SandboxError, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Invocation;
    use crate::parser::parse_c;

    fn make_invocation(range: ByteRange, args: Vec<String>) -> Invocation {
        Invocation {
            macro_name: "test".into(),
            args,
            range,
            context_node: None,
            ordinal: 0,
        }
    }

    #[test]
    fn simple_macro_body_returns_replacement_text() {
        let engine = build_engine();
        let src = "@double(2) rest;";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let def = MacroDefinition {
            name: "double".into(),
            params: vec!["x".into()],
            body: "return x + x;".into(),
            declaring_source: "<test>".into(),
        };
        let mut inv = make_invocation(ByteRange { start: 0, end: 9 }, vec!["2".into()]);
        let run = Arc::new(Mutex::new(RunState::new()));
        let phase = Arc::new(Mutex::new(PhaseState::new()));
        let outcome = evaluate_invocation(&engine, &def, &mut inv, &root, run, phase);
        assert_eq!(outcome.replacement.as_deref(), Some("22"));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn upp_error_aborts_with_user_error() {
        let engine = build_engine();
        let src = "@bad() rest;";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let def = MacroDefinition {
            name: "bad".into(),
            params: vec![],
            body: "upp.error(upp.root, \"nope\"); return \"\";".into(),
            declaring_source: "<test>".into(),
        };
        let mut inv = make_invocation(ByteRange { start: 0, end: 7 }, vec![]);
        let run = Arc::new(Mutex::new(RunState::new()));
        let phase = Arc::new(Mutex::new(PhaseState::new()));
        let outcome = evaluate_invocation(&engine, &def, &mut inv, &root, run, phase);
        assert!(outcome.replacement.is_none());
        assert!(matches!(outcome.error, Some(UppError::UserError { .. })));
    }

    #[test]
    fn invocation_range_can_be_widened_to_consume_trailing_semicolon() {
        let engine = build_engine();
        let src = "@bump() ;";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let def = MacroDefinition {
            name: "bump".into(),
            params: vec![],
            body: "upp.invocationEnd = upp.invocationEnd + 1; return \"\";".into(),
            declaring_source: "<test>".into(),
        };
        let mut inv = make_invocation(ByteRange { start: 0, end: 7 }, vec![]);
        let run = Arc::new(Mutex::new(RunState::new()));
        let phase = Arc::new(Mutex::new(PhaseState::new()));
        let _ = evaluate_invocation(&engine, &def, &mut inv, &root, run, phase);
        assert_eq!(inv.range.end, 8);
    }

    #[test]
    fn hoist_and_replace_accumulate_into_phase_state() {
        let engine = build_engine();
        let src = "int main(void) { return 0; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let def = MacroDefinition {
            name: "noop".into(),
            params: vec![],
            body: "upp.hoist(\"int injected;\\n\"); return \"\";".into(),
            declaring_source: "<test>".into(),
        };
        let mut inv = make_invocation(ByteRange::point(0), vec![]);
        let run = Arc::new(Mutex::new(RunState::new()));
        let phase = Arc::new(Mutex::new(PhaseState::new()));
        let outcome = evaluate_invocation(&engine, &def, &mut inv, &root, run, Arc::clone(&phase));
        assert!(outcome.error.is_none());
        assert!(!phase.lock().unwrap().hoists.is_empty());
    }
}
