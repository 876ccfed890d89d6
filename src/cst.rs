//! Concrete syntax tree facade.
//!
//! The real parser ([`crate::parser`]) is `tree-sitter` — an external,
//! black-box producer of typed nodes. This module snapshots a freshly
//! parsed `tree_sitter::Tree` into an owned, arena-backed [`Cst`] so that
//! nodes can be handed to the sandbox (which requires `'static + Clone`
//! values) without fighting `tree_sitter::Node<'tree>`'s borrow from the
//! tree. Every attribute the design calls for - `type`, `text`,
//! `startIndex`/`endIndex`, `parent`, ordered `children`/`namedChildren`,
//! a `fieldName -> child` map, and a stable `id` within one parse - is
//! captured at snapshot time.
//!
//! Nodes from a previous parse are invalidated the moment the buffer is
//! re-parsed (data-model invariant: macros must not retain node references
//! across phases); because [`CstNode`] borrows its arena through an `Arc`,
//! that invariant is enforced socially rather than by the borrow checker -
//! the same trust boundary the original JavaScript implementation relies
//! on.

use std::collections::HashMap;
use std::sync::Arc;

/// Identifies a node within one [`Cst`] snapshot. Stable only within that
/// snapshot; never compare ids from two different parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
struct NodeData {
    kind: String,
    start: usize,
    end: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    named_children: Vec<NodeId>,
    fields: HashMap<String, NodeId>,
}

/// An owned, fully-materialized concrete syntax tree.
#[derive(Debug)]
pub struct Cst {
    source: Arc<String>,
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Cst {
    /// Snapshot a `tree_sitter::Tree` parsed against `source` into an owned
    /// arena. `source` must be the exact text the tree was parsed from.
    pub fn from_tree_sitter(tree: &tree_sitter::Tree, source: Arc<String>) -> Self {
        let mut nodes = Vec::new();
        let mut cursor = tree.walk();
        let root = convert(&mut cursor, &mut nodes);
        Cst {
            source,
            nodes,
            root,
        }
    }

    pub fn root(self: &Arc<Self>) -> CstNode {
        CstNode {
            cst: Arc::clone(self),
            id: self.root,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }
}

fn convert(cursor: &mut tree_sitter::TreeCursor, nodes: &mut Vec<NodeData>) -> NodeId {
    let node = cursor.node();
    let my_id = NodeId(nodes.len());
    nodes.push(NodeData {
        kind: node.kind().to_string(),
        start: node.start_byte(),
        end: node.end_byte(),
        parent: None,
        children: Vec::new(),
        named_children: Vec::new(),
        fields: HashMap::new(),
    });

    let mut children = Vec::new();
    let mut named_children = Vec::new();
    let mut fields = HashMap::new();

    if cursor.goto_first_child() {
        loop {
            let field_name = cursor.field_name().map(|s| s.to_string());
            let is_named = cursor.node().is_named();
            let child_id = convert(cursor, nodes);
            nodes[child_id.0].parent = Some(my_id);
            children.push(child_id);
            if is_named {
                named_children.push(child_id);
            }
            if let Some(name) = field_name {
                fields.entry(name).or_insert(child_id);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
        cursor.goto_parent();
    }

    nodes[my_id.0].children = children;
    nodes[my_id.0].named_children = named_children;
    nodes[my_id.0].fields = fields;
    my_id
}

/// A read-only reference into a [`Cst`] snapshot. Cheap to clone (an `Arc`
/// bump plus a `usize`), which is what lets it cross into the sandbox.
#[derive(Debug, Clone)]
pub struct CstNode {
    cst: Arc<Cst>,
    id: NodeId,
}

impl CstNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The grammar rule name, e.g. `"function_definition"`.
    pub fn kind(&self) -> &str {
        &self.cst.data(self.id).kind
    }

    pub fn start(&self) -> usize {
        self.cst.data(self.id).start
    }

    pub fn end(&self) -> usize {
        self.cst.data(self.id).end
    }

    pub fn range(&self) -> crate::diagnostics::ByteRange {
        crate::diagnostics::ByteRange {
            start: self.start(),
            end: self.end(),
        }
    }

    /// The exact source substring this node spans.
    pub fn text(&self) -> &str {
        &self.cst.source[self.start()..self.end()]
    }

    pub fn parent(&self) -> Option<CstNode> {
        self.cst.data(self.id).parent.map(|id| CstNode {
            cst: Arc::clone(&self.cst),
            id,
        })
    }

    pub fn children(&self) -> Vec<CstNode> {
        self.cst
            .data(self.id)
            .children
            .iter()
            .map(|&id| CstNode {
                cst: Arc::clone(&self.cst),
                id,
            })
            .collect()
    }

    pub fn named_children(&self) -> Vec<CstNode> {
        self.cst
            .data(self.id)
            .named_children
            .iter()
            .map(|&id| CstNode {
                cst: Arc::clone(&self.cst),
                id,
            })
            .collect()
    }

    pub fn last_named_child(&self) -> Option<CstNode> {
        self.cst
            .data(self.id)
            .named_children
            .last()
            .map(|&id| CstNode {
                cst: Arc::clone(&self.cst),
                id,
            })
    }

    pub fn child_for_field_name(&self, name: &str) -> Option<CstNode> {
        self.cst
            .data(self.id)
            .fields
            .get(name)
            .map(|&id| CstNode {
                cst: Arc::clone(&self.cst),
                id,
            })
    }

    /// The nearest named sibling following this node, skipping `comment`
    /// nodes - several standard macros walk siblings manually rather than
    /// relying solely on the scanner's bound context node (§4.9).
    pub fn next_named_sibling(&self) -> Option<CstNode> {
        let parent = self.parent()?;
        let siblings = parent.named_children();
        let pos = siblings.iter().position(|n| n.id == self.id)?;
        siblings
            .into_iter()
            .skip(pos + 1)
            .find(|n| !n.is_comment())
    }

    pub fn is_comment(&self) -> bool {
        self.kind() == "comment"
    }

    pub fn is_preprocessor(&self) -> bool {
        self.kind().starts_with("preproc_")
    }

    /// Depth-first pre-order traversal rooted at `self`.
    pub fn walk(&self, mut visit: impl FnMut(&CstNode)) {
        fn go(node: &CstNode, visit: &mut impl FnMut(&CstNode)) {
            visit(node);
            for child in node.children() {
                go(&child, visit);
            }
        }
        go(self, &mut visit);
    }

    /// True when `self`'s byte range is fully contained in `ancestor`'s.
    pub fn is_descendant_of(&self, ancestor: &CstNode) -> bool {
        ancestor.start() <= self.start() && self.end() <= ancestor.end()
    }

    pub fn root(&self) -> CstNode {
        self.cst.root()
    }

    pub fn source(&self) -> &str {
        self.cst.source()
    }
}

impl PartialEq for CstNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cst, &other.cst) && self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_c;

    #[test]
    fn snapshot_preserves_text_and_structure() {
        let src = "int main() { return 0; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        assert_eq!(root.kind(), "translation_unit");
        let func = root.named_children().remove(0);
        assert_eq!(func.kind(), "function_definition");
        let body = func.child_for_field_name("body").unwrap();
        assert_eq!(body.kind(), "compound_statement");
        assert!(body.text().starts_with('{'));
    }

    #[test]
    fn next_named_sibling_skips_comments() {
        let src = "int a; /* c */ int b;";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let mut children = root.named_children();
        let first = children.remove(0);
        let next = first.next_named_sibling().unwrap();
        assert_eq!(next.kind(), "declaration");
        assert!(next.text().contains('b'));
    }
}
