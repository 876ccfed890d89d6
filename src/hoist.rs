//! Hoist buffer: collects top-of-file insertions, preserving registration
//! order, and places them after any leading comments/preprocessor
//! directives but before the first real declaration (§4.4).

use crate::cst::CstNode;
use crate::diagnostics::ByteRange;
use crate::edit::EditBuffer;

#[derive(Debug, Default)]
pub struct HoistBuffer {
    items: Vec<String>,
}

impl HoistBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.items.push(text.into());
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// `maxEnd` of the longest contiguous run of leading children whose
    /// type is comment or preprocessor directive, at the current root.
    pub fn insertion_point(root: &CstNode) -> usize {
        let mut point = 0;
        for child in root.named_children() {
            if child.is_comment() || child.is_preprocessor() {
                point = child.end();
            } else {
                break;
            }
        }
        point
    }

    /// Collected strings concatenated in submission order, each preceded
    /// by a newline separator.
    pub fn content(&self) -> String {
        self.items.iter().map(|s| format!("\n{s}")).collect()
    }

    /// Submits a single pure insertion carrying all pending hoists. The
    /// insertion point is computed against `root`, i.e. in the same phase
    /// as application, so it tolerates edits already queued this phase.
    pub fn flush_into(&self, edits: &mut EditBuffer, root: &CstNode) {
        if self.items.is_empty() {
            return;
        }
        let point = Self::insertion_point(root);
        edits.submit(ByteRange::point(point), self.content());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_c;

    #[test]
    fn hoists_land_after_leading_preprocessor_lines() {
        let src = "#include <stdio.h>\nint main(void) { return 0; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        let mut hoists = HoistBuffer::new();
        hoists.push("A\n");
        hoists.push("B\n");
        let mut edits = EditBuffer::new();
        hoists.flush_into(&mut edits, &root);
        let (out, _) = edits.apply(src).unwrap();
        let include_pos = out.find("#include").unwrap();
        let a_pos = out.find('A').unwrap();
        let b_pos = out.find('B').unwrap();
        let main_pos = out.find("int main").unwrap();
        assert!(include_pos < a_pos);
        assert!(a_pos < b_pos);
        assert!(b_pos < main_pos);
    }

    #[test]
    fn hoists_land_at_start_when_no_preamble() {
        let src = "int main(void) { return 0; }";
        let cst = parse_c(src).unwrap();
        let root = cst.root();
        assert_eq!(HoistBuffer::insertion_point(&root), 0);
    }
}
