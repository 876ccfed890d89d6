//! Edit buffer: collects surgical replacements against the *current*
//! source buffer, rejects conflicting overlaps, and materializes the
//! edited text in one atomic pass (§4.3).

use crate::diagnostics::{ByteRange, UppError};
use crate::err_ctx;

/// One submitted edit. `ordinal` is monotone in submission order and is
/// the tie-break for pure insertions that land at the same point.
#[derive(Debug, Clone)]
pub struct Edit {
    pub range: ByteRange,
    pub replacement: String,
    pub ordinal: usize,
}

/// Accumulates edits for one phase; `apply` performs the reconciliation
/// and buffer rewrite described in §4.3, then the buffer is discarded.
#[derive(Debug, Default)]
pub struct EditBuffer {
    edits: Vec<Edit>,
    next_ordinal: usize,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, range: ByteRange, replacement: impl Into<String>) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.edits.push(Edit {
            range,
            replacement: replacement.into(),
            ordinal,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn clear(&mut self) {
        self.edits.clear();
    }

    /// Applies every submitted edit to `source` in one atomic pass.
    ///
    /// Returns the new buffer plus any warnings for insertions dropped
    /// because they landed inside a replaced range (they are subsumed,
    /// not an error). Overlapping non-insertion edits are a hard
    /// `edit-conflict` error; the whole phase aborts.
    pub fn apply(&self, source: &str) -> Result<(String, Vec<String>), UppError> {
        let mut replacements: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|e| e.range.start < e.range.end)
            .collect();
        replacements.sort_by_key(|e| e.range.start);

        for pair in replacements.windows(2) {
            if pair[0].range.overlaps(&pair[1].range) {
                return Err(err_ctx!(EditConflict, pair[0].range, pair[1].range));
            }
        }

        let mut insertions: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|e| e.range.start == e.range.end)
            .collect();
        insertions.sort_by_key(|e| e.ordinal);

        let mut warnings = Vec::new();
        enum Event<'a> {
            Insert(&'a Edit),
            Replace(&'a Edit),
        }
        let mut events: Vec<(usize, u8, usize, Event)> = Vec::new();

        for ins in insertions {
            let p = ins.range.start;
            if let Some(containing) = replacements
                .iter()
                .find(|r| r.range.start <= p && p < r.range.end)
            {
                warnings.push(format!(
                    "insertion at byte {p} dropped: subsumed by replacement [{}, {})",
                    containing.range.start, containing.range.end
                ));
                continue;
            }
            // Insertions sort before a replacement that starts at the same
            // point ("queue before the first replacement whose start >= p"),
            // and among themselves by submission ordinal.
            events.push((p, 0, ins.ordinal, Event::Insert(ins)));
        }
        for rep in &replacements {
            events.push((rep.range.start, 1, 0, Event::Replace(rep)));
        }
        events.sort_by_key(|(pos, kind, ord, _)| (*pos, *kind, *ord));

        let mut result = String::with_capacity(source.len());
        let mut cursor = 0usize;
        for (pos, _, _, event) in events {
            result.push_str(&source[cursor..pos]);
            match event {
                Event::Insert(ins) => {
                    result.push_str(&ins.replacement);
                }
                Event::Replace(rep) => {
                    result.push_str(&rep.replacement);
                    cursor = rep.range.end;
                }
            }
        }
        result.push_str(&source[cursor..]);

        Ok((result, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng(start: usize, end: usize) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn identity_when_no_edits() {
        let buf = EditBuffer::new();
        let (out, warnings) = buf.apply("hello world").unwrap();
        assert_eq!(out, "hello world");
        assert!(warnings.is_empty());
    }

    #[test]
    fn single_replacement() {
        let mut buf = EditBuffer::new();
        buf.submit(rng(0, 5), "goodbye");
        let (out, _) = buf.apply("hello world").unwrap();
        assert_eq!(out, "goodbye world");
    }

    #[test]
    fn pure_insertions_applied_in_ordinal_order() {
        let mut buf = EditBuffer::new();
        buf.submit(rng(5, 5), "B");
        buf.submit(rng(5, 5), "A");
        let (out, _) = buf.apply("12345 rest").unwrap();
        assert_eq!(out, "12345BA rest");
    }

    #[test]
    fn overlapping_replacements_conflict() {
        let mut buf = EditBuffer::new();
        buf.submit(rng(0, 5), "x");
        buf.submit(rng(3, 8), "y");
        let err = buf.apply("0123456789").unwrap_err();
        assert!(matches!(err, UppError::EditConflict { .. }));
    }

    #[test]
    fn insertion_inside_replacement_is_dropped_with_warning() {
        let mut buf = EditBuffer::new();
        buf.submit(rng(0, 10), "REPLACED");
        buf.submit(rng(5, 5), "ignored");
        let (out, warnings) = buf.apply("0123456789tail").unwrap();
        assert_eq!(out, "REPLACEDtail");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn insertion_before_adjacent_replacement_is_ordered_first() {
        let mut buf = EditBuffer::new();
        buf.submit(rng(5, 5), "INS");
        buf.submit(rng(5, 8), "REP");
        let (out, _) = buf.apply("01234567890").unwrap();
        assert_eq!(out, "01234INSREP890");
    }
}
