//! Change algebra for notebook documents.
//!
//! A [`ChangeSet`] describes an edit to a single cell document as a sorted
//! list of replaced spans, addressed in bytes of the text the edit applies
//! to. Sets can be applied, inverted against the text they changed, composed
//! into a single equivalent set, and mapped over the [`ChangeDesc`] of
//! another edit so that positions recorded before that edit stay meaningful
//! after it.

use janus_core::CellId;
use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};

/// A single replaced span: bytes `from..to` of the old text are replaced by
/// `insert`. A deletion has an empty `insert`, an insertion has `from == to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub from: usize,
    pub to: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub insert: String,
}

/// An edit to one document, kept as sorted, non-overlapping spans. Touching
/// spans are merged on construction, so equal edits compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Change>", into = "Vec<Change>")]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Builds a set from arbitrary spans, sorting them and merging spans
    /// that touch. Fails when two spans overlap or a span ends before it
    /// starts.
    pub fn new(mut changes: Vec<Change>) -> Result<ChangeSet> {
        for change in &changes {
            if change.from > change.to {
                return Err(HistoryError::InvertedSpan {
                    from: change.from,
                    to: change.to,
                });
            }
        }
        changes.sort_by_key(|change| (change.from, change.to));
        for pair in changes.windows(2) {
            if pair[1].from < pair[0].to {
                return Err(HistoryError::Overlapping(pair[1].from));
            }
        }
        Ok(ChangeSet::from_sorted(changes))
    }

    /// A set holding one replacement.
    pub fn single(from: usize, to: usize, insert: impl Into<String>) -> Result<ChangeSet> {
        ChangeSet::new(vec![Change {
            from,
            to,
            insert: insert.into(),
        }])
    }

    pub fn empty() -> ChangeSet {
        ChangeSet {
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    // Input must be sorted and non-overlapping. Merges touching spans and
    // drops no-ops.
    fn from_sorted(changes: Vec<Change>) -> ChangeSet {
        let mut merged: Vec<Change> = Vec::with_capacity(changes.len());
        for change in changes {
            if change.from == change.to && change.insert.is_empty() {
                continue;
            }
            if let Some(last) = merged.last_mut()
                && last.to == change.from
            {
                last.to = change.to;
                last.insert.push_str(&change.insert);
            } else {
                merged.push(change);
            }
        }
        ChangeSet { changes: merged }
    }

    /// Applies the set to the text it was built against.
    pub fn apply(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0usize;
        for change in &self.changes {
            check_span(text, change.from, change.to)?;
            out.push_str(&text[pos..change.from]);
            out.push_str(&change.insert);
            pos = change.to;
        }
        out.push_str(&text[pos..]);
        Ok(out)
    }

    /// The set that undoes this one, addressed in the document this set
    /// produces. `text` is the document the set applies to, which supplies
    /// the replaced content.
    pub fn invert(&self, text: &str) -> Result<ChangeSet> {
        let mut inverted = Vec::with_capacity(self.changes.len());
        let mut drift = 0isize;
        for change in &self.changes {
            check_span(text, change.from, change.to)?;
            let from = ((change.from as isize) + drift).max(0) as usize;
            inverted.push(Change {
                from,
                to: from + change.insert.len(),
                insert: text[change.from..change.to].to_string(),
            });
            drift += change.insert.len() as isize - (change.to - change.from) as isize;
        }
        Ok(ChangeSet::from_sorted(inverted))
    }

    /// Combines this set with one addressed in the document it produces,
    /// yielding a single set with the same effect as applying both in turn.
    /// Fails when `other` cuts through a multi-byte character this set
    /// inserted.
    pub fn compose(&self, other: &ChangeSet) -> Result<ChangeSet> {
        let mut a_iter = self.ops().into_iter();
        let mut b_iter = other.ops().into_iter();
        let mut a_cur = a_iter.next();
        let mut b_cur = b_iter.next();
        let mut out: Vec<Change> = Vec::new();
        let mut pos = 0usize;

        // Walks both op lists in lockstep. The unit consumed on each step is
        // length in the intermediate document, so a's inserts line up with
        // b's input. Replacement payloads are emitted the first time an op
        // is touched; remainders carry none.
        loop {
            match (a_cur.take(), b_cur.take()) {
                (None, None) => break,
                (Some(Op::Retain(n)), None) => {
                    pos += n;
                    a_cur = a_iter.next();
                }
                (Some(Op::Replace { old, insert }), None) => {
                    out.push(Change {
                        from: pos,
                        to: pos + old,
                        insert,
                    });
                    pos += old;
                    a_cur = a_iter.next();
                }
                (None, Some(Op::Retain(n))) => {
                    pos += n;
                    b_cur = b_iter.next();
                }
                (None, Some(Op::Replace { old, insert })) => {
                    out.push(Change {
                        from: pos,
                        to: pos + old,
                        insert,
                    });
                    pos += old;
                    b_cur = b_iter.next();
                }
                (Some(Op::Retain(a_n)), Some(Op::Retain(b_n))) => {
                    let n = a_n.min(b_n);
                    pos += n;
                    a_cur = if a_n > n {
                        Some(Op::Retain(a_n - n))
                    } else {
                        a_iter.next()
                    };
                    b_cur = if b_n > n {
                        Some(Op::Retain(b_n - n))
                    } else {
                        b_iter.next()
                    };
                }
                (Some(Op::Retain(a_n)), Some(Op::Replace { old, insert })) => {
                    let n = a_n.min(old);
                    out.push(Change {
                        from: pos,
                        to: pos + n,
                        insert,
                    });
                    pos += n;
                    a_cur = if a_n > n {
                        Some(Op::Retain(a_n - n))
                    } else {
                        a_iter.next()
                    };
                    b_cur = if old > n {
                        Some(Op::Replace {
                            old: old - n,
                            insert: String::new(),
                        })
                    } else {
                        b_iter.next()
                    };
                }
                (Some(Op::Replace { old, insert }), Some(Op::Retain(b_n))) => {
                    if insert.len() <= b_n {
                        let kept = insert.len();
                        out.push(Change {
                            from: pos,
                            to: pos + old,
                            insert,
                        });
                        pos += old;
                        a_cur = a_iter.next();
                        b_cur = if b_n > kept {
                            Some(Op::Retain(b_n - kept))
                        } else {
                            b_iter.next()
                        };
                    } else {
                        let (head, tail) = split_insert(insert, b_n)?;
                        out.push(Change {
                            from: pos,
                            to: pos + old,
                            insert: head,
                        });
                        pos += old;
                        a_cur = Some(Op::Replace {
                            old: 0,
                            insert: tail,
                        });
                        b_cur = b_iter.next();
                    }
                }
                (
                    Some(Op::Replace {
                        old,
                        insert: a_insert,
                    }),
                    Some(Op::Replace {
                        old: b_old,
                        insert: b_insert,
                    }),
                ) => {
                    if a_insert.len() <= b_old {
                        let eaten = a_insert.len();
                        out.push(Change {
                            from: pos,
                            to: pos + old,
                            insert: b_insert,
                        });
                        pos += old;
                        a_cur = a_iter.next();
                        b_cur = if b_old > eaten {
                            Some(Op::Replace {
                                old: b_old - eaten,
                                insert: String::new(),
                            })
                        } else {
                            b_iter.next()
                        };
                    } else {
                        let (_, tail) = split_insert(a_insert, b_old)?;
                        out.push(Change {
                            from: pos,
                            to: pos + old,
                            insert: b_insert,
                        });
                        pos += old;
                        a_cur = Some(Op::Replace {
                            old: 0,
                            insert: tail,
                        });
                        b_cur = b_iter.next();
                    }
                }
            }
        }

        Ok(ChangeSet::from_sorted(out))
    }

    /// Repositions this set over another edit described by `through`, as if
    /// that edit had been applied first. Spans landing entirely inside text
    /// `through` deleted collapse; collapsed pure deletions are dropped.
    pub fn map(&self, through: &ChangeDesc) -> ChangeSet {
        let mut mapped = Vec::with_capacity(self.changes.len());
        for change in &self.changes {
            let from = through.map_pos(change.from, 1);
            let to = through.map_pos(change.to, -1).max(from);
            if from == to && change.insert.is_empty() {
                continue;
            }
            mapped.push(Change {
                from,
                to,
                insert: change.insert.clone(),
            });
        }
        ChangeSet::from_sorted(mapped)
    }

    /// The positions-and-lengths shadow of this set.
    pub fn desc(&self) -> ChangeDesc {
        ChangeDesc {
            spans: self
                .changes
                .iter()
                .map(|change| Span {
                    from: change.from,
                    to: change.to,
                    len: change.insert.len(),
                })
                .collect(),
        }
    }

    /// Whether `other`, addressed in the document this set produces, touches
    /// any of the spans this set replaced. Touching counts: an insertion
    /// right at the edge of an earlier edit is adjacent to it.
    pub fn is_adjacent(&self, other: &ChangeSet) -> bool {
        let mut drift = 0isize;
        for change in &other.changes {
            let out_from = ((change.from as isize) + drift).max(0) as usize;
            let out_to = out_from + change.insert.len();
            if self
                .changes
                .iter()
                .any(|span| out_to >= span.from && out_from <= span.to)
            {
                return true;
            }
            drift += change.insert.len() as isize - (change.to - change.from) as isize;
        }
        false
    }

    // The set as a run of ops over the old document, without the implicit
    // trailing retain.
    fn ops(&self) -> Vec<Op> {
        let mut ops = Vec::with_capacity(self.changes.len() * 2);
        let mut pos = 0usize;
        for change in &self.changes {
            if change.from > pos {
                ops.push(Op::Retain(change.from - pos));
            }
            ops.push(Op::Replace {
                old: change.to - change.from,
                insert: change.insert.clone(),
            });
            pos = change.to;
        }
        ops
    }
}

impl TryFrom<Vec<Change>> for ChangeSet {
    type Error = HistoryError;

    fn try_from(changes: Vec<Change>) -> Result<ChangeSet> {
        ChangeSet::new(changes)
    }
}

impl From<ChangeSet> for Vec<Change> {
    fn from(set: ChangeSet) -> Vec<Change> {
        set.changes
    }
}

enum Op {
    Retain(usize),
    Replace { old: usize, insert: String },
}

enum LenOp {
    Retain(usize),
    Replace { old: usize, new: usize },
}

fn split_insert(insert: String, at: usize) -> Result<(String, String)> {
    if !insert.is_char_boundary(at) {
        return Err(HistoryError::NotCharBoundary(at));
    }
    let tail = insert[at..].to_string();
    let mut head = insert;
    head.truncate(at);
    Ok((head, tail))
}

fn check_span(text: &str, from: usize, to: usize) -> Result<()> {
    if from > to {
        return Err(HistoryError::InvertedSpan { from, to });
    }
    if to > text.len() {
        return Err(HistoryError::OutOfBounds {
            from,
            to,
            len: text.len(),
        });
    }
    if !text.is_char_boundary(from) {
        return Err(HistoryError::NotCharBoundary(from));
    }
    if !text.is_char_boundary(to) {
        return Err(HistoryError::NotCharBoundary(to));
    }
    Ok(())
}

/// One span of a [`ChangeDesc`]: bytes `from..to` of the old document were
/// replaced by `len` new bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub from: usize,
    pub to: usize,
    pub len: usize,
}

/// The shape of an edit with the inserted text stripped. Enough to map
/// positions and other edits, and much cheaper to keep around than the full
/// [`ChangeSet`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDesc {
    spans: Vec<Span>,
}

impl ChangeDesc {
    pub fn empty() -> ChangeDesc {
        ChangeDesc { spans: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Maps a position in the old document to the new one. `assoc` breaks
    /// ties at insertion points: positive sticks to the text after the
    /// insertion, zero or negative stays before it. Positions inside a
    /// replaced span move to its start, or past the insertion when `assoc`
    /// is positive.
    pub fn map_pos(&self, pos: usize, assoc: i32) -> usize {
        let mut drift = 0isize;
        for span in &self.spans {
            if span.from > pos {
                break;
            }
            if span.from == pos {
                if assoc > 0 && span.from == span.to {
                    drift += span.len as isize;
                }
                break;
            }
            if span.to > pos {
                let shifted = span.from as isize
                    + drift
                    + if assoc > 0 { span.len as isize } else { 0 };
                return shifted.max(0) as usize;
            }
            drift += span.len as isize - (span.to - span.from) as isize;
        }
        ((pos as isize) + drift).max(0) as usize
    }

    /// Combines with the desc of an edit made to this one's output
    /// document. Mirrors [`ChangeSet::compose`] on lengths alone, so it
    /// cannot fail.
    pub fn compose(&self, other: &ChangeDesc) -> ChangeDesc {
        let mut a_iter = self.ops().into_iter();
        let mut b_iter = other.ops().into_iter();
        let mut a_cur = a_iter.next();
        let mut b_cur = b_iter.next();
        let mut spans: Vec<Span> = Vec::new();
        let mut pos = 0usize;

        loop {
            match (a_cur.take(), b_cur.take()) {
                (None, None) => break,
                (Some(LenOp::Retain(n)), None) => {
                    pos += n;
                    a_cur = a_iter.next();
                }
                (Some(LenOp::Replace { old, new }), None) => {
                    push_span(&mut spans, pos, pos + old, new);
                    pos += old;
                    a_cur = a_iter.next();
                }
                (None, Some(LenOp::Retain(n))) => {
                    pos += n;
                    b_cur = b_iter.next();
                }
                (None, Some(LenOp::Replace { old, new })) => {
                    push_span(&mut spans, pos, pos + old, new);
                    pos += old;
                    b_cur = b_iter.next();
                }
                (Some(LenOp::Retain(a_n)), Some(LenOp::Retain(b_n))) => {
                    let n = a_n.min(b_n);
                    pos += n;
                    a_cur = if a_n > n {
                        Some(LenOp::Retain(a_n - n))
                    } else {
                        a_iter.next()
                    };
                    b_cur = if b_n > n {
                        Some(LenOp::Retain(b_n - n))
                    } else {
                        b_iter.next()
                    };
                }
                (Some(LenOp::Retain(a_n)), Some(LenOp::Replace { old, new })) => {
                    let n = a_n.min(old);
                    push_span(&mut spans, pos, pos + n, new);
                    pos += n;
                    a_cur = if a_n > n {
                        Some(LenOp::Retain(a_n - n))
                    } else {
                        a_iter.next()
                    };
                    b_cur = if old > n {
                        Some(LenOp::Replace {
                            old: old - n,
                            new: 0,
                        })
                    } else {
                        b_iter.next()
                    };
                }
                (Some(LenOp::Replace { old, new: a_new }), Some(LenOp::Retain(b_n))) => {
                    if a_new <= b_n {
                        push_span(&mut spans, pos, pos + old, a_new);
                        pos += old;
                        a_cur = a_iter.next();
                        b_cur = if b_n > a_new {
                            Some(LenOp::Retain(b_n - a_new))
                        } else {
                            b_iter.next()
                        };
                    } else {
                        push_span(&mut spans, pos, pos + old, b_n);
                        pos += old;
                        a_cur = Some(LenOp::Replace {
                            old: 0,
                            new: a_new - b_n,
                        });
                        b_cur = b_iter.next();
                    }
                }
                (
                    Some(LenOp::Replace { old, new: a_new }),
                    Some(LenOp::Replace {
                        old: b_old,
                        new: b_new,
                    }),
                ) => {
                    if a_new <= b_old {
                        push_span(&mut spans, pos, pos + old, b_new);
                        pos += old;
                        a_cur = a_iter.next();
                        b_cur = if b_old > a_new {
                            Some(LenOp::Replace {
                                old: b_old - a_new,
                                new: 0,
                            })
                        } else {
                            b_iter.next()
                        };
                    } else {
                        push_span(&mut spans, pos, pos + old, b_new);
                        pos += old;
                        a_cur = Some(LenOp::Replace {
                            old: 0,
                            new: a_new - b_old,
                        });
                        b_cur = b_iter.next();
                    }
                }
            }
        }

        ChangeDesc { spans }
    }

    /// Repositions this desc over another edit, endpoint by endpoint, the
    /// way [`ChangeSet::map`] repositions a set.
    pub fn map(&self, through: &ChangeDesc) -> ChangeDesc {
        let mut spans = Vec::with_capacity(self.spans.len());
        for span in &self.spans {
            let from = through.map_pos(span.from, 1);
            let to = through.map_pos(span.to, -1).max(from);
            if from == to && span.len == 0 {
                continue;
            }
            push_span(&mut spans, from, to, span.len);
        }
        ChangeDesc { spans }
    }

    fn ops(&self) -> Vec<LenOp> {
        let mut ops = Vec::with_capacity(self.spans.len() * 2);
        let mut pos = 0usize;
        for span in &self.spans {
            if span.from > pos {
                ops.push(LenOp::Retain(span.from - pos));
            }
            ops.push(LenOp::Replace {
                old: span.to - span.from,
                new: span.len,
            });
            pos = span.to;
        }
        ops
    }
}

fn push_span(spans: &mut Vec<Span>, from: usize, to: usize, len: usize) {
    if from == to && len == 0 {
        return;
    }
    if let Some(last) = spans.last_mut()
        && last.to == from
    {
        last.to = to;
        last.len += len;
        return;
    }
    spans.push(Span { from, to, len });
}

/// One cursor or selected range inside a cell, `anchor` being the fixed end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelRange {
    pub anchor: usize,
    pub head: usize,
}

/// A selection inside a single cell document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub cell: CellId,
    pub ranges: Vec<SelRange>,
}

impl Selection {
    /// A single-range selection; a caret when `anchor == head`.
    pub fn single(cell: CellId, anchor: usize, head: usize) -> Selection {
        Selection {
            cell,
            ranges: vec![SelRange { anchor, head }],
        }
    }

    pub fn caret(cell: CellId, at: usize) -> Selection {
        Selection::single(cell, at, at)
    }

    /// Maps every range through an edit to this selection's cell.
    pub fn map(&self, through: &ChangeDesc) -> Selection {
        Selection {
            cell: self.cell,
            ranges: self
                .ranges
                .iter()
                .map(|range| SelRange {
                    anchor: through.map_pos(range.anchor, -1),
                    head: through.map_pos(range.head, -1),
                })
                .collect(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
