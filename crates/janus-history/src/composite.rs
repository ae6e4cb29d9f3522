//! Pointwise lifting of the change algebra to the whole notebook.
//!
//! A composite value is a map from cell id to that cell's own change set
//! or description. Every composite operation applies the per-cell
//! operation where both sides hold an entry for a cell and passes lone
//! entries through unchanged, which is what lets the history treat "N
//! independent documents" as one document.
//!
//! [`DocSet`] is the concrete composite text store: the ordered cell
//! documents a history operates over.

use std::collections::BTreeMap;

use janus_core::CellId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::changes::{ChangeDesc, ChangeSet, Selection};
use crate::error::{HistoryError, Result};

/// One edit across the notebook: a change set per touched cell.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeChanges {
    entries: BTreeMap<CellId, ChangeSet>,
}

impl CompositeChanges {
    pub fn empty() -> CompositeChanges {
        CompositeChanges::default()
    }

    /// A composite touching one cell.
    pub fn single(cell: CellId, changes: ChangeSet) -> CompositeChanges {
        let mut composite = CompositeChanges::empty();
        composite.set(cell, changes);
        composite
    }

    /// Stores a cell's change set. Empty sets are dropped so a composite
    /// with nothing left to say compares equal to [`CompositeChanges::empty`].
    pub fn set(&mut self, cell: CellId, changes: ChangeSet) {
        if changes.is_empty() {
            self.entries.remove(&cell);
        } else {
            self.entries.insert(cell, changes);
        }
    }

    pub fn get(&self, cell: CellId) -> Option<&ChangeSet> {
        self.entries.get(&cell)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cells this composite touches, in id order.
    pub fn touched(&self) -> impl Iterator<Item = CellId> + '_ {
        self.entries.keys().copied()
    }

    /// The touched cell when exactly one is, which is the only shape
    /// eligible for undo-group coalescing.
    pub fn single_doc(&self) -> Option<CellId> {
        let mut touched = self.entries.keys();
        match (touched.next(), touched.next()) {
            (Some(&cell), None) => Some(cell),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &ChangeSet)> {
        self.entries.iter().map(|(cell, set)| (*cell, set))
    }

    /// The composite that undoes this one. `docs` must be the documents
    /// this composite applies to; a touched cell missing from them is a
    /// caller bug.
    pub fn invert(&self, docs: &DocSet) -> Result<CompositeChanges> {
        let mut inverted = CompositeChanges::empty();
        for (cell, set) in self.iter() {
            let text = docs.get(cell).ok_or(HistoryError::UnknownDoc(cell))?;
            inverted.set(cell, set.invert(text)?);
        }
        Ok(inverted)
    }

    /// Sequential composition with a composite addressed in the documents
    /// this one produces, cell by cell.
    pub fn compose(&self, other: &CompositeChanges) -> Result<CompositeChanges> {
        let mut composed = self.clone();
        for (cell, second) in other.iter() {
            let combined = match composed.get(cell) {
                Some(first) => first.compose(second)?,
                None => second.clone(),
            };
            composed.set(cell, combined);
        }
        Ok(composed)
    }

    /// Repositions every entry over another composite edit. Cells the
    /// other edit does not touch pass through unchanged; entries emptied
    /// by the mapping are dropped.
    pub fn map(&self, through: &CompositeDesc) -> CompositeChanges {
        let mut mapped = CompositeChanges::empty();
        for (cell, set) in self.iter() {
            match through.get(cell) {
                Some(desc) => mapped.set(cell, set.map(desc)),
                None => mapped.set(cell, set.clone()),
            }
        }
        mapped
    }

    /// The length-only shadow of this composite.
    pub fn desc(&self) -> CompositeDesc {
        CompositeDesc {
            entries: self
                .entries
                .iter()
                .map(|(cell, set)| (*cell, set.desc()))
                .collect(),
        }
    }
}

/// The length-only shadow of a [`CompositeChanges`], one [`ChangeDesc`]
/// per touched cell.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeDesc {
    entries: BTreeMap<CellId, ChangeDesc>,
}

impl CompositeDesc {
    pub fn empty() -> CompositeDesc {
        CompositeDesc::default()
    }

    pub fn single(cell: CellId, desc: ChangeDesc) -> CompositeDesc {
        let mut composite = CompositeDesc::empty();
        composite.set(cell, desc);
        composite
    }

    pub fn set(&mut self, cell: CellId, desc: ChangeDesc) {
        if desc.is_empty() {
            self.entries.remove(&cell);
        } else {
            self.entries.insert(cell, desc);
        }
    }

    pub fn get(&self, cell: CellId) -> Option<&ChangeDesc> {
        self.entries.get(&cell)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &ChangeDesc)> {
        self.entries.iter().map(|(cell, desc)| (*cell, desc))
    }

    /// Pointwise sequential composition; lone entries pass through.
    pub fn compose(&self, other: &CompositeDesc) -> CompositeDesc {
        let mut composed = self.clone();
        for (cell, second) in other.iter() {
            let combined = match composed.get(cell) {
                Some(first) => first.compose(second),
                None => second.clone(),
            };
            composed.set(cell, combined);
        }
        composed
    }

    /// Pointwise mapping over another composite edit.
    pub fn map(&self, through: &CompositeDesc) -> CompositeDesc {
        let mut mapped = CompositeDesc::empty();
        for (cell, desc) in self.iter() {
            match through.get(cell) {
                Some(other) => mapped.set(cell, desc.map(other)),
                None => mapped.set(cell, desc.clone()),
            }
        }
        mapped
    }

    /// Maps a selection through the entry for its cell, if any.
    pub fn map_selection(&self, selection: &Selection) -> Selection {
        match self.get(selection.cell) {
            Some(desc) => selection.map(desc),
            None => selection.clone(),
        }
    }
}

/// The ordered cell documents a history operates over.
///
/// Callers with their own document model only need something equivalent;
/// tests and the bundled helpers use this one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocSet {
    order: Vec<CellId>,
    texts: FxHashMap<CellId, String>,
}

impl DocSet {
    pub fn new() -> DocSet {
        DocSet::default()
    }

    /// Builds a set from ordered `(cell, text)` pairs.
    pub fn from_docs(docs: Vec<(CellId, String)>) -> Result<DocSet> {
        let mut set = DocSet::new();
        for (cell, text) in docs {
            set.insert(set.len(), cell, text)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, cell: CellId) -> Option<&str> {
        self.texts.get(&cell).map(String::as_str)
    }

    pub fn position(&self, cell: CellId) -> Option<usize> {
        self.order.iter().position(|id| *id == cell)
    }

    pub fn ids(&self) -> &[CellId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &str)> {
        self.order
            .iter()
            .map(|cell| (*cell, self.texts[cell].as_str()))
    }

    /// Inserts a new document at `at`, clamped to the end.
    pub fn insert(&mut self, at: usize, cell: CellId, text: String) -> Result<()> {
        if self.texts.contains_key(&cell) {
            return Err(HistoryError::DuplicateDoc(cell));
        }
        self.order.insert(at.min(self.order.len()), cell);
        self.texts.insert(cell, text);
        Ok(())
    }

    /// Removes a document, returning its text.
    pub fn remove(&mut self, cell: CellId) -> Result<String> {
        let at = self
            .position(cell)
            .ok_or(HistoryError::UnknownDoc(cell))?;
        self.order.remove(at);
        Ok(self.texts.remove(&cell).unwrap_or_default())
    }

    /// Applies a composite edit in place. Fails without partial effect on
    /// an unknown cell; a bad span may leave earlier cells updated, which
    /// is acceptable for a caller-bug error.
    pub fn apply(&mut self, changes: &CompositeChanges) -> Result<()> {
        for (cell, _) in changes.iter() {
            if !self.texts.contains_key(&cell) {
                return Err(HistoryError::UnknownDoc(cell));
            }
        }
        for (cell, set) in changes.iter() {
            let text = self.texts.get_mut(&cell).ok_or(HistoryError::UnknownDoc(cell))?;
            *text = set.apply(text)?;
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::SelRange;

    fn set(from: usize, to: usize, insert: &str) -> ChangeSet {
        ChangeSet::single(from, to, insert).expect("valid change set")
    }

    fn docs() -> DocSet {
        DocSet::from_docs(vec![
            (CellId(0), "x = 1".to_string()),
            (CellId(1), "y = x".to_string()),
        ])
        .expect("docs")
    }

    #[test]
    fn test_apply_touches_only_named_cells() {
        let mut docs = docs();
        let edit = CompositeChanges::single(CellId(0), set(4, 5, "2"));
        docs.apply(&edit).expect("apply");
        assert_eq!(docs.get(CellId(0)), Some("x = 2"));
        assert_eq!(docs.get(CellId(1)), Some("y = x"));
    }

    #[test]
    fn test_apply_unknown_cell_is_an_error() {
        let mut docs = docs();
        let edit = CompositeChanges::single(CellId(9), set(0, 0, "?"));
        assert_eq!(docs.apply(&edit), Err(HistoryError::UnknownDoc(CellId(9))));
    }

    #[test]
    fn test_invert_round_trips_multi_cell_edit() {
        let mut after = docs();
        let mut edit = CompositeChanges::single(CellId(0), set(4, 5, "10"));
        edit.set(CellId(1), set(0, 1, "z"));

        let inverse = edit.invert(&docs()).expect("invert");
        after.apply(&edit).expect("apply");
        assert_eq!(after.get(CellId(0)), Some("x = 10"));
        assert_eq!(after.get(CellId(1)), Some("z = x"));

        after.apply(&inverse).expect("apply inverse");
        assert_eq!(after, docs());
    }

    #[test]
    fn test_compose_passes_lone_entries_through() {
        let first = CompositeChanges::single(CellId(0), set(0, 1, "a"));
        let second = CompositeChanges::single(CellId(1), set(0, 1, "b"));
        let composed = first.compose(&second).expect("compose");
        assert_eq!(composed.get(CellId(0)), Some(&set(0, 1, "a")));
        assert_eq!(composed.get(CellId(1)), Some(&set(0, 1, "b")));
    }

    #[test]
    fn test_map_leaves_other_cells_alone() {
        let mut edit = CompositeChanges::single(CellId(0), set(4, 5, "q"));
        edit.set(CellId(1), set(4, 5, "q"));
        let through = CompositeDesc::single(CellId(0), set(0, 0, ">> ").desc());

        let mapped = edit.map(&through);
        assert_eq!(mapped.get(CellId(0)), Some(&set(7, 8, "q")));
        assert_eq!(mapped.get(CellId(1)), Some(&set(4, 5, "q")));
    }

    #[test]
    fn test_single_doc_detection() {
        let one = CompositeChanges::single(CellId(3), set(0, 0, "a"));
        assert_eq!(one.single_doc(), Some(CellId(3)));

        let mut two = one.clone();
        two.set(CellId(4), set(0, 0, "b"));
        assert_eq!(two.single_doc(), None);
        assert_eq!(CompositeChanges::empty().single_doc(), None);
    }

    #[test]
    fn test_empty_entries_are_dropped() {
        let mut edit = CompositeChanges::single(CellId(0), set(0, 1, "a"));
        edit.set(CellId(0), ChangeSet::empty());
        assert!(edit.is_empty());
        assert_eq!(edit, CompositeChanges::empty());
    }

    #[test]
    fn test_docset_insert_and_remove() {
        let mut docs = docs();
        docs.insert(1, CellId(2), "z = y".to_string()).expect("insert");
        assert_eq!(docs.ids(), &[CellId(0), CellId(2), CellId(1)]);
        assert_eq!(
            docs.insert(0, CellId(2), String::new()),
            Err(HistoryError::DuplicateDoc(CellId(2)))
        );

        let text = docs.remove(CellId(2)).expect("remove");
        assert_eq!(text, "z = y");
        assert_eq!(docs.ids(), &[CellId(0), CellId(1)]);
        assert_eq!(
            docs.remove(CellId(2)),
            Err(HistoryError::UnknownDoc(CellId(2)))
        );
    }

    #[test]
    fn test_map_selection_uses_matching_entry() {
        let through = CompositeDesc::single(CellId(0), set(0, 0, "## ").desc());
        let moved = through.map_selection(&Selection::caret(CellId(0), 2));
        assert_eq!(moved.ranges, vec![SelRange { anchor: 5, head: 5 }]);

        let untouched = through.map_selection(&Selection::caret(CellId(1), 2));
        assert_eq!(untouched.ranges, vec![SelRange { anchor: 2, head: 2 }]);
    }
}
