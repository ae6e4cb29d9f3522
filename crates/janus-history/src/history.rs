//! The composite undo/redo engine.
//!
//! [`History`] keeps two branches of events, `done` and `undone`. Every
//! recorded transaction stores the *inverse* of its edit, so undo is
//! "apply the top event's changes and effects"; the mirrored event pushed
//! onto the other branch makes redo the same operation with the roles
//! swapped. Adjacent small edits coalesce into one event, bounded
//! branches evict their oldest events, and edits excluded from history
//! are folded into the stored events so older inverses keep applying
//! cleanly to documents that shifted underneath them.
//!
//! Time never comes from a clock: each transaction carries its own
//! caller-supplied timestamp, which keeps grouping decisions
//! deterministic and testable.

use crate::changes::Selection;
use crate::composite::{CompositeChanges, CompositeDesc, DocSet};
use crate::effect::{EffectInverter, ScopedEffect, StructuralEffect};
use crate::error::Result;

/// Trailing selections stored per event; later cursor moves within the
/// same group are dropped once the cap is reached.
const MAX_SELECTIONS_PER_EVENT: usize = 200;

/// A branch may overshoot its configured depth by this many events before
/// the oldest are evicted, amortizing the trim.
const BRANCH_SLACK: usize = 20;

/// Tunables for grouping and retention.
#[derive(Clone, Copy, Debug)]
pub struct HistoryConfig {
    /// Events guaranteed to be kept per branch.
    pub min_depth: usize,
    /// Edits further apart than this never join the same undo group.
    pub new_group_delay_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            min_depth: 100,
            new_group_delay_ms: 500,
        }
    }
}

/// The user-interaction category a transaction came from, which decides
/// whether it may join the previous undo group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UserEvent {
    /// Continuous typing; joinable.
    Typing,
    /// Continuous deletion; joinable.
    Deleting,
    /// An input-method composition continuing; always coalesces,
    /// regardless of adjacency or timing.
    Composing,
    /// Anything else; never coalesces.
    #[default]
    Other,
}

impl UserEvent {
    fn joinable(self) -> bool {
        matches!(self, UserEvent::Typing | UserEvent::Deleting)
    }
}

/// Barrier markers preventing a transaction from joining an undo group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Isolate {
    #[default]
    None,
    /// Never merge with what came before.
    Before,
    /// Never let the next transaction merge with this one.
    After,
    /// Both.
    Full,
}

impl Isolate {
    fn resets_before(self) -> bool {
        matches!(self, Isolate::Before | Isolate::Full)
    }

    fn resets_after(self) -> bool {
        matches!(self, Isolate::After | Isolate::Full)
    }
}

/// One atomic notebook edit as handed to [`History::record`].
///
/// The transaction describes the *forward* edit; the history derives and
/// stores its inverse. `changes` are addressed in the documents the
/// transaction applied to.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub changes: CompositeChanges,
    pub effects: Vec<ScopedEffect>,
    /// Selection before the transaction, restored by undoing it.
    pub selection_before: Option<Selection>,
    /// Selection after the transaction.
    pub selection_after: Option<Selection>,
    pub user_event: UserEvent,
    /// Caller-supplied timestamp in milliseconds.
    pub time: u64,
    /// `false` for edits that change the document without creating an
    /// undo entry, such as a remote sync patch.
    pub add_to_history: bool,
    pub isolate: Isolate,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            changes: CompositeChanges::empty(),
            effects: Vec::new(),
            selection_before: None,
            selection_after: None,
            user_event: UserEvent::Other,
            time: 0,
            add_to_history: true,
            isolate: Isolate::None,
        }
    }
}

impl Transaction {
    /// A plain change transaction.
    pub fn edit(changes: CompositeChanges) -> Transaction {
        Transaction {
            changes,
            ..Transaction::default()
        }
    }

    /// A cursor move with no document change.
    pub fn selection_only(selection: Selection) -> Transaction {
        Transaction {
            selection_after: Some(selection),
            ..Transaction::default()
        }
    }

    pub fn with_effects(mut self, effects: Vec<ScopedEffect>) -> Transaction {
        self.effects = effects;
        self
    }

    pub fn at(mut self, time: u64) -> Transaction {
        self.time = time;
        self
    }

    pub fn by(mut self, user_event: UserEvent) -> Transaction {
        self.user_event = user_event;
        self
    }

    pub fn isolated(mut self, isolate: Isolate) -> Transaction {
        self.isolate = isolate;
        self
    }

    /// Marks the transaction excluded from history.
    pub fn excluded(mut self) -> Transaction {
        self.add_to_history = false;
        self
    }

    pub fn before(mut self, selection: Selection) -> Transaction {
        self.selection_before = Some(selection);
        self
    }

    pub fn after(mut self, selection: Selection) -> Transaction {
        self.selection_after = Some(selection);
        self
    }

    /// Applies the forward edit to a document set: changes first, then
    /// structural effects in order.
    pub fn apply(&self, docs: &mut DocSet) -> Result<()> {
        docs.apply(&self.changes)?;
        apply_effects(docs, &self.effects)
    }
}

/// What [`History::undo`] and [`History::redo`] hand back: an edit the
/// caller applies atomically across all affected cells, without recording
/// it again.
#[derive(Clone, Debug)]
pub struct HistoryTransaction {
    pub changes: CompositeChanges,
    /// Structural effects to re-dispatch, each directed at its cell.
    pub effects: Vec<ScopedEffect>,
    /// The selection to restore, when the popped event stored one.
    pub selection: Option<Selection>,
}

impl HistoryTransaction {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.effects.is_empty()
    }

    /// Applies the transaction to a document set.
    pub fn apply(&self, docs: &mut DocSet) -> Result<()> {
        docs.apply(&self.changes)?;
        apply_effects(docs, &self.effects)
    }
}

fn apply_effects(docs: &mut DocSet, effects: &[ScopedEffect]) -> Result<()> {
    for scoped in effects {
        match &scoped.effect {
            StructuralEffect::AddCell { cell, at, text } => {
                docs.insert(*at, *cell, text.clone())?;
            }
            StructuralEffect::RemoveCell { cell } => {
                docs.remove(*cell)?;
            }
        }
    }
    Ok(())
}

/// One undo group.
///
/// `changes` holds the inverse of the forward edit, addressed in the
/// documents as they stand while this event is on top of its branch.
/// `mapped` accumulates the descriptions of history-excluded edits that
/// must be folded into the events *below* once this one is popped.
#[derive(Clone, Debug)]
pub(crate) struct HistEvent {
    pub(crate) changes: Option<CompositeChanges>,
    pub(crate) effects: Vec<ScopedEffect>,
    pub(crate) mapped: Option<CompositeDesc>,
    pub(crate) start_selection: Option<Selection>,
    pub(crate) selections_after: Vec<Selection>,
}

impl HistEvent {
    fn selection(selections: Vec<Selection>) -> HistEvent {
        HistEvent {
            changes: None,
            effects: Vec::new(),
            mapped: None,
            start_selection: None,
            selections_after: selections,
        }
    }

    pub(crate) fn from_changes(
        changes: Option<CompositeChanges>,
        mapped: Option<CompositeDesc>,
    ) -> HistEvent {
        HistEvent {
            changes,
            effects: Vec::new(),
            mapped,
            start_selection: None,
            selections_after: Vec::new(),
        }
    }
}

/// Which branch an operation pops from.
#[derive(Clone, Copy, Debug)]
enum Side {
    Undo,
    Redo,
}

/// Undo/redo history over a composite document.
pub struct History {
    pub(crate) done: Vec<HistEvent>,
    pub(crate) undone: Vec<HistEvent>,
    config: HistoryConfig,
    inverters: Vec<EffectInverter>,
    /// Timestamp of the last grouped edit; `None` after an isolate
    /// barrier, an undo or a redo, so the next edit starts a new group.
    prev_time: Option<u64>,
}

impl History {
    pub fn new(config: HistoryConfig, inverters: Vec<EffectInverter>) -> History {
        History {
            done: Vec::new(),
            undone: Vec::new(),
            config,
            inverters,
            prev_time: None,
        }
    }

    /// A history with the bundled structural-effect inverter registered.
    pub fn with_structural_inverter(config: HistoryConfig) -> History {
        History::new(
            config,
            vec![std::sync::Arc::new(crate::effect::invert_structural)],
        )
    }

    pub(crate) fn restore_from(
        config: HistoryConfig,
        inverters: Vec<EffectInverter>,
        done: Vec<HistEvent>,
        undone: Vec<HistEvent>,
    ) -> History {
        History {
            done,
            undone,
            config,
            inverters,
            prev_time: None,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    /// Events on the undo branch, selection-only events included.
    pub fn undo_depth(&self) -> usize {
        self.done.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.undone.len()
    }

    /// Records a transaction the caller has just applied. `docs_before`
    /// are the documents as they stood *before* the transaction, which
    /// supply the replaced text for the stored inverse.
    pub fn record(&mut self, tx: &Transaction, docs_before: &DocSet) -> Result<()> {
        if tx.isolate.resets_before() {
            self.prev_time = None;
        }

        if !tx.add_to_history {
            if !tx.changes.is_empty() {
                let desc = tx.changes.desc();
                fold_mapping(&mut self.done, &desc);
                fold_mapping(&mut self.undone, &desc);
                tracing::debug!("excluded edit folded into stored events");
            }
            return Ok(());
        }

        let inverse = tx.changes.invert(docs_before)?;
        let mut effects = Vec::new();
        for inverter in &self.inverters {
            effects.extend(inverter(tx, docs_before));
        }

        if inverse.is_empty() && effects.is_empty() {
            if let Some(selection) = &tx.selection_after {
                self.record_selection(selection.clone(), tx.selection_before.clone());
            }
            return Ok(());
        }

        if !self.try_coalesce(tx, &inverse, &effects) {
            self.done.push(HistEvent {
                changes: Some(inverse),
                effects,
                mapped: None,
                start_selection: tx.selection_before.clone(),
                selections_after: Vec::new(),
            });
        }

        // Any new edit discards redo history.
        self.undone.clear();
        self.trim();
        self.prev_time = if tx.isolate.resets_after() {
            None
        } else {
            Some(tx.time)
        };
        tracing::debug!(depth = self.done.len(), "edit recorded");
        Ok(())
    }

    /// Merges the new inverse into the top `done` event when the
    /// transaction continues the current undo group. Composition markers
    /// always join; typing and deletion join only when recent, confined
    /// to the one cell the top event touched, and adjacent to it.
    fn try_coalesce(
        &mut self,
        tx: &Transaction,
        inverse: &CompositeChanges,
        effects: &[ScopedEffect],
    ) -> bool {
        let composing = tx.user_event == UserEvent::Composing;
        if !composing {
            if !tx.user_event.joinable() {
                return false;
            }
            let Some(prev) = self.prev_time else {
                return false;
            };
            if tx.time.saturating_sub(prev) >= self.config.new_group_delay_ms {
                return false;
            }
        }
        let Some(top) = self.done.last_mut() else {
            return false;
        };
        if !top.selections_after.is_empty() {
            return false;
        }
        let Some(stored) = &top.changes else {
            return false;
        };
        if !composing {
            let Some(cell) = inverse.single_doc() else {
                return false;
            };
            let (Some(prev_set), Some(new_set)) = (stored.get(cell), inverse.get(cell)) else {
                return false;
            };
            if !prev_set.is_adjacent(new_set) {
                return false;
            }
        }
        // Undoing the merged event applies the newer inverse first.
        let Ok(merged) = inverse.compose(stored) else {
            return false;
        };
        top.changes = Some(merged);
        let mut combined = effects.to_vec();
        combined.append(&mut top.effects);
        top.effects = combined;
        true
    }

    /// Appends a cursor move to the current group, or opens a dedicated
    /// selection event on an empty branch.
    fn record_selection(&mut self, selection: Selection, before: Option<Selection>) {
        match self.done.last_mut() {
            Some(top) => {
                if top.selections_after.last() == Some(&selection) {
                    return;
                }
                if top.selections_after.len() >= MAX_SELECTIONS_PER_EVENT {
                    return;
                }
                top.selections_after.push(selection);
            }
            None => {
                let mut event = HistEvent::selection(vec![selection]);
                event.start_selection = before;
                self.done.push(event);
            }
        }
    }

    /// Undoes the top `done` event. With `selection_only`, pops just the
    /// most recent stored selection instead of any document change.
    /// `docs` are the current documents; `current_selection` seeds the
    /// mirrored redo event.
    pub fn undo(
        &mut self,
        docs: &DocSet,
        current_selection: Option<Selection>,
        selection_only: bool,
    ) -> Result<Option<HistoryTransaction>> {
        self.pop(Side::Undo, docs, current_selection, selection_only)
    }

    /// The mirror of [`History::undo`] against the `undone` branch.
    pub fn redo(
        &mut self,
        docs: &DocSet,
        current_selection: Option<Selection>,
        selection_only: bool,
    ) -> Result<Option<HistoryTransaction>> {
        self.pop(Side::Redo, docs, current_selection, selection_only)
    }

    fn pop(
        &mut self,
        side: Side,
        docs: &DocSet,
        current_selection: Option<Selection>,
        selection_only: bool,
    ) -> Result<Option<HistoryTransaction>> {
        if selection_only {
            return Ok(self.pop_selection(side, current_selection));
        }

        // Derive everything fallible first, so a caller-bug error leaves
        // both branches untouched.
        let (mirror_changes, changes, effects, restore) = {
            let from = match side {
                Side::Undo => &self.done,
                Side::Redo => &self.undone,
            };
            let Some(top) = from.last() else {
                return Ok(None);
            };
            if top.changes.is_none() && top.effects.is_empty() {
                // A selection event whose entries were exhausted: nothing
                // left to undo at this node.
                return Ok(None);
            }
            let changes = top.changes.clone().unwrap_or_default();
            (
                changes.invert(docs)?,
                changes,
                top.effects.clone(),
                top.start_selection.clone(),
            )
        };

        // Re-derive the mirrored effects through the same inverters, so
        // undoing an addition records the removal's inverse and so on.
        let mirror_tx = Transaction {
            changes: changes.clone(),
            effects: effects.clone(),
            ..Transaction::default()
        };
        let mut mirror_effects = Vec::new();
        for inverter in &self.inverters {
            mirror_effects.extend(inverter(&mirror_tx, docs));
        }

        let (from, to) = match side {
            Side::Undo => (&mut self.done, &mut self.undone),
            Side::Redo => (&mut self.undone, &mut self.done),
        };
        let Some(event) = from.pop() else {
            return Ok(None);
        };
        if let Some(mapped) = &event.mapped {
            fold_mapping(from, mapped);
        }
        to.push(HistEvent {
            changes: Some(mirror_changes),
            effects: mirror_effects,
            mapped: None,
            start_selection: current_selection,
            selections_after: Vec::new(),
        });
        self.prev_time = None;
        tracing::debug!(?side, "event popped");
        Ok(Some(HistoryTransaction {
            changes,
            effects,
            selection: restore,
        }))
    }

    fn pop_selection(
        &mut self,
        side: Side,
        current_selection: Option<Selection>,
    ) -> Option<HistoryTransaction> {
        let (from, to) = match side {
            Side::Undo => (&mut self.done, &mut self.undone),
            Side::Redo => (&mut self.undone, &mut self.done),
        };
        let selection = from.last_mut()?.selections_after.pop()?;
        if let Some(current) = current_selection {
            to.push(HistEvent::selection(vec![current]));
        }
        self.prev_time = None;
        Some(HistoryTransaction {
            changes: CompositeChanges::empty(),
            effects: Vec::new(),
            selection: Some(selection),
        })
    }

    fn trim(&mut self) {
        if self.done.len() > self.config.min_depth + BRANCH_SLACK {
            let excess = self.done.len() - self.config.min_depth;
            self.done.drain(..excess);
        }
    }
}

/// Folds the description of an intervening edit into a branch, from the
/// top down. The top event's stored inverse is re-addressed eagerly; the
/// residual description, re-expressed in the coordinates *below* that
/// event, accumulates in its `mapped` field for the day it is popped.
/// Events whose changes are entirely swallowed dissolve, their trailing
/// selections retained by the next survivor.
fn fold_mapping(branch: &mut Vec<HistEvent>, mapping: &CompositeDesc) {
    let mut mapping = mapping.clone();
    let mut carried: Vec<Selection> = Vec::new();
    while let Some(mut event) = branch.pop() {
        let mut selections: Vec<Selection> = event
            .selections_after
            .iter()
            .map(|sel| mapping.map_selection(sel))
            .collect();
        selections.append(&mut carried);

        let Some(changes) = event.changes.take() else {
            carried = selections;
            continue;
        };

        let remapped = changes.map(&mapping);
        // The same edit, re-addressed in the document this event's
        // inverse restores; that is the space the events below live in.
        let below = mapping.map(&changes.desc());
        let accumulated = match event.mapped.take() {
            Some(prior) => prior.compose(&below),
            None => below.clone(),
        };

        if remapped.is_empty() && event.effects.is_empty() {
            carried = selections;
            mapping = accumulated;
            continue;
        }

        event.changes = Some(remapped);
        event.mapped = Some(accumulated);
        event.start_selection = event
            .start_selection
            .map(|sel| below.map_selection(&sel));
        event.selections_after = selections;
        branch.push(event);
        return;
    }
    if !carried.is_empty() {
        branch.push(HistEvent::selection(carried));
    }
}

// =========================================================================
// Tests
// =========================================================================
