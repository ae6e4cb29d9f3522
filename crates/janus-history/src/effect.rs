//! Structural effects and their inverses.
//!
//! Text edits are covered by the change algebra; everything else a
//! transaction can do to a notebook travels as a [`StructuralEffect`]. The
//! union is closed on purpose: history can invert and replay every variant
//! without a registry of opaque payloads.

use std::sync::Arc;

use janus_core::CellId;
use serde::{Deserialize, Serialize};

use crate::composite::DocSet;
use crate::history::Transaction;

/// A notebook-level edit carried by a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralEffect {
    /// A cell appeared at position `at` with the given initial text.
    AddCell {
        cell: CellId,
        at: usize,
        text: String,
    },
    /// A cell went away, text and all.
    RemoveCell { cell: CellId },
}

/// An effect plus the cell whose coordinates it speaks in. The built-in
/// structural effects address the notebook itself and carry no scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedEffect {
    pub scope: Option<CellId>,
    pub effect: StructuralEffect,
}

impl ScopedEffect {
    pub fn structural(effect: StructuralEffect) -> ScopedEffect {
        ScopedEffect {
            scope: None,
            effect,
        }
    }
}

/// Translates a forward transaction's effects into the effects that undo
/// them. `docs` is the document set the transaction applied to, which
/// supplies any text the inverse needs.
pub type EffectInverter = Arc<dyn Fn(&Transaction, &DocSet) -> Vec<ScopedEffect> + Send + Sync>;

/// The bundled inverter for [`StructuralEffect`]: additions become
/// removals and removals become additions at the cell's old position with
/// its old text. Removal of a cell missing from `docs` has no usable
/// inverse and is skipped with a warning.
pub fn invert_structural(tx: &Transaction, docs: &DocSet) -> Vec<ScopedEffect> {
    let mut inverted = Vec::new();
    for scoped in tx.effects.iter().rev() {
        match &scoped.effect {
            StructuralEffect::AddCell { cell, .. } => {
                inverted.push(ScopedEffect::structural(StructuralEffect::RemoveCell {
                    cell: *cell,
                }));
            }
            StructuralEffect::RemoveCell { cell } => {
                let (Some(at), Some(text)) = (docs.position(*cell), docs.get(*cell)) else {
                    tracing::warn!(cell = %cell, "removal of unknown cell has no inverse");
                    continue;
                };
                inverted.push(ScopedEffect::structural(StructuralEffect::AddCell {
                    cell: *cell,
                    at,
                    text: text.to_string(),
                }));
            }
        }
    }
    inverted
}
