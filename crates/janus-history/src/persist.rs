//! Serializable history snapshots.
//!
//! A snapshot captures the stored inverses and accumulated mappings of
//! both branches, enough to keep undo working across a save/load cycle.
//! Selection trails and structural effects are runtime-only and not
//! persisted; events that carried nothing else are dropped entirely.

use serde::{Deserialize, Serialize};

use crate::composite::{CompositeChanges, CompositeDesc};
use crate::effect::EffectInverter;
use crate::history::{HistEvent, History, HistoryConfig};

/// One persisted event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<CompositeChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped: Option<CompositeDesc>,
}

/// Both branches, oldest event first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub done: Vec<EventSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub undone: Vec<EventSnapshot>,
}

fn snapshot_branch(branch: &[HistEvent]) -> Vec<EventSnapshot> {
    branch
        .iter()
        .filter(|event| event.changes.is_some())
        .map(|event| EventSnapshot {
            changes: event.changes.clone(),
            mapped: event.mapped.clone(),
        })
        .collect()
}

fn restore_branch(branch: Vec<EventSnapshot>) -> Vec<HistEvent> {
    branch
        .into_iter()
        .map(|event| HistEvent::from_changes(event.changes, event.mapped))
        .collect()
}

impl History {
    /// The persistable view of this history. Selection-only events do not
    /// survive the round trip.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            done: snapshot_branch(&self.done),
            undone: snapshot_branch(&self.undone),
        }
    }

    /// Rebuilds a history from a snapshot. The next recorded edit starts
    /// a fresh undo group.
    pub fn restore(
        snapshot: HistorySnapshot,
        config: HistoryConfig,
        inverters: Vec<EffectInverter>,
    ) -> History {
        History::restore_from(
            config,
            inverters,
            restore_branch(snapshot.done),
            restore_branch(snapshot.undone),
        )
    }
}
