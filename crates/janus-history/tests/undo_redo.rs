//! End-to-end exercises of the history engine: grouped undo across
//! cells, folding of history-excluded edits, structural effects and
//! snapshot persistence.

use janus_core::CellId;
use janus_history::{
    ChangeSet, CompositeChanges, DocSet, History, HistoryConfig, ScopedEffect, Selection,
    StructuralEffect, Transaction, UserEvent,
};

fn notebook() -> DocSet {
    DocSet::from_docs(vec![
        (CellId(0), String::new()),
        (CellId(1), String::new()),
    ])
    .expect("docs")
}

fn insert(cell: usize, at: usize, text: &str) -> CompositeChanges {
    CompositeChanges::single(
        CellId(cell),
        ChangeSet::single(at, at, text).expect("change"),
    )
}

fn apply_and_record(
    history: &mut History,
    docs: &mut DocSet,
    tx: Transaction,
) {
    history.record(&tx, docs).expect("record");
    tx.apply(docs).expect("apply");
}

#[test]
fn test_undo_redo_round_trip_across_cells() {
    let mut history = History::new(HistoryConfig::default(), Vec::new());
    let mut docs = notebook();

    apply_and_record(&mut history, &mut docs, Transaction::edit(insert(0, 0, "a = 1")));
    apply_and_record(
        &mut history,
        &mut docs,
        Transaction::edit(insert(1, 0, "b = a + 1")).at(10_000),
    );
    assert_eq!(docs.get(CellId(1)), Some("b = a + 1"));

    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(1)), Some(""));
    assert_eq!(docs.get(CellId(0)), Some("a = 1"));

    let redo = history.redo(&docs, None, false).expect("redo").expect("event");
    redo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(1)), Some("b = a + 1"));
}

#[test]
fn test_coalesced_typing_undoes_as_one_word() {
    let mut history = History::new(HistoryConfig::default(), Vec::new());
    let mut docs = notebook();

    for (i, ch) in "hello".chars().enumerate() {
        let tx = Transaction::edit(insert(0, i, &ch.to_string()))
            .by(UserEvent::Typing)
            .at(i as u64 * 50);
        apply_and_record(&mut history, &mut docs, tx);
    }
    assert_eq!(docs.get(CellId(0)), Some("hello"));
    assert_eq!(history.undo_depth(), 1);

    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(0)), Some(""));
}

#[test]
fn test_excluded_edit_survives_undo_of_older_events() {
    let mut history = History::new(HistoryConfig::default(), Vec::new());
    let mut docs = notebook();

    apply_and_record(&mut history, &mut docs, Transaction::edit(insert(0, 0, "hello")));
    apply_and_record(
        &mut history,
        &mut docs,
        Transaction::edit(insert(0, 5, " world")).at(10_000),
    );

    // A prompt prefix arrives from outside the undo stream.
    let prefix = Transaction::edit(insert(0, 0, ">> ")).excluded();
    apply_and_record(&mut history, &mut docs, prefix);
    assert_eq!(docs.get(CellId(0)), Some(">> hello world"));
    assert_eq!(history.undo_depth(), 2);

    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(0)), Some(">> hello"));

    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(0)), Some(">> "));

    // Redo walks forward again with the prefix still in place.
    let redo = history.redo(&docs, None, false).expect("redo").expect("event");
    redo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(0)), Some(">> hello"));
    let redo = history.redo(&docs, None, false).expect("redo").expect("event");
    redo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(0)), Some(">> hello world"));
}

#[test]
fn test_excluded_edit_folds_into_redo_branch_too() {
    let mut history = History::new(HistoryConfig::default(), Vec::new());
    let mut docs = notebook();

    apply_and_record(&mut history, &mut docs, Transaction::edit(insert(0, 0, "hello")));
    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");

    let prefix = Transaction::edit(insert(0, 0, ">> ")).excluded();
    apply_and_record(&mut history, &mut docs, prefix);
    assert_eq!(docs.get(CellId(0)), Some(">> "));

    let redo = history.redo(&docs, None, false).expect("redo").expect("event");
    redo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(0)), Some(">> hello"));
}

#[test]
fn test_cell_addition_undoes_and_redoes() {
    let mut history = History::with_structural_inverter(HistoryConfig::default());
    let mut docs = notebook();

    let add = Transaction::edit(CompositeChanges::empty()).with_effects(vec![
        ScopedEffect::structural(StructuralEffect::AddCell {
            cell: CellId(2),
            at: 1,
            text: "c = 3".to_string(),
        }),
    ]);
    apply_and_record(&mut history, &mut docs, add);
    assert_eq!(docs.position(CellId(2)), Some(1));

    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(2)), None);
    assert_eq!(docs.len(), 2);

    let redo = history.redo(&docs, None, false).expect("redo").expect("event");
    redo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(2)), Some("c = 3"));
    assert_eq!(docs.position(CellId(2)), Some(1));
}

#[test]
fn test_cell_removal_restores_text_and_position() {
    let mut history = History::with_structural_inverter(HistoryConfig::default());
    let mut docs = DocSet::from_docs(vec![
        (CellId(0), "a = 1".to_string()),
        (CellId(1), "b = a".to_string()),
        (CellId(2), "c = b".to_string()),
    ])
    .expect("docs");

    let remove = Transaction::edit(CompositeChanges::empty()).with_effects(vec![
        ScopedEffect::structural(StructuralEffect::RemoveCell { cell: CellId(1) }),
    ]);
    apply_and_record(&mut history, &mut docs, remove);
    assert_eq!(docs.len(), 2);

    let undo = history.undo(&docs, None, false).expect("undo").expect("event");
    undo.apply(&mut docs).expect("apply");
    assert_eq!(docs.get(CellId(1)), Some("b = a"));
    assert_eq!(docs.position(CellId(1)), Some(1));
}

#[test]
fn test_undo_restores_the_starting_selection() {
    let mut history = History::new(HistoryConfig::default(), Vec::new());
    let mut docs = notebook();

    let tx = Transaction::edit(insert(0, 0, "abc"))
        .before(Selection::caret(CellId(0), 0))
        .after(Selection::caret(CellId(0), 3));
    apply_and_record(&mut history, &mut docs, tx);

    let undo = history
        .undo(&docs, Some(Selection::caret(CellId(0), 3)), false)
        .expect("undo")
        .expect("event");
    assert_eq!(undo.selection, Some(Selection::caret(CellId(0), 0)));
    undo.apply(&mut docs).expect("apply");

    // The mirrored redo event carries the selection we undid from.
    let redo = history.redo(&docs, None, false).expect("redo").expect("event");
    assert_eq!(redo.selection, Some(Selection::caret(CellId(0), 3)));
}

#[test]
fn test_history_survives_snapshot_and_restore() {
    let mut history = History::new(HistoryConfig::default(), Vec::new());
    let mut docs = notebook();

    apply_and_record(&mut history, &mut docs, Transaction::edit(insert(0, 0, "hello")));
    apply_and_record(
        &mut history,
        &mut docs,
        Transaction::edit(insert(0, 5, " world")).at(10_000),
    );
    let prefix = Transaction::edit(insert(0, 0, ">> ")).excluded();
    apply_and_record(&mut history, &mut docs, prefix);

    let json = serde_json::to_string(&history.snapshot()).expect("serialize");
    let snapshot = serde_json::from_str(&json).expect("parse");
    let mut restored = History::restore(snapshot, HistoryConfig::default(), Vec::new());
    assert_eq!(restored.undo_depth(), 2);

    for expected in [">> hello", ">> "] {
        let undo = restored.undo(&docs, None, false).expect("undo").expect("event");
        undo.apply(&mut docs).expect("apply");
        assert_eq!(docs.get(CellId(0)), Some(expected));
    }
}
