use serde_json::json;
use system::{apply_full_replace, clear_paths, HistoryError, SessionState};

fn stroke(n: usize) -> serde_json::Value {
    json!({ "d": format!("M{},0 L{},10", n, n), "width": 2 })
}

#[test]
fn undo_then_redo_is_identity() {
    let mut state = SessionState::default();
    let before = vec![stroke(0)];
    let after = vec![stroke(0), stroke(1)];
    apply_full_replace(&mut state, before.clone());
    apply_full_replace(&mut state, after.clone());

    assert_eq!(state.undo().expect(""), before.as_slice());
    assert_eq!(state.redo().expect(""), after.as_slice());
    assert_eq!(state.paths, after);
}

#[test]
fn undo_walks_back_through_every_edit() {
    let mut state = SessionState::default();
    let mut seen = vec![Vec::new()];
    for n in 0..10 {
        let mut paths = state.paths.clone();
        paths.push(stroke(n));
        apply_full_replace(&mut state, paths.clone());
        seen.push(paths);
    }
    clear_paths(&mut state);

    for expected in seen.iter().rev() {
        assert_eq!(state.undo().expect(""), expected.as_slice());
    }
    assert_eq!(state.undo(), Err(HistoryError::EmptyHistory));
}

#[test]
fn history_never_exceeds_its_limit() {
    let mut state = SessionState::new(100);
    for n in 0..250 {
        apply_full_replace(&mut state, vec![stroke(n)]);
        assert!(state.history().undo_len() <= 100);
    }

    let mut undone = 0;
    while state.undo().is_ok() {
        undone += 1;
    }
    assert_eq!(undone, 100);
    // the oldest 150 pre-edit snapshots were evicted first
    assert_eq!(state.paths, vec![stroke(149)]);
}
