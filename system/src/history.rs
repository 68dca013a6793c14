use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PathRecord, PathSnapshot, DEFAULT_HISTORY_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("no snapshot to restore")]
    EmptyHistory,
}

/// Bounded undo/redo stacks over the `paths` sequence.
///
/// Both stacks keep the most recent snapshot at the back. When a stack grows
/// past `limit` the oldest snapshot is evicted. A `limit` of 0 means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    undo_stack: VecDeque<PathSnapshot>,
    redo_stack: VecDeque<PathSnapshot>,
    #[serde(skip, default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            limit,
        }
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Records the state before a direct edit. Breaks the redo chain.
    pub fn push(&mut self, snapshot: PathSnapshot) {
        push_bounded(&mut self.undo_stack, snapshot, self.limit);
        self.redo_stack.clear();
    }

    /// Swaps `current` with the latest undo snapshot, saving `current` for redo.
    pub fn undo(&mut self, current: &mut Vec<PathRecord>) -> Result<(), HistoryError> {
        let restored = self.undo_stack.pop_back().ok_or(HistoryError::EmptyHistory)?;
        let replaced = std::mem::replace(current, restored);
        push_bounded(&mut self.redo_stack, replaced, self.limit);
        Ok(())
    }

    pub fn redo(&mut self, current: &mut Vec<PathRecord>) -> Result<(), HistoryError> {
        let restored = self.redo_stack.pop_back().ok_or(HistoryError::EmptyHistory)?;
        let replaced = std::mem::replace(current, restored);
        push_bounded(&mut self.undo_stack, replaced, self.limit);
        Ok(())
    }
}

fn push_bounded(stack: &mut VecDeque<PathSnapshot>, snapshot: PathSnapshot, limit: usize) {
    stack.push_back(snapshot);
    if limit > 0 {
        while stack.len() > limit {
            stack.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(n: i64) -> PathSnapshot {
        vec![json!({ "id": n })]
    }

    #[test]
    fn it_evicts_oldest_snapshot_on_overflow() {
        let mut history = History::with_limit(3);
        for n in 0..5 {
            history.push(snapshot(n));
        }
        assert_eq!(history.undo_len(), 3);

        let mut current = Vec::new();
        history.undo(&mut current).expect("");
        assert_eq!(current, snapshot(4));
        history.undo(&mut current).expect("");
        history.undo(&mut current).expect("");
        assert_eq!(current, snapshot(2));
        assert_eq!(history.undo(&mut current), Err(HistoryError::EmptyHistory));
    }

    #[test]
    fn it_keeps_everything_when_limit_is_zero() {
        let mut history = History::with_limit(0);
        for n in 0..250 {
            history.push(snapshot(n));
        }
        assert_eq!(history.undo_len(), 250);
    }

    #[test]
    fn undo_on_empty_history_leaves_paths_alone() {
        let mut history = History::default();
        let mut current = snapshot(7);
        assert_eq!(history.undo(&mut current), Err(HistoryError::EmptyHistory));
        assert_eq!(history.redo(&mut current), Err(HistoryError::EmptyHistory));
        assert_eq!(current, snapshot(7));
    }

    #[test]
    fn undo_and_redo_do_not_clear_each_other() {
        let mut history = History::default();
        history.push(snapshot(0));
        history.push(snapshot(1));
        let mut current = snapshot(2);

        history.undo(&mut current).expect("");
        history.undo(&mut current).expect("");
        assert_eq!(current, snapshot(0));
        assert_eq!(history.redo_len(), 2);

        history.redo(&mut current).expect("");
        assert_eq!(current, snapshot(1));
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 1);
    }

    #[test]
    fn push_clears_redo_chain() {
        let mut history = History::default();
        history.push(snapshot(0));
        let mut current = snapshot(1);
        history.undo(&mut current).expect("");
        assert_eq!(history.redo_len(), 1);

        history.push(current.clone());
        assert_eq!(history.redo_len(), 0);
        assert_eq!(history.redo(&mut current), Err(HistoryError::EmptyHistory));
    }

    #[test]
    fn redo_stack_is_bounded_too() {
        let mut history = History::with_limit(2);
        history.push(snapshot(0));
        history.push(snapshot(1));
        let mut current = snapshot(2);
        history.undo(&mut current).expect("");
        history.undo(&mut current).expect("");
        assert_eq!(history.redo_len(), 2);
        assert!(history.undo_len() <= 2);
    }
}
