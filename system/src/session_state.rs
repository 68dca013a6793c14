use serde::{Deserialize, Serialize};

use crate::history::{History, HistoryError};
use crate::types::PathRecord;

/// Everything a whiteboard session shares between its members.
///
/// Serializes to the `session_data` payload handed to a joining member,
/// history stacks included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub background_image: String,
    pub paths: Vec<PathRecord>,
    #[serde(flatten)]
    pub(crate) history: History,
    pub is_student_locked: bool,
    pub is_quiz: bool,
    pub codes: Vec<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::with_history(History::default())
    }
}

impl SessionState {
    pub fn new(history_limit: usize) -> Self {
        Self::with_history(History::with_limit(history_limit))
    }

    fn with_history(history: History) -> Self {
        Self {
            background_image: String::new(),
            paths: Vec::new(),
            history,
            is_student_locked: false,
            is_quiz: false,
            codes: Vec::new(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Replaces `paths`, recording the previous value as an undo step.
    pub(crate) fn commit_paths(&mut self, new_paths: Vec<PathRecord>) {
        let previous = std::mem::replace(&mut self.paths, new_paths);
        self.history.push(previous);
    }

    pub fn undo(&mut self) -> Result<&[PathRecord], HistoryError> {
        self.history.undo(&mut self.paths)?;
        Ok(&self.paths)
    }

    pub fn redo(&mut self) -> Result<&[PathRecord], HistoryError> {
        self.history.redo(&mut self.paths)?;
        Ok(&self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_serializes_as_session_data_payload() {
        let mut state = SessionState::default();
        state.commit_paths(vec![json!("M0,0L1,1")]);

        let value = serde_json::to_value(&state).expect("");
        assert_eq!(
            value,
            json!({
                "background_image": "",
                "paths": ["M0,0L1,1"],
                "undo_stack": [[]],
                "redo_stack": [],
                "is_student_locked": false,
                "is_quiz": false,
                "codes": [],
            })
        );
    }

    #[test]
    fn it_restores_previous_paths_on_undo() {
        let mut state = SessionState::new(10);
        state.commit_paths(vec![json!(1)]);
        state.commit_paths(vec![json!(1), json!(2)]);

        assert_eq!(state.undo().expect(""), &[json!(1)]);
        assert_eq!(state.redo().expect(""), &[json!(1), json!(2)]);
        assert_eq!(state.redo(), Err(HistoryError::EmptyHistory));
    }
}
