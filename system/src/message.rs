use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session_state::SessionState;
use crate::types::{PathRecord, PathsProtocol, SessionCode};

/// Rejected inbound traffic. Reported to the sender only.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),

    #[error("update_paths must carry exactly one of 'paths' or 'path_patch'")]
    AmbiguousPathsUpdate,

    #[error("event targets session '{got}' but the connection joined '{expected}'")]
    ForeignSession {
        expected: SessionCode,
        got: SessionCode,
    },

    #[error("update_paths uses '{got}' but this server speaks '{expected}'")]
    ProtocolMismatch {
        expected: PathsProtocol,
        got: PathsProtocol,
    },
}

/// Events a client may send. On the wire: `{"event": <name>, "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UpdateBackground {
        session_code: SessionCode,
        background_image: String,
    },
    ClearBackground {
        session_code: SessionCode,
    },
    UpdatePaths(UpdatePaths),
    ClearPaths {
        session_code: SessionCode,
    },
    SetStudentLock {
        session_code: SessionCode,
        is_locked: bool,
    },
    SetQuizStatus {
        session_code: SessionCode,
        is_quiz: bool,
    },
    GetQuizStatus {
        session_code: SessionCode,
    },
    AddCode {
        session_code: SessionCode,
        code: String,
    },
    GetAllCodes {
        session_code: SessionCode,
    },
    UndoRequest {
        session_code: SessionCode,
    },
    RedoRequest {
        session_code: SessionCode,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        serde_json::from_str(text).map_err(MessageError::Malformed)
    }

    pub fn session_code(&self) -> &str {
        match self {
            Self::UpdatePaths(update) => &update.session_code,
            Self::UpdateBackground { session_code, .. }
            | Self::ClearBackground { session_code }
            | Self::ClearPaths { session_code }
            | Self::SetStudentLock { session_code, .. }
            | Self::SetQuizStatus { session_code, .. }
            | Self::GetQuizStatus { session_code }
            | Self::AddCode { session_code, .. }
            | Self::GetAllCodes { session_code }
            | Self::UndoRequest { session_code }
            | Self::RedoRequest { session_code } => session_code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateBackground { .. } => "update_background",
            Self::ClearBackground { .. } => "clear_background",
            Self::UpdatePaths(_) => "update_paths",
            Self::ClearPaths { .. } => "clear_paths",
            Self::SetStudentLock { .. } => "set_student_lock",
            Self::SetQuizStatus { .. } => "set_quiz_status",
            Self::GetQuizStatus { .. } => "get_quiz_status",
            Self::AddCode { .. } => "add_code",
            Self::GetAllCodes { .. } => "get_all_codes",
            Self::UndoRequest { .. } => "undo_request",
            Self::RedoRequest { .. } => "redo_request",
        }
    }
}

/// `update_paths` payload. Exactly one of `paths` or `path_patch` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUpdatePaths", into = "RawUpdatePaths")]
pub struct UpdatePaths {
    pub session_code: SessionCode,
    pub update: PathsUpdate,
}

#[derive(Serialize, Deserialize)]
struct RawUpdatePaths {
    session_code: SessionCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paths: Option<Vec<PathRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path_patch: Option<String>,
}

impl TryFrom<RawUpdatePaths> for UpdatePaths {
    type Error = MessageError;

    fn try_from(raw: RawUpdatePaths) -> Result<Self, Self::Error> {
        let update = match (raw.paths, raw.path_patch) {
            (Some(paths), None) => PathsUpdate::Replace { paths },
            (None, Some(path_patch)) => PathsUpdate::Patch { path_patch },
            _ => return Err(MessageError::AmbiguousPathsUpdate),
        };
        Ok(Self {
            session_code: raw.session_code,
            update,
        })
    }
}

impl From<UpdatePaths> for RawUpdatePaths {
    fn from(value: UpdatePaths) -> Self {
        let (paths, path_patch) = match value.update {
            PathsUpdate::Replace { paths } => (Some(paths), None),
            PathsUpdate::Patch { path_patch } => (None, Some(path_patch)),
        };
        Self {
            session_code: value.session_code,
            paths,
            path_patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathsUpdate {
    Replace { paths: Vec<PathRecord> },
    Patch { path_patch: String },
}

impl PathsUpdate {
    pub fn protocol(&self) -> PathsProtocol {
        match self {
            Self::Replace { .. } => PathsProtocol::FullReplace,
            Self::Patch { .. } => PathsProtocol::TextPatch,
        }
    }
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionData(SessionState),
    BackgroundUpdate { background_image: String },
    BackgroundCleared { background_image: String },
    PathsUpdate(PathsUpdate),
    PathsCleared { paths: Vec<PathRecord> },
    StudentLockStatus { is_student_locked: bool },
    StudentUnlocked { is_student_locked: bool },
    QuizStatusUpdated { is_quiz: bool },
    QuizStatus { is_quiz: bool },
    CodeAdded { new_code: String },
    AllCodes { codes: Vec<String> },
    Undo { paths: Vec<PathRecord> },
    Redo { paths: Vec<PathRecord> },

    // metadata, addressed to a single connection
    PatchConflict { unapplied_hunks: Vec<usize> },
    InvalidMessage { reason: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionData(_) => "session_data",
            Self::BackgroundUpdate { .. } => "background_update",
            Self::BackgroundCleared { .. } => "background_cleared",
            Self::PathsUpdate(_) => "paths_update",
            Self::PathsCleared { .. } => "paths_cleared",
            Self::StudentLockStatus { .. } => "student_lock_status",
            Self::StudentUnlocked { .. } => "student_unlocked",
            Self::QuizStatusUpdated { .. } => "quiz_status_updated",
            Self::QuizStatus { .. } => "quiz_status",
            Self::CodeAdded { .. } => "code_added",
            Self::AllCodes { .. } => "all_codes",
            Self::Undo { .. } => "undo",
            Self::Redo { .. } => "redo",
            Self::PatchConflict { .. } => "patch_conflict",
            Self::InvalidMessage { .. } => "invalid_message",
        }
    }
}
