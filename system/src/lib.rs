mod history;
mod message;
pub mod patch;
mod session_state;
mod types;

pub use history::*;
pub use message::*;
pub use patch::{apply_full_replace, apply_text_patch, clear_paths, PatchError};
pub use session_state::*;
pub use types::*;

pub extern crate serde;
pub extern crate serde_json;
