//! Mutation strategies for the shared `paths` sequence.
//!
//! A deployment either replaces `paths` wholesale or applies text patches in
//! the diff-match-patch text format against the canonical serialization of
//! `paths` (compact JSON, object keys sorted). Both strategies record the
//! pre-mutation value in the session history.

use std::str::FromStr;

use thiserror::Error;

use crate::session_state::SessionState;
use crate::types::PathRecord;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("malformed patch at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("{} hunk(s) did not match the current paths", .unapplied_hunks.len())]
    Conflict { unapplied_hunks: Vec<usize> },

    #[error("patched paths are not a JSON array: {0}")]
    InvalidResult(serde_json::Error),

    #[error("patched paths are not in canonical form")]
    NotCanonical,

    #[error("cannot serialize paths: {0}")]
    Canonicalize(serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    start1: usize,
    length1: usize,
    start2: usize,
    length2: usize,
    diffs: Vec<(Operation, String)>,
}

impl Hunk {
    /// Text the hunk expects to find: context plus deletions.
    fn source_text(&self) -> String {
        self.collect_text(Operation::Delete)
    }

    /// Text the hunk leaves behind: context plus insertions.
    fn target_text(&self) -> String {
        self.collect_text(Operation::Insert)
    }

    fn collect_text(&self, side: Operation) -> String {
        self.diffs
            .iter()
            .filter(|(op, _)| *op == Operation::Equal || *op == side)
            .map(|(_, text)| text.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    hunks: Vec<Hunk>,
}

impl Patch {
    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    /// Applies every hunk in order. Fails without partial output when any
    /// hunk's context cannot be found.
    pub fn apply(&self, text: &str) -> Result<String, PatchError> {
        let mut chars: Vec<char> = text.chars().collect();
        let mut unapplied_hunks = Vec::new();
        // drift between where hunks say they apply and where they actually did
        let mut delta: isize = 0;

        for (index, hunk) in self.hunks.iter().enumerate() {
            let source: Vec<char> = hunk.source_text().chars().collect();
            let target: Vec<char> = hunk.target_text().chars().collect();
            let expected = shift(hunk.start2, delta);

            match locate(&chars, &source, expected) {
                Some(start) => {
                    delta += start as isize - expected as isize;
                    let tail = chars.split_off(start + source.len());
                    chars.truncate(start);
                    chars.extend(target);
                    chars.extend(tail);
                }
                None => {
                    log::debug!("hunk {} has no matching context near {}", index, expected);
                    delta -= hunk.length2 as isize - hunk.length1 as isize;
                    unapplied_hunks.push(index);
                }
            }
        }

        if unapplied_hunks.is_empty() {
            Ok(chars.into_iter().collect())
        } else {
            Err(PatchError::Conflict { unapplied_hunks })
        }
    }
}

impl FromStr for Patch {
    type Err = PatchError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut hunks = Vec::new();
        let mut lines = text.split('\n').enumerate().peekable();

        while let Some((index, line)) = lines.next() {
            if line.is_empty() {
                continue;
            }
            let (start1, length1, start2, length2) =
                parse_header(line).ok_or_else(|| malformed(index, "expected hunk header"))?;

            let mut diffs = Vec::new();
            while let Some(&(index, line)) = lines.peek() {
                if line.starts_with("@@") {
                    break;
                }
                lines.next();

                let mut chars = line.chars();
                let op = match chars.next() {
                    Some(' ') => Operation::Equal,
                    Some('-') => Operation::Delete,
                    Some('+') => Operation::Insert,
                    None => continue,
                    Some(sign) => {
                        return Err(malformed(index, format!("unexpected prefix '{}'", sign)))
                    }
                };
                let body = urlencoding::decode(chars.as_str())
                    .map_err(|err| malformed(index, err.to_string()))?;
                diffs.push((op, body.into_owned()));
            }

            hunks.push(Hunk {
                start1,
                length1,
                start2,
                length2,
                diffs,
            });
        }

        Ok(Patch { hunks })
    }
}

fn malformed(index: usize, reason: impl Into<String>) -> PatchError {
    PatchError::Malformed {
        line: index + 1,
        reason: reason.into(),
    }
}

/// `@@ -start1,length1 +start2,length2 @@`, 1-based unless the length is 0.
fn parse_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let inner = line.strip_prefix("@@ -")?.strip_suffix(" @@")?;
    let (source, target) = inner.split_once(" +")?;
    let (start1, length1) = parse_range(source)?;
    let (start2, length2) = parse_range(target)?;
    Some((start1, length1, start2, length2))
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        None => Some((range.parse::<usize>().ok()?.checked_sub(1)?, 1)),
        Some((start, "0")) => Some((start.parse().ok()?, 0)),
        Some((start, length)) => Some((
            start.parse::<usize>().ok()?.checked_sub(1)?,
            length.parse().ok()?,
        )),
    }
}

fn shift(position: usize, delta: isize) -> usize {
    if delta < 0 {
        position.saturating_sub(delta.unsigned_abs())
    } else {
        position.saturating_add(delta as usize)
    }
}

/// How far from its expected position a hunk's context may still be found.
const MATCH_DISTANCE: usize = 1000;

/// Exact match at `expected` first, then the nearest exact match within
/// `MATCH_DISTANCE` on either side.
fn locate(text: &[char], needle: &[char], expected: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(expected.min(text.len()));
    }
    if needle.len() > text.len() {
        return None;
    }
    let at_expected = expected
        .checked_add(needle.len())
        .and_then(|end| text.get(expected..end));
    if at_expected == Some(needle) {
        return Some(expected);
    }

    let lo = expected.saturating_sub(MATCH_DISTANCE).min(text.len());
    let hi = expected
        .saturating_add(MATCH_DISTANCE)
        .saturating_add(needle.len())
        .min(text.len());
    let window: String = text[lo..hi].iter().collect();
    let needle: String = needle.iter().collect();
    let needle_chars = needle.chars().count();
    let pivot = expected.saturating_sub(lo).min(hi - lo);

    // matches ending before `before_end` start strictly before the pivot
    let before = pivot.checked_sub(1).and_then(|last_start| {
        let before_end = byte_offset(&window, last_start + needle_chars);
        window[..before_end].rfind(&needle)
    });
    let after = {
        let from = byte_offset(&window, pivot);
        window[from..].find(&needle).map(|found| from + found)
    };

    [before, after]
        .into_iter()
        .flatten()
        .map(|byte| lo + window[..byte].chars().count())
        .min_by_key(|start| start.abs_diff(expected))
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(byte, _)| byte)
}

/// The text form patches are computed against.
pub fn canonical_form(paths: &[PathRecord]) -> Result<String, PatchError> {
    serde_json::to_string(paths).map_err(PatchError::Canonicalize)
}

pub fn apply_full_replace(state: &mut SessionState, new_paths: Vec<PathRecord>) {
    state.commit_paths(new_paths);
}

/// Leaves `state` untouched unless every hunk applies and the result is
/// a list of paths already in canonical form.
pub fn apply_text_patch(state: &mut SessionState, patch_text: &str) -> Result<(), PatchError> {
    let patch: Patch = patch_text.parse()?;
    let canonical = canonical_form(&state.paths)?;
    let patched = patch.apply(&canonical)?;
    let new_paths: Vec<PathRecord> =
        serde_json::from_str(&patched).map_err(PatchError::InvalidResult)?;
    // peers keep the patched text verbatim
    if canonical_form(&new_paths)? != patched {
        return Err(PatchError::NotCanonical);
    }
    state.commit_paths(new_paths);
    Ok(())
}

pub fn clear_paths(state: &mut SessionState) {
    state.commit_paths(Vec::new());
}
