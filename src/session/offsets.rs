//! Offset candidates for interactive trim selection, keyboard rendering, and
//! the callback payload codec.

use crate::delivery::Choice;
use crate::timecode;

/// Spacing between generated offsets.
pub const STEP_SECS: u64 = 30;

/// Upper bound on generated offsets per step (a custom-entry escape is always
/// appended on top).
pub const MAX_CANDIDATES: u64 = 5;

/// Evenly spaced start offsets from 0, clipped to the total duration.
pub fn start_candidates(duration_secs: u64) -> Vec<u64> {
    let count = MAX_CANDIDATES.min(duration_secs / STEP_SECS + 1);
    (0..count).map(|i| (i * STEP_SECS).min(duration_secs)).collect()
}

/// Evenly spaced end offsets after the chosen start, clipped to the total
/// duration.
pub fn end_candidates(duration_secs: u64, start_secs: u64) -> Vec<u64> {
    let remaining = duration_secs.saturating_sub(start_secs);
    let count = MAX_CANDIDATES.min(remaining / STEP_SECS + 1);
    (1..=count)
        .map(|i| (start_secs + i * STEP_SECS).min(duration_secs))
        .collect()
}

/// Tagged interactive-trim event, decoded exactly once at the callback
/// boundary instead of string-prefix matching in handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    SelectStart(u64),
    StartCustom,
    SelectEnd(u64),
    EndCustom,
    Confirm,
    Cancel,
}

impl CallbackAction {
    /// Encode as compact callback payload.
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::SelectStart(secs) => format!("cut:start:{}", secs),
            CallbackAction::StartCustom => "cut:start:custom".to_string(),
            CallbackAction::SelectEnd(secs) => format!("cut:end:{}", secs),
            CallbackAction::EndCustom => "cut:end:custom".to_string(),
            CallbackAction::Confirm => "cut:confirm".to_string(),
            CallbackAction::Cancel => "cut:cancel".to_string(),
        }
    }

    /// Decode a callback payload; foreign payloads decode to `None`.
    pub fn decode(data: &str) -> Option<Self> {
        match data {
            "cut:start:custom" => return Some(CallbackAction::StartCustom),
            "cut:end:custom" => return Some(CallbackAction::EndCustom),
            "cut:confirm" => return Some(CallbackAction::Confirm),
            "cut:cancel" => return Some(CallbackAction::Cancel),
            _ => {}
        }
        if let Some(rest) = data.strip_prefix("cut:start:") {
            return rest.parse().ok().map(CallbackAction::SelectStart);
        }
        if let Some(rest) = data.strip_prefix("cut:end:") {
            return rest.parse().ok().map(CallbackAction::SelectEnd);
        }
        None
    }
}

/// Keyboard for the start-selection step: candidate rows of two, plus the
/// custom-entry escape.
pub fn start_keyboard(duration_secs: u64) -> Vec<Vec<Choice>> {
    let buttons: Vec<Choice> = start_candidates(duration_secs)
        .into_iter()
        .map(|secs| {
            Choice::new(
                timecode::format(secs),
                CallbackAction::SelectStart(secs).encode(),
            )
        })
        .collect();

    let mut rows = pack_rows(buttons);
    rows.push(vec![Choice::new(
        "Custom",
        CallbackAction::StartCustom.encode(),
    )]);
    rows
}

/// Keyboard for the end-selection step: candidate rows of two, the
/// custom-entry escape, and Done/Cancel controls.
pub fn end_keyboard(duration_secs: u64, start_secs: u64) -> Vec<Vec<Choice>> {
    let buttons: Vec<Choice> = end_candidates(duration_secs, start_secs)
        .into_iter()
        .map(|secs| {
            Choice::new(
                timecode::format(secs),
                CallbackAction::SelectEnd(secs).encode(),
            )
        })
        .collect();

    let mut rows = pack_rows(buttons);
    rows.push(vec![Choice::new("Custom", CallbackAction::EndCustom.encode())]);
    rows.push(vec![
        Choice::new("Done", CallbackAction::Confirm.encode()),
        Choice::new("Cancel", CallbackAction::Cancel.encode()),
    ]);
    rows
}

fn pack_rows(buttons: Vec<Choice>) -> Vec<Vec<Choice>> {
    let mut rows = Vec::new();
    let mut iter = buttons.into_iter().peekable();
    while iter.peek().is_some() {
        rows.push(iter.by_ref().take(2).collect());
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_candidates_clip_to_duration() {
        assert_eq!(start_candidates(45), vec![0, 30]);
        assert_eq!(start_candidates(10), vec![0]);
        assert_eq!(start_candidates(300), vec![0, 30, 60, 90, 120]);
        for secs in start_candidates(45) {
            assert!(secs <= 45);
        }
    }

    #[test]
    fn test_end_candidates_start_one_step_after_start() {
        assert_eq!(end_candidates(45, 30), vec![45]);
        assert_eq!(end_candidates(200, 30), vec![60, 90, 120, 150, 180]);
        assert_eq!(end_candidates(70, 60), vec![70]);
    }

    #[test]
    fn test_keyboards_always_include_custom() {
        let start = start_keyboard(45);
        assert!(start
            .iter()
            .flatten()
            .any(|c| c.data == "cut:start:custom"));

        let end = end_keyboard(45, 0);
        assert!(end.iter().flatten().any(|c| c.data == "cut:end:custom"));
        assert!(end.iter().flatten().any(|c| c.data == "cut:confirm"));
        assert!(end.iter().flatten().any(|c| c.data == "cut:cancel"));
    }

    #[test]
    fn test_keyboard_rows_hold_at_most_two_candidates() {
        for row in start_keyboard(300) {
            assert!(row.len() <= 2);
        }
    }

    #[test]
    fn test_callback_roundtrip() {
        let actions = [
            CallbackAction::SelectStart(90),
            CallbackAction::StartCustom,
            CallbackAction::SelectEnd(120),
            CallbackAction::EndCustom,
            CallbackAction::Confirm,
            CallbackAction::Cancel,
        ];
        for action in actions {
            assert_eq!(CallbackAction::decode(&action.encode()), Some(action));
        }
    }

    #[test]
    fn test_callback_rejects_foreign_payloads() {
        assert_eq!(CallbackAction::decode("cut_start_00:30"), None);
        assert_eq!(CallbackAction::decode("cut:start:abc"), None);
        assert_eq!(CallbackAction::decode("merge:go"), None);
        assert_eq!(CallbackAction::decode(""), None);
    }
}
