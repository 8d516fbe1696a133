//! Reconcile scanner excerpts with model-extracted values.

use crate::signals::{SignalKey, SignalMap};

/// Fill blank heuristic slots from the model extraction.
///
/// A non-blank heuristic value always wins; the model value is trimmed and
/// only used when the heuristic slot is absent or whitespace.
pub fn merge(heuristic: SignalMap, llm: &SignalMap) -> SignalMap {
    SignalKey::ALL.into_iter().fold(heuristic, |merged, key| {
        if merged.value(key).is_some() {
            return merged;
        }
        match llm.value(key) {
            Some(value) => merged.with(key, value.trim()),
            None => merged,
        }
    })
}
