//! The shared state map threaded through a pipeline.
//!
//! Steps read the whole [`State`] and return a partial update that the
//! executor shallow-merges back in. The executor never interprets values;
//! only individual step implementations know their domain fields.

use indexmap::IndexMap;
use serde_json::Value;

/// Insertion-ordered map of string keys to arbitrary JSON values.
pub type State = IndexMap<String, Value>;

/// Shallow-merges `update` into `target`.
///
/// Keys present in `update` overwrite those in `target`; keys `update` does
/// not mention are left untouched. New keys are appended in `update` order.
pub fn merge_state(target: &mut State, update: State) {
    for (key, value) in update {
        target.insert(key, value);
    }
}

/// Deep-copies `state` for a trace snapshot.
///
/// With `max_string_bytes == 0` the copy is exact. Otherwise every string
/// value (at any depth) longer than the cap is cut on a char boundary and
/// suffixed with a marker naming how many bytes were dropped.
pub fn snapshot_state(state: &State, max_string_bytes: usize) -> State {
    if max_string_bytes == 0 {
        return state.clone();
    }
    state
        .iter()
        .map(|(key, value)| (key.clone(), cap_value(value, max_string_bytes)))
        .collect()
}

fn cap_value(value: &Value, cap: usize) -> Value {
    match value {
        Value::String(s) if s.len() > cap => {
            let mut end = cap;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            Value::String(format!(
                "{}…[truncated {} bytes]",
                &s[..end],
                s.len() - end
            ))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| cap_value(v, cap)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), cap_value(v, cap)))
                .collect(),
        ),
        other => other.clone(),
    }
}
