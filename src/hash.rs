//! Canonical, stable hashing of observed states.
//!
//! The hash is used to detect stuttering transitions and to key out-of-band
//! artifacts such as screenshots. It is not security-critical; what matters
//! is that the same observation always hashes to the same string, regardless
//! of how maps happened to be ordered when the state was decoded.

use crate::protocol::State;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

// Type markers keep the canonical encoding unambiguous (e.g. the string "1"
// must not collide with the number 1, nor ["ab"] with ["a", "b"]).
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_LIST: u8 = 4;
const TAG_MAP: u8 = 5;

fn write_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn write_value(hasher: &mut Sha256, value: &Json) {
    match value {
        Json::Null => hasher.update([TAG_NULL]),
        Json::Bool(b) => {
            hasher.update([TAG_BOOL, *b as u8]);
        }
        Json::Number(n) => {
            hasher.update([TAG_NUMBER]);
            write_str(hasher, &n.to_string());
        }
        Json::String(s) => {
            hasher.update([TAG_STRING]);
            write_str(hasher, s);
        }
        Json::Array(items) => {
            hasher.update([TAG_LIST]);
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                write_value(hasher, item);
            }
        }
        Json::Object(map) => {
            hasher.update([TAG_MAP]);
            hasher.update((map.len() as u64).to_le_bytes());
            // sorted key order, so hashes do not depend on decode order
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                write_str(hasher, key);
                write_value(hasher, &map[key]);
            }
        }
    }
}

/// Hash a state into a stable hex string.
///
/// Selectors are visited in sorted order, elements in their observed order,
/// and object keys in sorted order at every depth, so the result is
/// invariant under map key reordering but sensitive to element order.
pub fn state_hash(state: &State) -> String {
    let mut hasher = Sha256::new();
    hasher.update((state.len() as u64).to_le_bytes());
    for (selector, elements) in state {
        write_str(&mut hasher, selector);
        hasher.update((elements.len() as u64).to_le_bytes());
        for element in elements {
            write_value(&mut hasher, &Json::Object(element.clone()));
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ElementState;
    use serde_json::json;

    fn state_of(v: Json) -> State {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn hash_is_invariant_under_key_reordering() {
        let a = state_of(json!({
            ".item": [{ "ref": "A", "text": "x", "css": { "color": "red", "display": "block" } }],
        }));
        let b = state_of(json!({
            ".item": [{ "css": { "display": "block", "color": "red" }, "text": "x", "ref": "A" }],
        }));
        assert_eq!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn hash_is_sensitive_to_values() {
        let a = state_of(json!({ ".item": [{ "ref": "A", "text": "x" }] }));
        let b = state_of(json!({ ".item": [{ "ref": "A", "text": "y" }] }));
        assert_ne!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn hash_is_sensitive_to_element_order() {
        let a = state_of(json!({ ".item": [{ "ref": "A" }, { "ref": "B" }] }));
        let b = state_of(json!({ ".item": [{ "ref": "B" }, { "ref": "A" }] }));
        assert_ne!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn strings_and_numbers_do_not_collide() {
        let a = state_of(json!({ "s": [{ "ref": "A", "n": 1 }] }));
        let b = state_of(json!({ "s": [{ "ref": "A", "n": "1" }] }));
        assert_ne!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn empty_state_hashes_consistently() {
        assert_eq!(state_hash(&State::new()), state_hash(&State::new()));
        let mut one = State::new();
        one.insert(".x".into(), Vec::<ElementState>::new());
        assert_ne!(state_hash(&State::new()), state_hash(&one));
    }
}
