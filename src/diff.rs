//! Structural diffing between successive observed states.
//!
//! Elements are matched within each selector by their `ref`; matched
//! elements compare by deep structural equality over their full attribute
//! map (including `position`, so purely positional changes still surface as
//! modified).

use crate::protocol::{ElementState, Selector};
use crate::result::{ObservedState, Screenshot, Test, TestResult, Transition};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// The per-element classification between two successive states.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff<T> {
    /// Present only in the new state.
    Added(T),
    /// Present only in the old state.
    Removed(T),
    /// Present in both, with differing content.
    Modified {
        /// The element as it was.
        old: T,
        /// The element as it is.
        new: T,
    },
    /// Present in both, with equal content.
    Unmodified(T),
}

impl<T> Diff<T> {
    /// Apply `f` to every contained value.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Diff<U> {
        match self {
            Diff::Added(v) => Diff::Added(f(v)),
            Diff::Removed(v) => Diff::Removed(f(v)),
            Diff::Modified { old, new } => Diff::Modified {
                old: f(old),
                new: f(new),
            },
            Diff::Unmodified(v) => Diff::Unmodified(f(v)),
        }
    }

    /// The value on the new side of the diff (for `Removed`, the only value
    /// there is).
    pub fn new_value(&self) -> &T {
        match self {
            Diff::Added(v) | Diff::Removed(v) | Diff::Unmodified(v) => v,
            Diff::Modified { new, .. } => new,
        }
    }

    /// True for [`Diff::Unmodified`].
    pub fn is_unmodified(&self) -> bool {
        matches!(self, Diff::Unmodified(..))
    }
}

/// A state whose elements have been classified against the preceding state.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffedState {
    /// The canonical content hash of the underlying observation.
    pub hash: String,
    /// Per-selector element diffs: removed elements first (in old
    /// observation order), then the new elements in observation order.
    pub queries: BTreeMap<Selector, Vec<Diff<ElementState>>>,
    /// Screenshot of the underlying observation, if captured.
    pub screenshot: Option<Screenshot>,
}

/// A result whose states have all been diffed.
pub type DiffedResult = TestResult<DiffedState>;

fn element_ref(element: &ElementState) -> Option<&str> {
    element.get("ref").and_then(Json::as_str)
}

/// Diff `new` against `old`, element by element.
///
/// `None` for `old` means there is no preceding state; everything in `new`
/// is `Added`. The per-selector output order is removed-first then
/// new-order, which keeps reporters deterministic.
pub fn diff_states(old: Option<&ObservedState>, new: &ObservedState) -> DiffedState {
    let empty: Vec<ElementState> = Vec::new();
    let mut queries = BTreeMap::new();
    for (selector, new_elements) in &new.queries {
        let old_elements = old
            .and_then(|o| o.queries.get(selector))
            .unwrap_or(&empty);
        let old_by_ref: BTreeMap<&str, &ElementState> = old_elements
            .iter()
            .filter_map(|el| element_ref(el).map(|r| (r, el)))
            .collect();
        let new_by_ref: BTreeMap<&str, &ElementState> = new_elements
            .iter()
            .filter_map(|el| element_ref(el).map(|r| (r, el)))
            .collect();

        let mut elements = Vec::new();
        for el in old_elements {
            match element_ref(el) {
                Some(r) if new_by_ref.contains_key(r) => {}
                _ => elements.push(Diff::Removed(el.clone())),
            }
        }
        for el in new_elements {
            match element_ref(el).and_then(|r| old_by_ref.get(r)) {
                Some(&old_el) if old_el == el => elements.push(Diff::Unmodified(el.clone())),
                Some(&old_el) => elements.push(Diff::Modified {
                    old: old_el.clone(),
                    new: el.clone(),
                }),
                None => elements.push(Diff::Added(el.clone())),
            }
        }
        queries.insert(selector.clone(), elements);
    }
    DiffedState {
        hash: new.hash.clone(),
        queries,
        screenshot: new.screenshot.clone(),
    }
}

/// Mark every element of `state` as unmodified.
///
/// Used for stuttered transitions and for the `from_state` baseline of a
/// diffed transition.
pub fn unmodified_state(state: &ObservedState) -> DiffedState {
    let queries = state
        .queries
        .iter()
        .map(|(selector, elements)| {
            (
                selector.clone(),
                elements.iter().cloned().map(Diff::Unmodified).collect(),
            )
        })
        .collect();
    DiffedState {
        hash: state.hash.clone(),
        queries,
        screenshot: state.screenshot.clone(),
    }
}

/// Diff every transition in a trace against its predecessor state.
///
/// A transition stutters iff its endpoint hashes are equal; a stuttered
/// transition carries an all-unmodified diff without any matching.
pub fn diff_transitions(
    transitions: Vec<Transition<ObservedState>>,
) -> Vec<Transition<DiffedState>> {
    let mut diffed = Vec::with_capacity(transitions.len());
    for t in transitions {
        let stutter = t
            .from_state
            .as_ref()
            .is_some_and(|from| from.hash == t.to_state.hash);
        let to_state = if stutter {
            unmodified_state(&t.to_state)
        } else {
            diff_states(t.from_state.as_ref(), &t.to_state)
        };
        diffed.push(Transition {
            from_state: t.from_state.as_ref().map(unmodified_state),
            to_state,
            actions: t.actions,
            stutter,
        });
    }
    diffed
}

/// Diff a single test's transitions.
pub fn diff_test(test: Test<ObservedState>) -> Test<DiffedState> {
    Test {
        validity: test.validity,
        transitions: diff_transitions(test.transitions),
    }
}

/// Diff every test in a result.
pub fn diff_result(result: TestResult<ObservedState>) -> DiffedResult {
    match result {
        TestResult::Passed { passed } => TestResult::Passed {
            passed: passed.into_iter().map(diff_test).collect(),
        },
        TestResult::Failed { passed, failed } => TestResult::Failed {
            passed: passed.into_iter().map(diff_test).collect(),
            failed: diff_test(failed),
        },
        TestResult::Errored { error, tests } => TestResult::Errored { error, tests },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::State;
    use serde_json::json;

    fn observed(v: serde_json::Value) -> ObservedState {
        let state: State = serde_json::from_value(v).unwrap();
        ObservedState::new(state)
    }

    fn element(v: serde_json::Value) -> ElementState {
        match v {
            Json::Object(map) => map,
            other => panic!("not an element: {}", other),
        }
    }

    #[test]
    fn classifies_removed_unmodified_added_in_order() {
        let old = observed(json!({
            ".item": [{ "ref": "A", "text": "x" }, { "ref": "B", "text": "y" }],
        }));
        let new = observed(json!({
            ".item": [{ "ref": "B", "text": "y" }, { "ref": "C", "text": "z" }],
        }));
        let diffed = diff_states(Some(&old), &new);
        assert_eq!(
            diffed.queries[".item"],
            vec![
                Diff::Removed(element(json!({ "ref": "A", "text": "x" }))),
                Diff::Unmodified(element(json!({ "ref": "B", "text": "y" }))),
                Diff::Added(element(json!({ "ref": "C", "text": "z" }))),
            ]
        );
    }

    #[test]
    fn content_changes_classify_as_modified() {
        let old = observed(json!({ ".item": [{ "ref": "A", "text": "x" }] }));
        let new = observed(json!({ ".item": [{ "ref": "A", "text": "y" }] }));
        let diffed = diff_states(Some(&old), &new);
        assert_eq!(
            diffed.queries[".item"],
            vec![Diff::Modified {
                old: element(json!({ "ref": "A", "text": "x" })),
                new: element(json!({ "ref": "A", "text": "y" })),
            }]
        );
    }

    #[test]
    fn positional_changes_still_surface_as_modified() {
        let old = observed(json!({
            ".item": [{ "ref": "A", "position": { "x": 0, "y": 0 } }],
        }));
        let new = observed(json!({
            ".item": [{ "ref": "A", "position": { "x": 0, "y": 10 } }],
        }));
        let diffed = diff_states(Some(&old), &new);
        assert!(matches!(
            diffed.queries[".item"][0],
            Diff::Modified { .. }
        ));
    }

    #[test]
    fn first_transition_is_all_added_and_never_a_stutter() {
        let state = observed(json!({ ".item": [{ "ref": "A" }] }));
        let diffed = diff_transitions(vec![Transition {
            from_state: None,
            to_state: state,
            actions: vec![],
            stutter: false,
        }]);
        assert!(!diffed[0].stutter);
        assert!(diffed[0].from_state.is_none());
        assert!(matches!(diffed[0].to_state.queries[".item"][0], Diff::Added(..)));
    }

    #[test]
    fn stutter_iff_hashes_equal_and_everything_unmodified() {
        let a = observed(json!({ ".item": [{ "ref": "A", "text": "x" }] }));
        let same = observed(json!({ ".item": [{ "ref": "A", "text": "x" }] }));
        let b = observed(json!({ ".item": [{ "ref": "A", "text": "y" }] }));
        assert_eq!(a.hash, same.hash);
        assert_ne!(a.hash, b.hash);

        let diffed = diff_transitions(vec![
            Transition {
                from_state: None,
                to_state: a.clone(),
                actions: vec![],
                stutter: false,
            },
            Transition {
                from_state: Some(a.clone()),
                to_state: same,
                actions: vec![],
                stutter: false,
            },
            Transition {
                from_state: Some(a),
                to_state: b,
                actions: vec![],
                stutter: false,
            },
        ]);
        assert!(!diffed[0].stutter);
        assert!(diffed[1].stutter);
        assert!(diffed[1]
            .to_state
            .queries
            .values()
            .flatten()
            .all(Diff::is_unmodified));
        assert!(!diffed[2].stutter);
    }

    #[test]
    fn applying_a_diff_to_the_old_state_yields_the_new_state() {
        let old = observed(json!({
            ".item": [{ "ref": "A", "text": "x" }, { "ref": "B", "text": "y" }],
            ".count": [{ "ref": "N", "text": "2" }],
        }));
        let new = observed(json!({
            ".item": [{ "ref": "B", "text": "y!" }, { "ref": "C", "text": "z" }],
            ".count": [{ "ref": "N", "text": "2" }],
        }));
        let diffed = diff_states(Some(&old), &new);
        for (selector, entries) in &diffed.queries {
            let mut rebuilt: Vec<&ElementState> = entries
                .iter()
                .filter(|d| !matches!(d, Diff::Removed(..)))
                .map(Diff::new_value)
                .collect();
            let mut expected: Vec<&ElementState> = new.queries[selector].iter().collect();
            let key = |el: &&ElementState| serde_json::to_string(el).unwrap();
            rebuilt.sort_by_key(key);
            expected.sort_by_key(key);
            assert_eq!(rebuilt, expected, "selector {}", selector);
        }
    }
}
