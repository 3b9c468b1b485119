//! The result model: observed states, transitions, tests, and the
//! passed/failed/errored sum over them.
//!
//! Raw interpreter results carry a flat alternating trace; this module pairs
//! it up into transitions between hashed states. Diffing between successive
//! states lives in [`crate::diff`].

use crate::error::ProtocolError;
use crate::hash::state_hash;
use crate::protocol::{
    Action, ElementState, InterpreterResult, Selector, State, TraceElement, Validity,
};
use std::collections::BTreeMap;

/// A PNG screenshot of the page at some state, content-addressed by the
/// state's hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    /// Raw PNG bytes.
    pub image: Vec<u8>,
    /// Rendered width in device pixels.
    pub width: u64,
    /// Rendered height in device pixels.
    pub height: u64,
    /// Ratio of rendered pixels to CSS pixels.
    pub scale: u32,
}

/// A state as observed by the engine: hashed queries plus an optional
/// screenshot taken at the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedState {
    /// The canonical content hash of `queries`.
    pub hash: String,
    /// The observed elements, per selector.
    pub queries: BTreeMap<Selector, Vec<ElementState>>,
    /// Screenshot taken at this state, if capture was enabled.
    pub screenshot: Option<Screenshot>,
}

impl ObservedState {
    /// Hash a raw protocol state into an observed state.
    pub fn new(queries: State) -> Self {
        ObservedState {
            hash: state_hash(&queries),
            queries,
            screenshot: None,
        }
    }
}

/// One step of a test: the actions performed and the state they led to.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    /// The state the actions were performed in. `None` only for the first
    /// transition, which describes the initial loaded snapshot.
    pub from_state: Option<S>,
    /// The state observed after the actions.
    pub to_state: S,
    /// The actions (or events) taken in this step.
    pub actions: Vec<Action>,
    /// Whether `from_state` and `to_state` hash-equal.
    pub stutter: bool,
}

impl<S> Transition<S> {
    /// Apply `f` to both endpoint states.
    pub fn map_states<T>(self, f: &mut impl FnMut(S) -> T) -> Transition<T> {
        Transition {
            from_state: self.from_state.map(&mut *f),
            to_state: f(self.to_state),
            actions: self.actions,
            stutter: self.stutter,
        }
    }
}

/// A single test: the interpreter's verdict and the transitions of its trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Test<S> {
    /// The interpreter's verdict on this trace.
    pub validity: Validity,
    /// The steps of the trace, in order.
    pub transitions: Vec<Transition<S>>,
}

impl<S> Test<S> {
    /// Apply `f` to every state in every transition.
    pub fn map_states<T>(self, f: &mut impl FnMut(S) -> T) -> Test<T> {
        let mut transitions = Vec::with_capacity(self.transitions.len());
        for t in self.transitions {
            transitions.push(t.map_states(&mut *f));
        }
        Test {
            validity: self.validity,
            transitions,
        }
    }
}

/// The outcome of a check run, generic over the state representation so the
/// same shape covers both plain observed states and diffed states.
#[derive(Debug, Clone, PartialEq)]
pub enum TestResult<S> {
    /// Every test passed.
    Passed {
        /// The passing tests.
        passed: Vec<Test<S>>,
    },
    /// A test failed; the failing trace is the interesting artifact.
    Failed {
        /// Tests that passed before the failure.
        passed: Vec<Test<S>>,
        /// The failing test.
        failed: Test<S>,
    },
    /// A test could not be run to a verdict.
    Errored {
        /// What went wrong.
        error: String,
        /// How many tests were affected.
        tests: usize,
    },
}

/// A result over plain observed states, as returned by the engine.
pub type CheckedResult = TestResult<ObservedState>;

impl<S> TestResult<S> {
    /// Apply `f` to every state in the result.
    ///
    /// This is the adapter between the two state representations: attaching
    /// screenshots maps `ObservedState → ObservedState`, diffing maps
    /// `ObservedState → DiffedState`.
    pub fn map_states<T>(self, mut f: impl FnMut(S) -> T) -> TestResult<T> {
        fn map_tests<S, T>(tests: Vec<Test<S>>, f: &mut impl FnMut(S) -> T) -> Vec<Test<T>> {
            let mut mapped = Vec::with_capacity(tests.len());
            for test in tests {
                mapped.push(test.map_states(&mut *f));
            }
            mapped
        }

        match self {
            TestResult::Passed { passed } => TestResult::Passed {
                passed: map_tests(passed, &mut f),
            },
            TestResult::Failed { passed, failed } => TestResult::Failed {
                passed: map_tests(passed, &mut f),
                failed: failed.map_states(&mut f),
            },
            TestResult::Errored { error, tests } => TestResult::Errored { error, tests },
        }
    }

    /// True if this result reports a failing test.
    pub fn is_failed(&self) -> bool {
        matches!(self, TestResult::Failed { .. })
    }

    /// True if this result reports an error rather than a verdict.
    pub fn is_errored(&self) -> bool {
        matches!(self, TestResult::Errored { .. })
    }
}

/// Pair up a raw alternating trace into transitions between hashed states.
///
/// The trace must strictly alternate `actions, state, actions, state, …`;
/// the first pair becomes the initial transition with no `from_state`.
/// Stutter flags are left `false` here; they are derived from state hashes
/// when the result is diffed.
pub fn transitions_from_trace(
    trace: Vec<TraceElement>,
) -> Result<Vec<Transition<ObservedState>>, ProtocolError> {
    let mut transitions = Vec::new();
    let mut elements = trace.into_iter();
    let mut last_state: Option<ObservedState> = None;
    loop {
        let actions = match elements.next() {
            None => break,
            Some(TraceElement::Actions(actions)) => actions,
            Some(TraceElement::State(..)) => {
                return Err(ProtocolError::MalformedTrace(
                    "expected an actions group, got a state",
                ))
            }
        };
        let to_state = match elements.next() {
            Some(TraceElement::State(state)) => ObservedState::new(state),
            Some(TraceElement::Actions(..)) => {
                return Err(ProtocolError::MalformedTrace(
                    "expected a state after an actions group, got actions",
                ))
            }
            None => {
                return Err(ProtocolError::MalformedTrace(
                    "trace ended after an actions group",
                ))
            }
        };
        transitions.push(Transition {
            from_state: last_state.clone(),
            to_state: to_state.clone(),
            actions,
            stutter: false,
        });
        last_state = Some(to_state);
    }
    Ok(transitions)
}

/// Classify a raw interpreter result.
///
/// A run with a `true` verdict becomes `Passed` with its single test; a
/// `false` verdict becomes `Failed` with the test as the failing one; an
/// interpreter-side error becomes `Errored`.
pub fn from_protocol_result(result: InterpreterResult) -> Result<CheckedResult, ProtocolError> {
    match result {
        InterpreterResult::Run { valid, trace } => {
            let test = Test {
                validity: valid,
                transitions: transitions_from_trace(trace)?,
            };
            if valid.value {
                Ok(TestResult::Passed { passed: vec![test] })
            } else {
                Ok(TestResult::Failed {
                    passed: vec![],
                    failed: test,
                })
            }
        }
        InterpreterResult::Error { error } => Ok(TestResult::Errored { error, tests: 1 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Certainty;
    use serde_json::json;

    fn state_of(v: serde_json::Value) -> State {
        serde_json::from_value(v).unwrap()
    }

    fn loaded() -> Action {
        Action {
            id: "loaded".into(),
            args: vec![],
            is_event: true,
            timeout: None,
        }
    }

    fn click() -> Action {
        Action {
            id: "click".into(),
            args: vec![json!("E1")],
            is_event: false,
            timeout: None,
        }
    }

    #[test]
    fn trace_pairs_into_transitions() {
        let s0 = state_of(json!({ "button": [{ "ref": "E1", "text": "Add" }] }));
        let s1 = state_of(json!({ "button": [{ "ref": "E1", "text": "Added" }] }));
        let trace = vec![
            TraceElement::Actions(vec![loaded()]),
            TraceElement::State(s0.clone()),
            TraceElement::Actions(vec![click()]),
            TraceElement::State(s1.clone()),
        ];
        let transitions = transitions_from_trace(trace).unwrap();
        assert_eq!(transitions.len(), 2);
        assert!(transitions[0].from_state.is_none());
        assert_eq!(transitions[0].to_state.queries, s0);
        assert_eq!(
            transitions[1].from_state.as_ref().unwrap().queries,
            s0
        );
        assert_eq!(transitions[1].to_state.queries, s1);
        assert_eq!(transitions[1].actions, vec![click()]);
    }

    #[test]
    fn odd_or_misordered_traces_are_rejected() {
        let state = state_of(json!({}));
        assert!(transitions_from_trace(vec![TraceElement::Actions(vec![loaded()])]).is_err());
        assert!(transitions_from_trace(vec![TraceElement::State(state.clone())]).is_err());
        assert!(transitions_from_trace(vec![
            TraceElement::Actions(vec![loaded()]),
            TraceElement::Actions(vec![click()]),
        ])
        .is_err());
    }

    #[test]
    fn valid_runs_classify_as_passed() {
        let result = from_protocol_result(InterpreterResult::Run {
            valid: Validity {
                certainty: Certainty::Definitely,
                value: true,
            },
            trace: vec![
                TraceElement::Actions(vec![loaded()]),
                TraceElement::State(state_of(json!({}))),
            ],
        })
        .unwrap();
        match result {
            TestResult::Passed { passed } => assert_eq!(passed.len(), 1),
            other => panic!("classified as {:?}", other),
        }
    }

    #[test]
    fn invalid_runs_classify_as_failed() {
        let result = from_protocol_result(InterpreterResult::Run {
            valid: Validity {
                certainty: Certainty::Probably,
                value: false,
            },
            trace: vec![
                TraceElement::Actions(vec![loaded()]),
                TraceElement::State(state_of(json!({}))),
            ],
        })
        .unwrap();
        match result {
            TestResult::Failed { passed, failed } => {
                assert!(passed.is_empty());
                assert_eq!(failed.transitions.len(), 1);
            }
            other => panic!("classified as {:?}", other),
        }
    }

    #[test]
    fn errors_classify_as_errored() {
        let result = from_protocol_result(InterpreterResult::Error {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(
            result,
            TestResult::Errored {
                error: "boom".into(),
                tests: 1
            }
        );
    }

    #[test]
    fn map_states_touches_every_state() {
        let s = ObservedState::new(state_of(json!({ "b": [{ "ref": "E1" }] })));
        let result = TestResult::Failed {
            passed: vec![Test {
                validity: Validity {
                    certainty: Certainty::Definitely,
                    value: true,
                },
                transitions: vec![Transition {
                    from_state: None,
                    to_state: s.clone(),
                    actions: vec![],
                    stutter: false,
                }],
            }],
            failed: Test {
                validity: Validity {
                    certainty: Certainty::Probably,
                    value: false,
                },
                transitions: vec![Transition {
                    from_state: Some(s.clone()),
                    to_state: s,
                    actions: vec![],
                    stutter: false,
                }],
            },
        };
        let mut seen = 0;
        let _ = result.map_states(|s| {
            seen += 1;
            s
        });
        assert_eq!(seen, 3);
    }
}
