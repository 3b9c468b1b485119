//! The wire protocol spoken with the specification interpreter.
//!
//! Messages are exchanged as one JSON object per line over the interpreter's
//! stdin/stdout, each carrying a `tag` discriminator. The inbound and
//! outbound tag sets are fixed and disjoint; anything else is a fatal
//! [`ProtocolError`]. The tags and payload shapes here are normative for
//! compatibility with existing interpreters and must not change shape.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// A CSS selector, used as an opaque key into the state map.
pub type Selector = String;

/// The attribute schema the interpreter declares for a selector.
///
/// Schemas are transported opaquely to the browser-side scripts; the engine
/// never inspects them.
pub type Schema = Json;

/// The `{selector: schema}` map the interpreter declares at `Start`.
pub type Dependencies = BTreeMap<Selector, Schema>;

/// One observed element: a mapping from attribute name to a JSON-like value.
///
/// Every element observed by the browser-side scripts carries a `ref` field
/// holding its stable element reference.
pub type ElementState = serde_json::Map<String, Json>;

/// An observation of the page: each queried selector mapped to its matching
/// elements, in document order.
pub type State = BTreeMap<Selector, Vec<ElementState>>;

/// A primitive user interaction or protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Distinguishes the primitive user actions (`click`, `doubleClick`,
    /// `focus`, `keyPress`) and the special event identifiers (`loaded`,
    /// `changed`).
    pub id: String,
    /// Arguments to the action, e.g. the element reference to click.
    pub args: Vec<Json>,
    /// Whether this is a client-originated event rather than a user action.
    #[serde(rename = "isEvent")]
    pub is_event: bool,
    /// When set on a requested action, the engine awaits events for this
    /// many milliseconds after performing it.
    pub timeout: Option<u64>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.id)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// How certain the interpreter is about a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Certainty {
    /// The verdict holds on every possible continuation of the trace.
    Definitely,
    /// The verdict holds on the observed (finite) trace.
    Probably,
}

impl Certainty {
    fn tag(self) -> &'static str {
        match self {
            Certainty::Definitely => "Definitely",
            Certainty::Probably => "Probably",
        }
    }
}

impl fmt::Display for Certainty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The interpreter's verdict on a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// The certainty level of the verdict.
    pub certainty: Certainty,
    /// Whether the property held.
    pub value: bool,
}

/// One element of a trace: either a group of actions or the state they led to.
///
/// A well-formed trace has even length and strictly alternates
/// actions-then-state, beginning with an actions group.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceElement {
    /// A group of actions/events performed between two observations.
    Actions(Vec<Action>),
    /// An observed state.
    State(State),
}

/// A single result delivered by the interpreter inside `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpreterResult {
    /// The interpreter ran a test to completion and judged its trace.
    Run {
        /// The verdict.
        valid: Validity,
        /// The raw alternating trace.
        trace: Vec<TraceElement>,
    },
    /// The interpreter could not run the test.
    Error {
        /// A human-readable description of what went wrong.
        error: String,
    },
}

/// A message from the interpreter to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpreterMessage {
    /// Begin a new session, declaring the queries to observe.
    Start {
        /// The `{selector: schema}` dependencies to sample in every state.
        dependencies: Dependencies,
    },
    /// Perform an action against the expected state version.
    RequestAction {
        /// The action to perform.
        action: Action,
        /// The state version the interpreter believes is current.
        version: u64,
    },
    /// Wait for events in the given state version.
    AwaitEvents {
        /// The state version the interpreter believes is current.
        version: u64,
        /// How long to wait for an event, in milliseconds.
        await_timeout: u64,
    },
    /// End the current session.
    End,
    /// Terminate, delivering all results.
    Done {
        /// One result per completed test.
        results: Vec<InterpreterResult>,
    },
}

/// A message from the engine to the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverMessage {
    /// A single client-originated event together with the state it produced.
    Event {
        /// The observed event.
        event: Action,
        /// The state after the event.
        state: State,
    },
    /// A batch of client-originated events together with the resulting state.
    Events {
        /// The observed events, oldest first.
        events: Vec<Action>,
        /// The state after the events.
        state: State,
    },
    /// A requested action completed; this is the new state.
    Performed {
        /// The state after the action.
        state: State,
    },
    /// No event was observed within the await timeout.
    Timeout {
        /// The freshly queried state.
        state: State,
    },
    /// The request referenced a stale state version.
    Stale,
}

fn into_object(
    v: Json,
    expected: &'static str,
) -> Result<serde_json::Map<String, Json>, ProtocolError> {
    match v {
        Json::Object(map) => Ok(map),
        v => Err(ProtocolError::BadShape(expected, v)),
    }
}

fn take_field(
    map: &mut serde_json::Map<String, Json>,
    name: &str,
    expected: &'static str,
) -> Result<Json, ProtocolError> {
    map.remove(name)
        .ok_or_else(|| ProtocolError::BadShape(expected, Json::Object(map.clone())))
}

fn as_u64(v: Json, expected: &'static str) -> Result<u64, ProtocolError> {
    v.as_u64().ok_or(ProtocolError::BadShape(expected, v))
}

fn decode_action(v: Json) -> Result<Action, ProtocolError> {
    serde_json::from_value(v.clone()).map_err(|_| ProtocolError::BadShape("an action object", v))
}

fn decode_state(v: Json) -> Result<State, ProtocolError> {
    serde_json::from_value(v.clone()).map_err(|_| ProtocolError::BadShape("a state object", v))
}

fn decode_validity(v: Json) -> Result<Validity, ProtocolError> {
    let mut map = into_object(v, "a validity object")?;
    let tag = take_field(&mut map, "tag", "a validity tag")?;
    let contents = take_field(&mut map, "contents", "validity contents")?;
    let value = match contents {
        Json::Bool(b) => b,
        v => return Err(ProtocolError::BadShape("a boolean validity value", v)),
    };
    let certainty = match tag.as_str() {
        Some("Definitely") => Certainty::Definitely,
        Some("Probably") => Certainty::Probably,
        Some(other) => return Err(ProtocolError::UnknownTag(other.to_string())),
        None => return Err(ProtocolError::BadShape("a validity tag", tag)),
    };
    Ok(Validity { certainty, value })
}

fn encode_validity(v: &Validity) -> Json {
    json!({ "tag": v.certainty.tag(), "contents": v.value })
}

fn decode_trace_element(v: Json) -> Result<TraceElement, ProtocolError> {
    let mut map = into_object(v, "a trace element")?;
    let tag = take_field(&mut map, "tag", "a trace element tag")?;
    let contents = take_field(&mut map, "contents", "trace element contents")?;
    match tag.as_str() {
        Some("TraceAction") => {
            let actions = match contents {
                Json::Array(items) => items
                    .into_iter()
                    .map(decode_action)
                    .collect::<Result<Vec<_>, _>>()?,
                v => return Err(ProtocolError::BadShape("an array of actions", v)),
            };
            Ok(TraceElement::Actions(actions))
        }
        Some("TraceState") => Ok(TraceElement::State(decode_state(contents)?)),
        Some(other) => Err(ProtocolError::UnknownTag(other.to_string())),
        None => Err(ProtocolError::BadShape("a trace element tag", tag)),
    }
}

fn encode_trace_element(e: &TraceElement) -> Json {
    match e {
        TraceElement::Actions(actions) => json!({
            "tag": "TraceAction",
            "contents": actions,
        }),
        TraceElement::State(state) => json!({
            "tag": "TraceState",
            "contents": state,
        }),
    }
}

fn decode_result(v: Json) -> Result<InterpreterResult, ProtocolError> {
    let mut map = into_object(v, "a result object")?;
    if map.contains_key("valid") && map.contains_key("trace") {
        let valid = decode_validity(take_field(&mut map, "valid", "a validity")?)?;
        let trace = match take_field(&mut map, "trace", "a trace")? {
            Json::Array(items) => items
                .into_iter()
                .map(decode_trace_element)
                .collect::<Result<Vec<_>, _>>()?,
            v => return Err(ProtocolError::BadShape("a trace array", v)),
        };
        Ok(InterpreterResult::Run { valid, trace })
    } else if let Some(error) = map.remove("error") {
        match error {
            Json::String(error) => Ok(InterpreterResult::Error { error }),
            v => Err(ProtocolError::BadShape("an error string", v)),
        }
    } else {
        Err(ProtocolError::BadShape(
            "a result object",
            Json::Object(map),
        ))
    }
}

fn encode_result(r: &InterpreterResult) -> Json {
    match r {
        InterpreterResult::Run { valid, trace } => json!({
            "valid": encode_validity(valid),
            "trace": trace.iter().map(encode_trace_element).collect::<Vec<_>>(),
        }),
        InterpreterResult::Error { error } => json!({ "error": error }),
    }
}

impl InterpreterMessage {
    /// Decode an inbound message from its parsed JSON form.
    pub fn from_json(v: Json) -> Result<Self, ProtocolError> {
        let mut map = into_object(v, "a tagged message object")?;
        let tag = take_field(&mut map, "tag", "a message tag")?;
        let tag = match tag.as_str() {
            Some(tag) => tag.to_string(),
            None => return Err(ProtocolError::BadShape("a message tag", tag)),
        };
        match tag.as_str() {
            "Start" => {
                let deps = take_field(&mut map, "dependencies", "a dependencies map")?;
                let dependencies = serde_json::from_value(deps.clone())
                    .map_err(|_| ProtocolError::BadShape("a dependencies map", deps))?;
                Ok(InterpreterMessage::Start { dependencies })
            }
            "RequestAction" => {
                let action = decode_action(take_field(&mut map, "action", "an action")?)?;
                let version = as_u64(
                    take_field(&mut map, "version", "a state version")?,
                    "a state version",
                )?;
                Ok(InterpreterMessage::RequestAction { action, version })
            }
            "AwaitEvents" => {
                let version = as_u64(
                    take_field(&mut map, "version", "a state version")?,
                    "a state version",
                )?;
                let await_timeout = as_u64(
                    take_field(&mut map, "await_timeout", "an await timeout")?,
                    "an await timeout",
                )?;
                Ok(InterpreterMessage::AwaitEvents {
                    version,
                    await_timeout,
                })
            }
            "End" => Ok(InterpreterMessage::End),
            "Done" => {
                let results = match take_field(&mut map, "results", "a results array")? {
                    Json::Array(items) => items
                        .into_iter()
                        .map(decode_result)
                        .collect::<Result<Vec<_>, _>>()?,
                    v => return Err(ProtocolError::BadShape("a results array", v)),
                };
                Ok(InterpreterMessage::Done { results })
            }
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }

    /// Encode this message to its JSON wire form.
    ///
    /// The inverse of [`InterpreterMessage::from_json`]; used by the test
    /// harnesses that play the interpreter's side of the protocol.
    pub fn to_json(&self) -> Json {
        match self {
            InterpreterMessage::Start { dependencies } => json!({
                "tag": "Start",
                "dependencies": dependencies,
            }),
            InterpreterMessage::RequestAction { action, version } => json!({
                "tag": "RequestAction",
                "action": action,
                "version": version,
            }),
            InterpreterMessage::AwaitEvents {
                version,
                await_timeout,
            } => json!({
                "tag": "AwaitEvents",
                "version": version,
                "await_timeout": await_timeout,
            }),
            InterpreterMessage::End => json!({ "tag": "End" }),
            InterpreterMessage::Done { results } => json!({
                "tag": "Done",
                "results": results.iter().map(encode_result).collect::<Vec<_>>(),
            }),
        }
    }
}

impl DriverMessage {
    /// Encode this message to its JSON wire form.
    pub fn to_json(&self) -> Json {
        match self {
            DriverMessage::Event { event, state } => json!({
                "tag": "Event",
                "contents": [event, state],
            }),
            DriverMessage::Events { events, state } => json!({
                "tag": "Events",
                "contents": { "events": events, "state": state },
            }),
            DriverMessage::Performed { state } => json!({
                "tag": "Performed",
                "contents": state,
            }),
            DriverMessage::Timeout { state } => json!({
                "tag": "Timeout",
                "contents": state,
            }),
            DriverMessage::Stale => json!({ "tag": "Stale" }),
        }
    }

    /// Decode an outbound message from its JSON wire form.
    ///
    /// The inverse of [`DriverMessage::to_json`]; used by the test harnesses
    /// that play the interpreter's side of the protocol.
    pub fn from_json(v: Json) -> Result<Self, ProtocolError> {
        let mut map = into_object(v, "a tagged message object")?;
        let tag = take_field(&mut map, "tag", "a message tag")?;
        let tag = match tag.as_str() {
            Some(tag) => tag.to_string(),
            None => return Err(ProtocolError::BadShape("a message tag", tag)),
        };
        match tag.as_str() {
            "Event" => match take_field(&mut map, "contents", "event contents")? {
                Json::Array(items) if items.len() == 2 => {
                    let mut items = items.into_iter();
                    let event = decode_action(items.next().unwrap())?;
                    let state = decode_state(items.next().unwrap())?;
                    Ok(DriverMessage::Event { event, state })
                }
                v => Err(ProtocolError::BadShape("an [event, state] pair", v)),
            },
            "Events" => {
                let mut contents = into_object(
                    take_field(&mut map, "contents", "events contents")?,
                    "events contents",
                )?;
                let events = match take_field(&mut contents, "events", "an events array")? {
                    Json::Array(items) => items
                        .into_iter()
                        .map(decode_action)
                        .collect::<Result<Vec<_>, _>>()?,
                    v => return Err(ProtocolError::BadShape("an events array", v)),
                };
                let state = decode_state(take_field(&mut contents, "state", "a state")?)?;
                Ok(DriverMessage::Events { events, state })
            }
            "Performed" => Ok(DriverMessage::Performed {
                state: decode_state(take_field(&mut map, "contents", "a state")?)?,
            }),
            "Timeout" => Ok(DriverMessage::Timeout {
                state: decode_state(take_field(&mut map, "contents", "a state")?)?,
            }),
            "Stale" => Ok(DriverMessage::Stale),
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

/// Reads line-delimited inbound messages from the interpreter's stdout.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
    buf: String,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    /// Wrap a buffered reader end of the interpreter's stdout.
    pub fn new(inner: R) -> Self {
        MessageReader {
            inner,
            buf: String::new(),
        }
    }

    /// Read the next message, or `None` once the stream has closed.
    ///
    /// Blank lines are skipped; anything else that is not a well-formed
    /// inbound message is a fatal wire error.
    pub async fn read(&mut self) -> Result<Option<InterpreterMessage>, ProtocolError> {
        loop {
            self.buf.clear();
            let n = self.inner.read_line(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            let v: Json = serde_json::from_str(line)?;
            return InterpreterMessage::from_json(v).map(Some);
        }
    }
}

/// Writes line-delimited outbound messages to the interpreter's stdin.
///
/// Every message is newline-terminated and flushed immediately; the
/// interpreter blocks on our replies, so buffering a message would deadlock
/// the session.
#[derive(Debug)]
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Wrap the write end of the interpreter's stdin.
    pub fn new(inner: W) -> Self {
        MessageWriter { inner }
    }

    /// Encode, write, and flush one message.
    pub async fn write(&mut self, msg: &DriverMessage) -> Result<(), std::io::Error> {
        let mut line = serde_json::to_string(&msg.to_json())?;
        line.push('\n');
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await
    }
}
