//! The pre-built browser-side scripts and their result normalization.
//!
//! Three scripts are loaded as opaque text at startup and executed
//! asynchronously in the page: one queries the observed state for the
//! declared dependencies, one arms the in-page event observer, and one
//! awaits observed events with a bounded timeout. Whatever they return is
//! normalized by replacing every WebDriver element handle with its stable
//! element reference string.

use crate::browser::BrowserSession;
use crate::error::{BrowserError, ConfigError};
use crate::protocol::{Action, Dependencies, State};
use serde::Deserialize;
use serde_json::Value as Json;
use std::path::Path;
use webdriver::common::ELEMENT_KEY;

/// The environment variable naming the directory holding the three scripts.
pub const CLIENT_SIDE_DIR_VAR: &str = "QUICKSTROM_CLIENT_SIDE_DIRECTORY";

/// A batch of observed events and the state they resulted in, as returned by
/// the await-events script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventsBatch {
    /// The observed events, oldest first.
    pub events: Vec<Action>,
    /// The state after the events.
    pub state: State,
}

/// The three browser-side scripts, loaded and ready to execute.
#[derive(Debug, Clone)]
pub struct ClientScripts {
    query_state: String,
    install_event_listener: String,
    await_events: String,
}

impl ClientScripts {
    /// Load the scripts from the directory named by
    /// [`CLIENT_SIDE_DIR_VAR`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let dir = std::env::var_os(CLIENT_SIDE_DIR_VAR)
            .ok_or(ConfigError::MissingEnvVar(CLIENT_SIDE_DIR_VAR))?;
        Self::load(Path::new(&dir))
    }

    /// Load the scripts from the given directory.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|e| ConfigError::ScriptUnreadable(path, e))
        };
        Ok(ClientScripts {
            query_state: read("queryState.js")?,
            install_event_listener: read("installEventListener.js")?,
            await_events: read("awaitEvents.js")?,
        })
    }

    /// Query the current state for the declared dependencies.
    pub async fn query_state<S: BrowserSession>(
        &self,
        session: &mut S,
        dependencies: &Dependencies,
    ) -> Result<State, BrowserError> {
        let deps = serde_json::to_value(dependencies)?;
        let raw = session.execute_async(&self.query_state, vec![deps]).await?;
        let normalized = elements_to_refs(raw);
        serde_json::from_value(normalized.clone()).map_err(|_| BrowserError::NotW3C(normalized))
    }

    /// Arm the in-page event observer for the declared dependencies.
    pub async fn install_event_listener<S: BrowserSession>(
        &self,
        session: &mut S,
        dependencies: &Dependencies,
    ) -> Result<(), BrowserError> {
        let deps = serde_json::to_value(dependencies)?;
        session
            .execute_async(&self.install_event_listener, vec![deps])
            .await?;
        Ok(())
    }

    /// Wait up to `timeout_ms` for the armed observer to report events.
    ///
    /// Returns `None` if the timeout elapsed without any observed event.
    pub async fn await_events<S: BrowserSession>(
        &self,
        session: &mut S,
        timeout_ms: u64,
    ) -> Result<Option<EventsBatch>, BrowserError> {
        let raw = session
            .execute_async(&self.await_events, vec![Json::from(timeout_ms)])
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        let normalized = elements_to_refs(raw);
        serde_json::from_value(normalized.clone())
            .map(Some)
            .map_err(|_| BrowserError::NotW3C(normalized))
    }
}

/// Recursively replace every element handle with its reference string.
///
/// The driver encodes an element handle as an object carrying the W3C
/// element identifier key; everything else is traversed structurally.
pub fn elements_to_refs(value: Json) -> Json {
    match value {
        Json::Object(map) => {
            if let Some(Json::String(element_ref)) = map.get(ELEMENT_KEY) {
                return Json::String(element_ref.clone());
            }
            Json::Object(
                map.into_iter()
                    .map(|(k, v)| (k, elements_to_refs(v)))
                    .collect(),
            )
        }
        Json::Array(items) => Json::Array(items.into_iter().map(elements_to_refs).collect()),
        other => other,
    }
}
