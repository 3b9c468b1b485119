//! Shared harness for driving the session engine over in-memory pipes with
//! a scripted interpreter and a scripted browser.
#![allow(dead_code)]

use quickstrom::browser::{Browser, BrowserControl, BrowserSession, Cookie};
use quickstrom::error::BrowserError;
use quickstrom::executor::{EngineError, SessionConfig, SessionEngine};
use quickstrom::protocol::{
    Action, DriverMessage, InterpreterMessage, MessageReader, MessageWriter,
};
use quickstrom::result::{CheckedResult, Screenshot};
use quickstrom::scripts::ClientScripts;
use serde_json::Value as Json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

// Stub script bodies; the scripted browser dispatches on these.
pub const QUERY_SCRIPT: &str = "// query state";
pub const INSTALL_SCRIPT: &str = "// install event listener";
pub const AWAIT_SCRIPT: &str = "// await events";

/// Everything the scripted browser was asked to do.
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub opened: usize,
    pub closed: usize,
    pub navigations: Vec<String>,
    pub cookies: Vec<Cookie>,
    pub viewports: Vec<(u32, u32)>,
    pub performed: Vec<Action>,
    pub listeners_installed: usize,
    pub screenshots_taken: usize,
}

/// What the in-page scripts should answer, in order of invocation.
#[derive(Debug, Default)]
pub struct ScriptReplies {
    /// Replies for the query-state script.
    pub states: VecDeque<Json>,
    /// Replies for the await-events script (`null` for a timeout).
    pub awaits: VecDeque<Json>,
}

/// A browser capability driven entirely from canned replies.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBrowser {
    pub log: Arc<Mutex<BrowserLog>>,
    pub replies: Arc<Mutex<ScriptReplies>>,
    /// Fail every `perform` with an unsupported-action error.
    pub fail_perform: bool,
}

impl ScriptedBrowser {
    pub fn log(&self) -> std::sync::MutexGuard<'_, BrowserLog> {
        self.log.lock().unwrap()
    }

    pub fn push_state(&self, state: Json) {
        self.replies.lock().unwrap().states.push_back(state);
    }

    pub fn push_await(&self, reply: Json) {
        self.replies.lock().unwrap().awaits.push_back(reply);
    }
}

pub struct ScriptedSession {
    log: Arc<Mutex<BrowserLog>>,
    replies: Arc<Mutex<ScriptReplies>>,
    fail_perform: bool,
}

impl BrowserControl for ScriptedBrowser {
    type Session = ScriptedSession;

    async fn open(&self, _browser: Browser) -> Result<ScriptedSession, BrowserError> {
        self.log.lock().unwrap().opened += 1;
        Ok(ScriptedSession {
            log: Arc::clone(&self.log),
            replies: Arc::clone(&self.replies),
            fail_perform: self.fail_perform,
        })
    }
}

impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.log.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        self.log.lock().unwrap().cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BrowserError> {
        self.log.lock().unwrap().viewports.push((width, height));
        Ok(())
    }

    async fn perform(&mut self, action: &Action) -> Result<(), BrowserError> {
        if self.fail_perform {
            return Err(BrowserError::UnsupportedAction(action.id.clone()));
        }
        self.log.lock().unwrap().performed.push(action.clone());
        Ok(())
    }

    async fn execute_async(
        &mut self,
        script: &str,
        _args: Vec<Json>,
    ) -> Result<Json, BrowserError> {
        let mut replies = self.replies.lock().unwrap();
        match script {
            QUERY_SCRIPT => Ok(replies
                .states
                .pop_front()
                .unwrap_or_else(|| serde_json::json!({}))),
            INSTALL_SCRIPT => {
                drop(replies);
                self.log.lock().unwrap().listeners_installed += 1;
                Ok(Json::Null)
            }
            AWAIT_SCRIPT => Ok(replies.awaits.pop_front().unwrap_or(Json::Null)),
            other => panic!("unexpected script executed: {}", other),
        }
    }

    async fn screenshot(&mut self) -> Result<Screenshot, BrowserError> {
        let mut log = self.log.lock().unwrap();
        log.screenshots_taken += 1;
        Ok(Screenshot {
            image: vec![0u8; 8],
            width: 2400,
            height: 1200,
            scale: 2,
        })
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Load client scripts with the stub bodies the scripted browser expects.
pub fn stub_scripts() -> ClientScripts {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("queryState.js"), QUERY_SCRIPT).unwrap();
    std::fs::write(dir.path().join("installEventListener.js"), INSTALL_SCRIPT).unwrap();
    std::fs::write(dir.path().join("awaitEvents.js"), AWAIT_SCRIPT).unwrap();
    ClientScripts::load(dir.path()).unwrap()
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        origin: "http://localhost:8000/".to_string(),
        browser: Browser::Firefox,
        cookies: Vec::new(),
        capture_screenshots: false,
    }
}

/// Outcome of one scripted engine run.
pub struct EngineRun {
    pub result: Result<Vec<CheckedResult>, EngineError>,
    pub errored: Vec<CheckedResult>,
    pub replies: Vec<DriverMessage>,
}

/// Run the engine over in-memory pipes against a pre-scripted inbound
/// message sequence, returning its result and every reply it sent.
pub async fn run_engine(
    browser: ScriptedBrowser,
    config: SessionConfig,
    messages: Vec<InterpreterMessage>,
) -> EngineRun {
    let (inbound_tx, inbound_rx) = tokio::io::duplex(1 << 20);
    let (outbound_tx, outbound_rx) = tokio::io::duplex(1 << 20);

    write_messages(inbound_tx, messages).await;

    let mut engine = SessionEngine::new(
        MessageReader::new(BufReader::new(inbound_rx)),
        MessageWriter::new(outbound_tx),
        browser,
        stub_scripts(),
        config,
    );
    let result = engine.run().await;
    let errored = engine.drain_errored();
    drop(engine);

    let replies = read_replies(outbound_rx).await;
    EngineRun {
        result,
        errored,
        replies,
    }
}

async fn write_messages(mut tx: DuplexStream, messages: Vec<InterpreterMessage>) {
    for msg in messages {
        let mut line = serde_json::to_string(&msg.to_json()).unwrap();
        line.push('\n');
        tx.write_all(line.as_bytes()).await.unwrap();
    }
    tx.shutdown().await.unwrap();
    // dropping tx closes the engine's read end after the scripted messages
}

async fn read_replies(mut rx: DuplexStream) -> Vec<DriverMessage> {
    let mut buf = String::new();
    rx.read_to_string(&mut buf).await.unwrap();
    buf.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            DriverMessage::from_json(serde_json::from_str(line).unwrap())
                .expect("engine sent a well-formed message")
        })
        .collect()
}
