//! The session engine: runs one interpreter process end-to-end.
//!
//! The engine owns the interpreter's stdin/stdout for its whole lifetime and
//! dispatches inbound messages in two nested loops: an outer loop awaiting
//! sessions (`Start`/`Done`) and an inner loop serving one session
//! (`RequestAction`/`AwaitEvents`/`End`). Every reply it sends corresponds
//! to a unique, increasing state version; requests stamped with any other
//! version are answered with `Stale` and nothing else.

use crate::browser::webdriver::{driver_available, WdBrowser};
use crate::browser::{Browser, BrowserControl, BrowserSession, Cookie};
use crate::error::{BrowserError, CheckError, ConfigError, ProtocolError};
use crate::hash::state_hash;
use crate::protocol::{
    Dependencies, DriverMessage, InterpreterMessage, MessageReader, MessageWriter, State,
};
use crate::result::{from_protocol_result, CheckedResult, ObservedState, Screenshot, TestResult};
use crate::scripts::ClientScripts;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Window size applied to every session, in CSS pixels.
const VIEWPORT: (u32, u32) = (1200, 600);

/// How long the initial loaded phase waits for the page's first events.
const LOAD_TIMEOUT_MS: u64 = 10_000;

/// Configuration of one check run.
#[derive(Debug, Clone)]
pub struct Check {
    /// The specification module to check.
    pub module: String,
    /// The URL the browser is pointed at for every session.
    pub origin: String,
    /// Which browser to drive.
    pub browser: Browser,
    /// Module search paths passed to the interpreter.
    pub include_paths: Vec<PathBuf>,
    /// Cookies installed before each session's checks begin.
    pub cookies: Vec<Cookie>,
    /// Whether to capture a screenshot per distinct state.
    pub capture_screenshots: bool,
    /// Where the interpreter's stderr is logged.
    pub interpreter_log: PathBuf,
}

impl Check {
    /// Check `module` against the app at `origin` with default settings.
    pub fn new(module: impl Into<String>, origin: impl Into<String>) -> Self {
        Check {
            module: module.into(),
            origin: origin.into(),
            browser: Browser::Firefox,
            include_paths: Vec::new(),
            cookies: Vec::new(),
            capture_screenshots: false,
            interpreter_log: PathBuf::from("interpreter.log"),
        }
    }

    /// Launch the interpreter and run all of its sessions to completion.
    ///
    /// Returns one result per completed test. Browser failures are contained
    /// per session and surface as errored results; interpreter and protocol
    /// failures are returned as errors.
    pub async fn execute(&self) -> Result<Vec<CheckedResult>, CheckError> {
        // preflight, so a missing driver is reported before any session starts
        if !driver_available(self.browser) {
            return Err(
                ConfigError::DriverMissing(self.browser.driver_binary().to_string()).into(),
            );
        }
        let scripts = ClientScripts::from_env()?;

        let log_file = std::fs::File::create(&self.interpreter_log)?;
        let mut includes = Vec::with_capacity(self.include_paths.len());
        for path in &self.include_paths {
            includes.push(format!("-I{}", path.display()));
        }
        debug!(module = %self.module, ?includes, "invoking interpreter");
        let mut child = Command::new("specstrom")
            .arg("check")
            .arg(&self.module)
            .args(&includes)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(CheckError::InterpreterSpawn)?;

        let stdout = child.stdout.take().expect("interpreter stdout is piped");
        let stdin = child.stdin.take().expect("interpreter stdin is piped");

        let mut engine = SessionEngine::new(
            MessageReader::new(BufReader::new(stdout)),
            MessageWriter::new(stdin),
            WdBrowser::new(),
            scripts,
            SessionConfig {
                origin: self.origin.clone(),
                browser: self.browser,
                cookies: self.cookies.clone(),
                capture_screenshots: self.capture_screenshots,
            },
        );

        match engine.run().await {
            Ok(results) => {
                let _ = child.wait().await;
                Ok(results)
            }
            Err(EngineError::Closed) => {
                let status = child.wait().await?;
                if status.success() {
                    // the interpreter finished without a Done; all we have is
                    // whatever errored along the way
                    Ok(engine.drain_errored())
                } else {
                    Err(CheckError::InterpreterFailed {
                        exit_code: status.code(),
                        log_path: self.interpreter_log.clone(),
                    })
                }
            }
            Err(EngineError::Protocol(e)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(e.into())
            }
        }
    }
}

/// Per-session configuration handed to the engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The URL to load at session start.
    pub origin: String,
    /// Which browser to open.
    pub browser: Browser,
    /// Cookies applied after the first navigation.
    pub cookies: Vec<Cookie>,
    /// Whether to capture one screenshot per distinct state hash.
    pub capture_screenshots: bool,
}

/// A fatal engine-level failure.
#[derive(Debug)]
pub enum EngineError {
    /// The interpreter's streams closed before `Done` arrived.
    Closed,
    /// The interpreter broke the wire protocol.
    Protocol(ProtocolError),
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Closed => None,
            EngineError::Protocol(e) => Some(e),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Closed => f.write_str("interpreter closed its streams before Done"),
            EngineError::Protocol(e) => write!(f, "{}", e),
        }
    }
}

// Inner-loop failures split into the two containment classes: browser
// failures end the session, engine failures end the run.
enum SessionError {
    Browser(BrowserError),
    Engine(EngineError),
}

impl From<BrowserError> for SessionError {
    fn from(e: BrowserError) -> Self {
        SessionError::Browser(e)
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        SessionError::Engine(e)
    }
}

/// The protocol engine driving sessions for one interpreter process.
///
/// Generic over the message streams and the browser capability so that
/// tests can run it over in-memory pipes with a scripted browser.
pub struct SessionEngine<R, W, B: BrowserControl> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
    browser: B,
    scripts: ClientScripts,
    config: SessionConfig,
    // Shared so a future implementation may complete the observer from a
    // separate task; replies must keep going through the single writer.
    version: Arc<Mutex<u64>>,
    screenshots: BTreeMap<String, Screenshot>,
    errored: Vec<CheckedResult>,
}

impl<R, W, B> SessionEngine<R, W, B>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    B: BrowserControl,
{
    /// Create an engine over the given streams and browser capability.
    pub fn new(
        reader: MessageReader<R>,
        writer: MessageWriter<W>,
        browser: B,
        scripts: ClientScripts,
        config: SessionConfig,
    ) -> Self {
        SessionEngine {
            reader,
            writer,
            browser,
            scripts,
            config,
            version: Arc::new(Mutex::new(0)),
            screenshots: BTreeMap::new(),
            errored: Vec::new(),
        }
    }

    /// Run sessions until the interpreter sends `Done`, returning its
    /// results (with screenshots attached) plus any sessions that errored.
    pub async fn run(&mut self) -> Result<Vec<CheckedResult>, EngineError> {
        loop {
            match self.read().await? {
                InterpreterMessage::Start { dependencies } => {
                    info!("starting session");
                    match self.run_session(&dependencies).await {
                        Ok(()) => {}
                        Err(SessionError::Browser(e)) => {
                            warn!(error = %e, "browser failure, abandoning session");
                            self.errored.push(TestResult::Errored {
                                error: e.to_string(),
                                tests: 1,
                            });
                        }
                        Err(SessionError::Engine(e)) => return Err(e),
                    }
                }
                InterpreterMessage::Done { results } => {
                    let mut converted = Vec::with_capacity(results.len());
                    for result in results {
                        converted.push(
                            from_protocol_result(result).map_err(EngineError::Protocol)?,
                        );
                    }
                    converted.append(&mut self.errored);
                    let screenshots = &self.screenshots;
                    return Ok(converted
                        .into_iter()
                        .map(|result| {
                            result.map_states(|mut state: ObservedState| {
                                state.screenshot = screenshots.get(&state.hash).cloned();
                                state
                            })
                        })
                        .collect());
                }
                other => {
                    return Err(EngineError::Protocol(ProtocolError::UnexpectedMessage(
                        format!("{:?} while awaiting sessions", other),
                    )))
                }
            }
        }
    }

    /// The errored results collected so far. Used when the interpreter
    /// finishes without a `Done`.
    pub fn drain_errored(&mut self) -> Vec<CheckedResult> {
        std::mem::take(&mut self.errored)
    }

    async fn run_session(&mut self, dependencies: &Dependencies) -> Result<(), SessionError> {
        let mut session = self
            .browser
            .open(self.config.browser)
            .await
            .map_err(SessionError::Browser)?;
        let result = self.session_loop(&mut session, dependencies).await;
        // teardown on every exit path out of the session
        if let Err(e) = session.close().await {
            warn!(error = %e, "error closing browser session");
        }
        result
    }

    async fn session_loop(
        &mut self,
        session: &mut B::Session,
        dependencies: &Dependencies,
    ) -> Result<(), SessionError> {
        session.navigate(&self.config.origin).await?;
        if !self.config.cookies.is_empty() {
            // cookies can only be installed once a navigation has
            // established the document origin
            session.set_cookies(&self.config.cookies).await?;
            session.navigate(&self.config.origin).await?;
        }
        session.set_viewport(VIEWPORT.0, VIEWPORT.1).await?;
        self.reset_version();
        self.scripts
            .install_event_listener(session, dependencies)
            .await?;
        self.observe_change(session, dependencies, LOAD_TIMEOUT_MS)
            .await?;

        loop {
            match self.read().await.map_err(SessionError::Engine)? {
                InterpreterMessage::RequestAction { action, version } => {
                    if !self.version_is_current(version) {
                        self.send(&DriverMessage::Stale).await?;
                        continue;
                    }
                    info!(action = %action, version, "performing action");
                    session.perform(&action).await?;
                    if action.timeout.is_some() {
                        self.scripts
                            .install_event_listener(session, dependencies)
                            .await?;
                    }
                    let state = self.scripts.query_state(session, dependencies).await?;
                    let state = self.capture(session, state).await?;
                    self.bump_version();
                    self.send(&DriverMessage::Performed { state }).await?;
                    if let Some(timeout) = action.timeout {
                        self.observe_change(session, dependencies, timeout).await?;
                    }
                }
                InterpreterMessage::AwaitEvents {
                    version,
                    await_timeout,
                } => {
                    if !self.version_is_current(version) {
                        self.send(&DriverMessage::Stale).await?;
                        continue;
                    }
                    self.scripts
                        .install_event_listener(session, dependencies)
                        .await?;
                    self.observe_change(session, dependencies, await_timeout)
                        .await?;
                }
                InterpreterMessage::End => {
                    info!("ending session");
                    return Ok(());
                }
                other => {
                    return Err(SessionError::Engine(EngineError::Protocol(
                        ProtocolError::UnexpectedMessage(format!("{:?} within a session", other)),
                    )))
                }
            }
        }
    }

    /// Wait for events with the given timeout, then reply `Events` or
    /// `Timeout`; either way the state version advances exactly once.
    async fn observe_change(
        &mut self,
        session: &mut B::Session,
        dependencies: &Dependencies,
        timeout_ms: u64,
    ) -> Result<(), SessionError> {
        match self.scripts.await_events(session, timeout_ms).await? {
            None => {
                debug!(timeout_ms, "no events observed");
                let state = self.scripts.query_state(session, dependencies).await?;
                let state = self.capture(session, state).await?;
                self.bump_version();
                self.send(&DriverMessage::Timeout { state }).await?;
            }
            Some(batch) => {
                debug!(events = batch.events.len(), "events observed");
                let state = self.capture(session, batch.state).await?;
                self.bump_version();
                self.send(&DriverMessage::Events {
                    events: batch.events,
                    state,
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Capture a screenshot for this state's hash, if enabled and not
    /// already captured; at most one screenshot is retained per hash.
    async fn capture(
        &mut self,
        session: &mut B::Session,
        state: State,
    ) -> Result<State, BrowserError> {
        if self.config.capture_screenshots {
            let hash = state_hash(&state);
            if !self.screenshots.contains_key(&hash) {
                let screenshot = session.screenshot().await?;
                self.screenshots.insert(hash, screenshot);
            }
        }
        Ok(state)
    }

    async fn read(&mut self) -> Result<InterpreterMessage, EngineError> {
        match self.reader.read().await {
            Ok(Some(msg)) => {
                debug!(msg = ?msg, "received");
                Ok(msg)
            }
            Ok(None) => Err(EngineError::Closed),
            Err(ProtocolError::Io(_)) => Err(EngineError::Closed),
            Err(e) => Err(EngineError::Protocol(e)),
        }
    }

    async fn send(&mut self, msg: &DriverMessage) -> Result<(), EngineError> {
        debug!(msg = ?msg, "sending");
        // a write failure means the interpreter is gone; its exit status
        // decides how that is reported
        self.writer.write(msg).await.map_err(|_| EngineError::Closed)
    }

    fn reset_version(&self) {
        *self.version.lock().expect("version lock poisoned") = 0;
    }

    fn bump_version(&self) {
        *self.version.lock().expect("version lock poisoned") += 1;
    }

    fn version_is_current(&self, version: u64) -> bool {
        *self.version.lock().expect("version lock poisoned") == version
    }
}
