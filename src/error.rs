//! Error types.

use hyper_util::client::legacy::Error as HCError;
use serde_json::Value as Json;
use std::error::Error;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;
use std::str::FromStr;
use url::ParseError;

/// An error raised by the browser side: the driver process, the WebDriver
/// HTTP endpoint, or an in-page script.
///
/// Browser errors are fatal to the session they occur in, but not to the
/// check as a whole; the engine converts them into an errored test result
/// and awaits the interpreter's next session.
#[derive(Debug)]
pub enum BrowserError {
    /// The driver binary (`geckodriver` or `chromedriver`) was not found on `PATH`.
    DriverMissing(String),

    /// The driver binary was found but could not be spawned, or never became ready.
    DriverUnavailable(IOError),

    /// A standard WebDriver error occurred.
    ///
    /// See [the spec] for details about what each of these errors represent.
    ///
    /// [the spec]: https://www.w3.org/TR/webdriver/#handling-errors
    Standard(DriverFailure),

    /// A request to the WebDriver server failed.
    Failed(hyper::Error),

    /// A request to the WebDriver server failed (error in hyper_util's legacy client).
    FailedC(HCError),

    /// The connection to the WebDriver server was lost.
    Lost(IOError),

    /// The WebDriver server responded with a non-standard, non-JSON reply.
    NotJson(String),

    /// The WebDriver server responded to a command with an invalid JSON response.
    Json(serde_json::Error),

    /// The WebDriver server produced a response that does not conform to the [W3C WebDriver
    /// specification][spec].
    ///
    /// [spec]: https://www.w3.org/TR/webdriver/
    NotW3C(Json),

    /// A bad URL was encountered during parsing.
    BadUrl(ParseError),

    /// Could not decode a base64 screenshot.
    ImageDecode(base64::DecodeError),

    /// The interpreter requested an action id the driver cannot perform.
    UnsupportedAction(String),
}

impl Error for BrowserError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            BrowserError::DriverMissing(..) => None,
            BrowserError::DriverUnavailable(ref e) => Some(e),
            BrowserError::Standard(ref e) => Some(e),
            BrowserError::Failed(ref e) => Some(e),
            BrowserError::FailedC(ref e) => Some(e),
            BrowserError::Lost(ref e) => Some(e),
            BrowserError::Json(ref e) => Some(e),
            BrowserError::ImageDecode(ref e) => Some(e),
            BrowserError::BadUrl(ref e) => Some(e),
            BrowserError::NotJson(..)
            | BrowserError::NotW3C(..)
            | BrowserError::UnsupportedAction(..) => None,
        }
    }
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BrowserError::DriverMissing(ref bin) => {
                write!(f, "webdriver binary `{}` not found on PATH", bin)
            }
            BrowserError::DriverUnavailable(ref e) => {
                write!(f, "webdriver process did not become available: {}", e)
            }
            BrowserError::Standard(ref e) => write!(f, "webdriver returned error: {}", e),
            BrowserError::Failed(ref e) => write!(f, "webdriver could not be reached: {}", e),
            BrowserError::FailedC(ref e) => write!(f, "webdriver could not be reached: {}", e),
            BrowserError::Lost(ref e) => write!(f, "webdriver connection lost: {}", e),
            BrowserError::NotJson(ref e) => write!(f, "webdriver returned invalid response: {}", e),
            BrowserError::Json(ref e) => write!(f, "webdriver returned incoherent response: {}", e),
            BrowserError::NotW3C(ref e) => {
                write!(f, "webdriver returned non-conforming response: {:?}", e)
            }
            BrowserError::BadUrl(ref e) => write!(f, "bad url provided: {}", e),
            BrowserError::ImageDecode(ref e) => write!(f, "error decoding screenshot: {:?}", e),
            BrowserError::UnsupportedAction(ref id) => write!(f, "unsupported action: {}", id),
        }
    }
}

impl From<IOError> for BrowserError {
    fn from(e: IOError) -> Self {
        BrowserError::Lost(e)
    }
}

impl From<ParseError> for BrowserError {
    fn from(e: ParseError) -> Self {
        BrowserError::BadUrl(e)
    }
}

impl From<hyper::Error> for BrowserError {
    fn from(e: hyper::Error) -> Self {
        BrowserError::Failed(e)
    }
}

impl From<HCError> for BrowserError {
    fn from(e: HCError) -> Self {
        BrowserError::FailedC(e)
    }
}

impl From<serde_json::Error> for BrowserError {
    fn from(e: serde_json::Error) -> Self {
        BrowserError::Json(e)
    }
}

/// Error returned by the WebDriver endpoint.
#[derive(Debug)]
pub struct DriverFailure {
    /// Code of this error provided by WebDriver.
    pub error: ErrorStatus,

    /// Description of this error provided by WebDriver.
    pub message: String,
}

impl DriverFailure {
    /// Create a new WebDriver error struct.
    pub fn new(error: ErrorStatus, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl Error for DriverFailure {}

/// The error code returned from the WebDriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorStatus {
    /// The element receiving the click is obscuring the element that was requested clicked.
    ElementClickIntercepted,
    /// The element is not pointer- or keyboard-interactable.
    ElementNotInteractable,
    /// Navigation hit a certificate warning.
    InsecureCertificate,
    /// The arguments passed to a command are either invalid or malformed.
    InvalidArgument,
    /// An illegal attempt was made to set a cookie under a different domain
    /// than the current page.
    InvalidCookieDomain,
    /// The element is in an invalid state for the command.
    InvalidElementState,
    /// Argument was an invalid selector.
    InvalidSelector,
    /// The given session id is not in the list of active sessions.
    InvalidSessionId,
    /// An error occurred while executing JavaScript supplied by the user.
    JavascriptError,
    /// The target for mouse interaction is not in the viewport.
    MoveTargetOutOfBounds,
    /// No modal dialogue was open.
    NoSuchAlert,
    /// No cookie matching the given name was found.
    NoSuchCookie,
    /// An element could not be located on the page.
    NoSuchElement,
    /// The frame could not be found.
    NoSuchFrame,
    /// The window could not be found.
    NoSuchWindow,
    /// A script did not complete before its timeout expired.
    ScriptTimeout,
    /// A new session could not be created.
    SessionNotCreated,
    /// The referenced element is no longer attached to the DOM.
    StaleElementReference,
    /// An operation did not complete before its timeout expired.
    Timeout,
    /// A screen capture was made impossible.
    UnableToCaptureScreen,
    /// Setting the cookie's value could not be done.
    UnableToSetCookie,
    /// A modal dialogue was open, blocking this operation.
    UnexpectedAlertOpen,
    /// The requested command could not be executed because it does not exist.
    UnknownCommand,
    /// An unknown error occurred in the remote end.
    UnknownError,
    /// The command matched a known endpoint, but not a method for it.
    UnknownMethod,
    /// A command that should have executed properly is not currently supported.
    UnsupportedOperation,
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Error for ErrorStatus {}

// This macro implements conversions between the error string literal and the
// corresponding ErrorStatus variant.
macro_rules! define_error_strings {
    ($($variant:ident => $error_str:literal $(| $error_str_aliases:literal)*$(,)?),*) => {
        impl ErrorStatus {
            /// Get the error string associated with this `ErrorStatus`.
            pub fn description(&self) -> &'static str {
                use self::ErrorStatus::*;
                match self {
                    $(
                        $variant => $error_str,
                    )*
                }
            }
        }

        impl FromStr for ErrorStatus {
            type Err = BrowserError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                use self::ErrorStatus::*;
                let status: ErrorStatus = match s {
                    $(
                        $error_str$( | $error_str_aliases)* => $variant,
                    )*
                    _ => return Err(BrowserError::NotW3C(Json::String(s.to_string()))),
                };
                Ok(status)
            }
        }
    }
}

define_error_strings! {
    ElementClickIntercepted => "element click intercepted",
    ElementNotInteractable => "element not interactable" | "element not visible",
    InsecureCertificate => "insecure certificate",
    InvalidArgument => "invalid argument",
    InvalidCookieDomain => "invalid cookie domain",
    InvalidElementState => "invalid element state",
    InvalidSelector => "invalid selector",
    InvalidSessionId => "invalid session id",
    JavascriptError => "javascript error",
    MoveTargetOutOfBounds => "move target out of bounds",
    NoSuchAlert => "no such alert",
    NoSuchCookie => "no such cookie",
    NoSuchElement => "no such element",
    NoSuchFrame => "no such frame",
    NoSuchWindow => "no such window",
    ScriptTimeout => "script timeout",
    SessionNotCreated => "session not created",
    StaleElementReference => "stale element reference",
    Timeout => "timeout",
    UnableToCaptureScreen => "unable to capture screen",
    UnableToSetCookie => "unable to set cookie",
    UnexpectedAlertOpen => "unexpected alert open",
    UnknownCommand => "unknown command",
    UnknownError => "unknown error",
    UnknownMethod => "unknown method",
    UnsupportedOperation => "unsupported operation",
}

/// An error in the wire protocol spoken with the interpreter.
///
/// Protocol errors are fatal: the engine cannot know what the interpreter
/// believes the session state to be once framing or shape is off.
#[derive(Debug)]
pub enum ProtocolError {
    /// A line was not valid JSON.
    Json(serde_json::Error),

    /// A message carried a `tag` not in the protocol.
    UnknownTag(String),

    /// A message or nested payload had the wrong shape.
    BadShape(&'static str, Json),

    /// A well-formed message arrived that is not valid in the current state.
    UnexpectedMessage(String),

    /// A result trace did not alternate actions and states.
    MalformedTrace(&'static str),

    /// Reading from the interpreter failed.
    Io(IOError),
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            ProtocolError::Json(ref e) => Some(e),
            ProtocolError::Io(ref e) => Some(e),
            ProtocolError::UnknownTag(..)
            | ProtocolError::BadShape(..)
            | ProtocolError::UnexpectedMessage(..)
            | ProtocolError::MalformedTrace(..) => None,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Json(ref e) => write!(f, "interpreter sent invalid JSON: {}", e),
            ProtocolError::UnknownTag(ref tag) => {
                write!(f, "unsupported tagged JSON type: {}", tag)
            }
            ProtocolError::BadShape(expected, ref got) => {
                write!(f, "expected {} but got: {}", expected, got)
            }
            ProtocolError::UnexpectedMessage(ref msg) => {
                write!(f, "unexpected message: {}", msg)
            }
            ProtocolError::MalformedTrace(what) => write!(f, "malformed trace: {}", what),
            ProtocolError::Io(ref e) => write!(f, "interpreter stream error: {}", e),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e)
    }
}

impl From<IOError> for ProtocolError {
    fn from(e: IOError) -> Self {
        ProtocolError::Io(e)
    }
}

/// A configuration problem detected before any session starts.
#[derive(Debug)]
pub enum ConfigError {
    /// A required environment variable is not set.
    MissingEnvVar(&'static str),

    /// A browser-side script could not be read.
    ScriptUnreadable(PathBuf, IOError),

    /// The driver binary for the selected browser is not on `PATH`.
    DriverMissing(String),

    /// The origin is not a usable URL or names a file that does not exist.
    BadOrigin(String),
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            ConfigError::ScriptUnreadable(_, ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::MissingEnvVar(var) => {
                write!(f, "environment variable {} must be set", var)
            }
            ConfigError::ScriptUnreadable(ref path, ref e) => {
                write!(f, "cannot read client-side script {}: {}", path.display(), e)
            }
            ConfigError::DriverMissing(ref bin) => {
                write!(f, "webdriver binary `{}` not found on PATH", bin)
            }
            ConfigError::BadOrigin(ref origin) => write!(f, "invalid origin: {}", origin),
        }
    }
}

/// The error type of [`Check::execute`](crate::Check::execute).
///
/// Browser errors never appear here; they are contained at the session
/// boundary and reported as errored results instead.
#[derive(Debug)]
pub enum CheckError {
    /// The interpreter exited nonzero, or closed its stdout before sending `Done`.
    InterpreterFailed {
        /// The interpreter's exit code, if it exited by itself.
        exit_code: Option<i32>,
        /// Where the interpreter's stderr was logged.
        log_path: PathBuf,
    },

    /// The interpreter could not be spawned at all.
    InterpreterSpawn(IOError),

    /// The interpreter broke the wire protocol.
    Protocol(ProtocolError),

    /// The check was misconfigured.
    Config(ConfigError),

    /// An I/O error outside the wire protocol (log files, screenshots).
    Io(IOError),
}

impl Error for CheckError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            CheckError::InterpreterFailed { .. } => None,
            CheckError::InterpreterSpawn(ref e) => Some(e),
            CheckError::Protocol(ref e) => Some(e),
            CheckError::Config(ref e) => Some(e),
            CheckError::Io(ref e) => Some(e),
        }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CheckError::InterpreterFailed {
                exit_code,
                ref log_path,
            } => match exit_code {
                Some(code) => write!(
                    f,
                    "interpreter invocation failed, exit code {} (log: {})",
                    code,
                    log_path.display()
                ),
                None => write!(
                    f,
                    "interpreter terminated by signal (log: {})",
                    log_path.display()
                ),
            },
            CheckError::InterpreterSpawn(ref e) => {
                write!(f, "could not launch interpreter: {}", e)
            }
            CheckError::Protocol(ref e) => write!(f, "{}", e),
            CheckError::Config(ref e) => write!(f, "{}", e),
            CheckError::Io(ref e) => write!(f, "{}", e),
        }
    }
}

impl From<ProtocolError> for CheckError {
    fn from(e: ProtocolError) -> Self {
        CheckError::Protocol(e)
    }
}

impl From<ConfigError> for CheckError {
    fn from(e: ConfigError) -> Self {
        CheckError::Config(e)
    }
}

impl From<IOError> for CheckError {
    fn from(e: IOError) -> Self {
        CheckError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_display_error_doesnt_stackoverflow() {
        println!("{}", BrowserError::NotJson("test".to_string()));
        println!("{}", CheckError::Io(IOError::last_os_error()));
    }

    #[test]
    fn error_status_round_trips_through_description() {
        for status in [
            ErrorStatus::NoSuchElement,
            ErrorStatus::StaleElementReference,
            ErrorStatus::SessionNotCreated,
            ErrorStatus::JavascriptError,
        ] {
            assert_eq!(status.description().parse::<ErrorStatus>().unwrap(), status);
        }
    }
}
