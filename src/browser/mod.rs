//! The browser capability consumed by the session engine.
//!
//! The engine only ever touches a browser through [`BrowserControl`] and
//! [`BrowserSession`]; everything driver-specific (waits, key synthesis,
//! action encoding) stays behind [`BrowserSession::perform`]. The live
//! implementation over a spawned WebDriver process is in [`webdriver`];
//! tests substitute scripted implementations.

pub mod key;
pub mod webdriver;

use crate::error::BrowserError;
use crate::protocol::Action;
use crate::result::Screenshot;
use serde_json::Value as Json;
use std::fmt;
use std::str::FromStr;

/// The browsers a check can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    /// Chrome or Chromium, driven through `chromedriver`.
    Chrome,
    /// Firefox, driven through `geckodriver`.
    Firefox,
}

impl Browser {
    /// The driver binary that must be on `PATH` for this browser.
    pub fn driver_binary(&self) -> &'static str {
        match self {
            Browser::Chrome => "chromedriver",
            Browser::Firefox => "geckodriver",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Browser::Chrome => f.write_str("chrome"),
            Browser::Firefox => f.write_str("firefox"),
        }
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chrome" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            other => Err(format!("unsupported browser: {}", other)),
        }
    }
}

/// A cookie to install before a session's checks begin.
///
/// Cookies can only be set once a first navigation has established a
/// document origin; the engine navigates, applies cookies, then navigates
/// again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// The domain the cookie applies to.
    pub domain: String,
    /// The cookie name.
    pub name: String,
    /// The cookie value.
    pub value: String,
}

/// Opens browser sessions.
#[allow(async_fn_in_trait)]
pub trait BrowserControl {
    /// The session type this control hands out.
    type Session: BrowserSession;

    /// Open a new headless session of the given browser.
    ///
    /// Fails with [`BrowserError::DriverMissing`] if the driver binary is
    /// not on `PATH`.
    async fn open(&self, browser: Browser) -> Result<Self::Session, BrowserError>;
}

/// One live browser session.
///
/// All operations are driver round-trips and may fail with a
/// [`BrowserError`]; the engine treats any such failure as fatal to the
/// session but not to the process.
#[allow(async_fn_in_trait)]
pub trait BrowserSession {
    /// Navigate to the given URL. Synchronous and idempotent.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Install the given cookies for the current document origin.
    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError>;

    /// Resize the viewport to the given CSS-pixel dimensions.
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BrowserError>;

    /// Perform a primitive user action (`click`, `doubleClick`, `focus`,
    /// `keyPress`).
    ///
    /// Unknown action ids fail with [`BrowserError::UnsupportedAction`].
    async fn perform(&mut self, action: &Action) -> Result<(), BrowserError>;

    /// Execute an asynchronous script in the page, returning its raw result.
    async fn execute_async(&mut self, script: &str, args: Vec<Json>)
        -> Result<Json, BrowserError>;

    /// Take a PNG screenshot of the page.
    async fn screenshot(&mut self) -> Result<Screenshot, BrowserError>;

    /// Tear the session down.
    ///
    /// Safe to call more than once; the engine calls it on every exit path.
    async fn close(&mut self) -> Result<(), BrowserError>;
}
