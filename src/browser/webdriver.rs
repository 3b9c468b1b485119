//! The live [`BrowserControl`] implementation over a spawned WebDriver
//! process.
//!
//! [`WdBrowser::open`] locates the driver binary on `PATH`, spawns it on an
//! ephemeral port, waits for its `/status` endpoint, and performs the W3C
//! NewSession handshake with headless capabilities. Commands are issued as
//! plain HTTP requests against the driver, with responses unwrapped from
//! their `{"value": ...}` envelope and error bodies mapped to
//! [`ErrorStatus`].

use crate::browser::key::key_text;
use crate::browser::{Browser, BrowserControl, BrowserSession, Cookie};
use crate::error::{BrowserError, DriverFailure, ErrorStatus};
use crate::protocol::Action;
use crate::result::Screenshot;
use base64::Engine;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Method;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use url::Url;
use webdriver::actions as WDActions;
use webdriver::capabilities::{Capabilities, SpecNewSessionParameters};
use webdriver::command::{
    ActionsParameters, AddCookieParameters, GetParameters, JavascriptCommandParameters,
    NewSessionParameters, SendKeysParameters, WebDriverCommand, WindowRectParameters,
};
use webdriver::common::{WebElement, ELEMENT_KEY};

type Wcmd = WebDriverCommand<webdriver::command::VoidWebDriverExtensionCommand>;

const MOUSE_BUTTON_LEFT: u64 = 0;

/// How long to wait for a freshly spawned driver to start serving `/status`.
const DRIVER_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Wrapper for serializing AddCookieParameters under the `cookie` key the
/// AddCookie endpoint expects.
#[derive(Debug, Serialize)]
struct AddCookieParametersWrapper<'a> {
    #[serde(with = "AddCookieParameters")]
    cookie: &'a AddCookieParameters,
}

/// Opens live WebDriver-backed browser sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct WdBrowser;

impl WdBrowser {
    /// Create a new opener.
    pub fn new() -> Self {
        WdBrowser
    }
}

impl BrowserControl for WdBrowser {
    type Session = WdSession;

    async fn open(&self, browser: Browser) -> Result<WdSession, BrowserError> {
        let binary = find_executable(browser.driver_binary())
            .ok_or_else(|| BrowserError::DriverMissing(browser.driver_binary().to_string()))?;
        let port = free_port().map_err(BrowserError::DriverUnavailable)?;

        let mut cmd = Command::new(&binary);
        match browser {
            // the two drivers spell their port flag differently
            Browser::Firefox => {
                cmd.arg("--port").arg(port.to_string());
            }
            Browser::Chrome => {
                cmd.arg(format!("--port={}", port));
            }
        }
        let driver = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(BrowserError::DriverUnavailable)?;

        let wdb: Url = format!("http://127.0.0.1:{}/", port)
            .parse()
            .expect("driver url is always valid");
        let client = HttpClient::builder(TokioExecutor::new()).build_http();

        let mut session = WdSession {
            client,
            wdb,
            session_id: None,
            driver,
            viewport: None,
        };
        session.wait_until_ready().await?;

        let caps = capabilities_for(browser);
        let params = NewSessionParameters::Spec(SpecNewSessionParameters {
            alwaysMatch: caps,
            firstMatch: vec![Capabilities::new()],
        });
        let value = session.issue(WebDriverCommand::NewSession(params)).await?;
        let session_id = match value.get("sessionId").and_then(Json::as_str) {
            Some(id) => id.to_string(),
            None => return Err(BrowserError::NotW3C(value)),
        };
        session.session_id = Some(session_id);
        Ok(session)
    }
}

/// A live browser session tied to one driver process.
#[derive(Debug)]
pub struct WdSession {
    client: HttpClient<HttpConnector, Full<Bytes>>,
    wdb: Url,
    session_id: Option<String>,
    driver: Child,
    viewport: Option<(u32, u32)>,
}

impl WdSession {
    /// Poll the driver's `/status` endpoint until it responds.
    async fn wait_until_ready(&mut self) -> Result<(), BrowserError> {
        let url = self.wdb.join("status")?;
        let deadline = tokio::time::Instant::now() + DRIVER_READY_TIMEOUT;
        loop {
            let req = hyper::Request::builder()
                .method(Method::GET)
                .uri(url.as_str())
                .body(Full::new(Bytes::new()))
                .expect("status request is always valid");
            if self.client.request(req).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::DriverUnavailable(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "driver did not start serving /status",
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Helper for determining what URL endpoint to use for various requests.
    ///
    /// This mapping is that of <https://www.w3.org/TR/webdriver/#list-of-endpoints>,
    /// restricted to the commands this driver actually issues.
    fn endpoint_for(&self, cmd: &Wcmd) -> Result<Url, BrowserError> {
        if let WebDriverCommand::NewSession(..) = *cmd {
            return Ok(self.wdb.join("session")?);
        }

        let session_id = self.session_id.as_deref().ok_or_else(|| {
            BrowserError::Lost(io::Error::new(
                io::ErrorKind::NotConnected,
                "no WebDriver session established",
            ))
        })?;
        if let WebDriverCommand::DeleteSession = *cmd {
            return Ok(self.wdb.join(&format!("session/{}", session_id))?);
        }

        let base = self.wdb.join(&format!("session/{}/", session_id))?;
        let url = match *cmd {
            WebDriverCommand::Get(..) => base.join("url"),
            WebDriverCommand::AddCookie(..) => base.join("cookie"),
            WebDriverCommand::SetWindowRect(..) => base.join("window/rect"),
            WebDriverCommand::TakeScreenshot => base.join("screenshot"),
            WebDriverCommand::ExecuteAsyncScript(..) => base.join("execute/async"),
            WebDriverCommand::GetActiveElement => base.join("element/active"),
            WebDriverCommand::ElementClick(ref we) => {
                base.join(&format!("element/{}/click", we.0))
            }
            WebDriverCommand::ElementSendKeys(ref we, _) => {
                base.join(&format!("element/{}/value", we.0))
            }
            WebDriverCommand::PerformActions(..) => base.join("actions"),
            WebDriverCommand::ReleaseActions => base.join("actions"),
            _ => unimplemented!("unused WebDriver command: {:?}", cmd),
        };
        Ok(url?)
    }

    /// Issue a WebDriver command and parse the response.
    ///
    /// Most commands are POSTs whose body is the serialized parameter type;
    /// the response's `value` field is returned, with error responses mapped
    /// through [`ErrorStatus`].
    async fn issue(&mut self, cmd: Wcmd) -> Result<Json, BrowserError> {
        let url = self.endpoint_for(&cmd)?;
        let mut method = Method::GET;
        let mut body = None;

        match cmd {
            WebDriverCommand::NewSession(NewSessionParameters::Spec(ref conf)) => {
                body = Some(format!(
                    r#"{{"capabilities": {}}}"#,
                    serde_json::to_string(conf)?
                ));
                method = Method::POST;
            }
            WebDriverCommand::NewSession(NewSessionParameters::Legacy(..)) => {
                unimplemented!("legacy WebDriver sessions are not supported")
            }
            WebDriverCommand::DeleteSession => {
                method = Method::DELETE;
            }
            WebDriverCommand::Get(ref params) => {
                body = Some(serde_json::to_string(params)?);
                method = Method::POST;
            }
            WebDriverCommand::AddCookie(ref params) => {
                body = Some(serde_json::to_string(&AddCookieParametersWrapper {
                    cookie: params,
                })?);
                method = Method::POST;
            }
            WebDriverCommand::SetWindowRect(ref params) => {
                body = Some(serde_json::to_string(params)?);
                method = Method::POST;
            }
            WebDriverCommand::ExecuteAsyncScript(ref script) => {
                body = Some(serde_json::to_string(script)?);
                method = Method::POST;
            }
            WebDriverCommand::ElementSendKeys(_, ref keys) => {
                body = Some(serde_json::to_string(keys)?);
                method = Method::POST;
            }
            WebDriverCommand::PerformActions(ref params) => {
                body = Some(serde_json::to_string(params)?);
                method = Method::POST;
            }
            WebDriverCommand::ElementClick(..) => {
                body = Some("{}".to_string());
                method = Method::POST;
            }
            WebDriverCommand::ReleaseActions => {
                method = Method::DELETE;
            }
            _ => {}
        }

        let mut req = hyper::Request::builder().method(method).uri(url.as_str());
        let req = if let Some(body) = body {
            req = req.header(
                http::header::CONTENT_TYPE,
                mime::APPLICATION_JSON.as_ref(),
            );
            req = req.header(http::header::CONTENT_LENGTH, body.len());
            req.body(Full::new(Bytes::from(body)))
                .expect("request is always valid")
        } else {
            req.body(Full::new(Bytes::new()))
                .expect("request is always valid")
        };

        let res = self.client.request(req).await?;
        let status = res.status();
        let ctype = res
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|ctype| ctype.to_str().ok()?.parse::<mime::Mime>().ok());
        let bytes = res.into_body().collect().await?.to_bytes();
        let body = String::from_utf8(bytes.to_vec())
            .map_err(|e| BrowserError::NotJson(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;

        match ctype {
            Some(ref ctype)
                if ctype.type_() == mime::APPLICATION_JSON.type_()
                    && ctype.subtype() == mime::APPLICATION_JSON.subtype() => {}
            _ => return Err(BrowserError::NotJson(body)),
        }

        let value = match serde_json::from_str(&body)? {
            Json::Object(mut v) => v
                .remove("value")
                .ok_or(BrowserError::NotW3C(Json::Object(v)))?,
            v => return Err(BrowserError::NotW3C(v)),
        };

        if status.is_success() {
            return Ok(value);
        }

        // https://www.w3.org/TR/webdriver/#handling-errors
        let body = match value {
            Json::Object(o) => o,
            j => return Err(BrowserError::NotW3C(j)),
        };
        let error = match body.get("error").and_then(Json::as_str) {
            Some(error) => error.parse::<ErrorStatus>()?,
            None => return Err(BrowserError::NotW3C(Json::Object(body))),
        };
        let message = body
            .get("message")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();
        Err(BrowserError::Standard(DriverFailure::new(error, message)))
    }

    /// Extract the `WebElement` from a command that returns one.
    fn parse_lookup(&self, res: Json) -> Result<WebElement, BrowserError> {
        let mut res = match res {
            Json::Object(o) => o,
            res => return Err(BrowserError::NotW3C(res)),
        };
        match res.remove(ELEMENT_KEY) {
            Some(Json::String(wei)) => Ok(WebElement(wei)),
            Some(v) => {
                res.insert(ELEMENT_KEY.to_string(), v);
                Err(BrowserError::NotW3C(Json::Object(res)))
            }
            None => Err(BrowserError::NotW3C(Json::Object(res))),
        }
    }

    fn element_arg(&self, action: &Action) -> Result<WebElement, BrowserError> {
        match action.args.first().and_then(Json::as_str) {
            Some(element_ref) => Ok(WebElement(element_ref.to_string())),
            None => Err(BrowserError::Standard(DriverFailure::new(
                ErrorStatus::InvalidArgument,
                format!("action {} requires an element reference argument", action.id),
            ))),
        }
    }

    async fn active_element(&mut self) -> Result<WebElement, BrowserError> {
        let res = self.issue(WebDriverCommand::GetActiveElement).await?;
        self.parse_lookup(res)
    }
}

impl BrowserSession for WdSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.issue(WebDriverCommand::Get(GetParameters {
            url: url.to_string(),
        }))
        .await?;
        Ok(())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        for cookie in cookies {
            let params = AddCookieParameters {
                name: cookie.name.clone(),
                value: cookie.value.clone(),
                path: None,
                domain: Some(cookie.domain.clone()),
                expiry: None,
                secure: false,
                httpOnly: false,
                sameSite: None,
            };
            self.issue(WebDriverCommand::AddCookie(params)).await?;
        }
        Ok(())
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BrowserError> {
        self.issue(WebDriverCommand::SetWindowRect(WindowRectParameters {
            x: None,
            y: None,
            width: Some(width as i32),
            height: Some(height as i32),
        }))
        .await?;
        self.viewport = Some((width, height));
        Ok(())
    }

    async fn perform(&mut self, action: &Action) -> Result<(), BrowserError> {
        match action.id.as_str() {
            "click" => {
                let element = self.element_arg(action)?;
                self.issue(WebDriverCommand::ElementClick(element)).await?;
            }
            "doubleClick" => {
                let element = self.element_arg(action)?;
                let params = ActionsParameters {
                    actions: vec![double_click_sequence(element)],
                };
                self.issue(WebDriverCommand::PerformActions(params)).await?;
                self.issue(WebDriverCommand::ReleaseActions).await?;
            }
            "focus" => {
                // sending an empty key sequence transfers focus without input
                let element = self.element_arg(action)?;
                self.issue(WebDriverCommand::ElementSendKeys(
                    element,
                    SendKeysParameters {
                        text: String::new(),
                    },
                ))
                .await?;
            }
            "keyPress" => {
                let arg = match action.args.first().and_then(Json::as_str) {
                    Some(arg) => arg.to_string(),
                    None => {
                        return Err(BrowserError::Standard(DriverFailure::new(
                            ErrorStatus::InvalidArgument,
                            "keyPress requires a character or key name argument",
                        )))
                    }
                };
                let text = key_text(&arg)
                    .ok_or_else(|| BrowserError::UnsupportedAction(format!("keyPress({:?})", arg)))?;
                let active = self.active_element().await?;
                self.issue(WebDriverCommand::ElementSendKeys(
                    active,
                    SendKeysParameters { text },
                ))
                .await?;
            }
            other => return Err(BrowserError::UnsupportedAction(other.to_string())),
        }
        Ok(())
    }

    async fn execute_async(
        &mut self,
        script: &str,
        args: Vec<Json>,
    ) -> Result<Json, BrowserError> {
        let cmd = JavascriptCommandParameters {
            script: script.to_string(),
            args: Some(args),
        };
        self.issue(WebDriverCommand::ExecuteAsyncScript(cmd)).await
    }

    async fn screenshot(&mut self) -> Result<Screenshot, BrowserError> {
        let src = self.issue(WebDriverCommand::TakeScreenshot).await?;
        let image = match src.as_str() {
            Some(src) => base64::engine::general_purpose::STANDARD
                .decode(src)
                .map_err(BrowserError::ImageDecode)?,
            None => return Err(BrowserError::NotW3C(src)),
        };
        let (width, height) = png_dimensions(&image).ok_or_else(|| {
            BrowserError::Standard(DriverFailure::new(
                ErrorStatus::UnableToCaptureScreen,
                "screenshot is not a PNG",
            ))
        })?;
        let scale = match self.viewport {
            Some((vw, _)) if vw > 0 => ((width as f64 / vw as f64).round() as u32).max(1),
            _ => 1,
        };
        Ok(Screenshot {
            image,
            width: width as u64,
            height: height as u64,
            scale,
        })
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = if self.session_id.is_some() {
            let r = self.issue(WebDriverCommand::DeleteSession).await;
            self.session_id = None;
            r.map(|_| ())
        } else {
            Ok(())
        };
        // reap the driver even if the session delete failed
        let _ = self.driver.kill().await;
        result
    }
}

fn double_click_sequence(element: WebElement) -> WDActions::ActionSequence {
    let mut actions = vec![WDActions::PointerActionItem::Pointer(
        WDActions::PointerAction::Move(WDActions::PointerMoveAction {
            duration: None,
            origin: WDActions::PointerOrigin::Element(element),
            x: 0,
            y: 0,
            ..Default::default()
        }),
    )];
    for _ in 0..2 {
        actions.push(WDActions::PointerActionItem::Pointer(
            WDActions::PointerAction::Down(WDActions::PointerDownAction {
                button: MOUSE_BUTTON_LEFT,
                ..Default::default()
            }),
        ));
        actions.push(WDActions::PointerActionItem::Pointer(
            WDActions::PointerAction::Up(WDActions::PointerUpAction {
                button: MOUSE_BUTTON_LEFT,
                ..Default::default()
            }),
        ));
    }
    WDActions::ActionSequence {
        id: "pointer".to_string(),
        actions: WDActions::ActionsType::Pointer {
            parameters: WDActions::PointerActionParameters {
                pointer_type: WDActions::PointerType::Mouse,
            },
            actions,
        },
    }
}

fn capabilities_for(browser: Browser) -> Capabilities {
    let mut caps = Capabilities::new();
    // we want the browser to wait for the page to load
    caps.insert("pageLoadStrategy".to_string(), Json::from("normal"));
    match browser {
        Browser::Firefox => {
            caps.insert(
                "moz:firefoxOptions".to_string(),
                json!({ "args": ["--headless"] }),
            );
        }
        Browser::Chrome => {
            let mut opts = json!({
                "args": ["--headless", "--disable-gpu", "--no-sandbox", "--disable-dev-shm-usage"],
                // make chrome comply with w3c
                "w3c": true,
            });
            if let Some(binary) = find_chrome_binary() {
                opts["binary"] = Json::from(binary);
            }
            caps.insert("goog:chromeOptions".to_string(), opts);
        }
    }
    caps
}

fn find_chrome_binary() -> Option<String> {
    ["chrome", "chromium", "chromium-browser", "google-chrome"]
        .iter()
        .find_map(|name| find_executable(name))
        .map(|path| path.to_string_lossy().into_owned())
}

fn free_port() -> io::Result<u16> {
    // bind to an ephemeral port and immediately release it for the driver
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Check whether the driver binary for the given browser is on `PATH`,
/// without spawning anything.
///
/// Used as a preflight so a missing driver is reported before the
/// interpreter is launched.
pub fn driver_available(browser: Browser) -> bool {
    find_executable(browser.driver_binary()).is_some()
}

fn png_dimensions(image: &[u8]) -> Option<(u32, u32)> {
    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    if image.len() < 24 || image[..8] != PNG_SIGNATURE || &image[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(image[16..20].try_into().unwrap());
    let height = u32::from_be_bytes(image[20..24].try_into().unwrap());
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_dimensions_reads_the_ihdr() {
        let mut png = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        png.extend_from_slice(&13u32.to_be_bytes());
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&1200u32.to_be_bytes());
        png.extend_from_slice(&600u32.to_be_bytes());
        assert_eq!(png_dimensions(&png), Some((1200, 600)));
    }

    #[test]
    fn png_dimensions_rejects_other_formats() {
        assert_eq!(png_dimensions(b"GIF89a"), None);
        assert_eq!(png_dimensions(&[]), None);
    }

    #[test]
    fn double_click_is_a_move_and_two_click_pairs() {
        let seq = double_click_sequence(WebElement("abc".to_string()));
        match seq.actions {
            WDActions::ActionsType::Pointer { actions, .. } => assert_eq!(actions.len(), 5),
            _ => panic!("expected a pointer sequence"),
        }
    }
}
