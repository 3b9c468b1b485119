//! The driver side of property-based acceptance testing for web
//! applications.
//!
//! A check run mediates between an external specification interpreter,
//! which proposes actions and judges traces, and a live browser driven
//! over the WebDriver protocol. For each session the interpreter starts,
//! the driver launches a headless browser, loads the origin, observes
//! states and user-visible events, performs the requested actions against
//! the *current* observed state, and finally surfaces the interpreter's
//! verdicts as structured results for the reporters to render.
//!
//! The moving parts, leaves first:
//!
//! - [`protocol`] frames and parses the tagged line-delimited JSON
//!   messages exchanged with the interpreter subprocess.
//! - [`scripts`] loads and invokes the three pre-built browser-side
//!   scripts (query state, install event listener, await events).
//! - [`browser`] is the narrow capability the engine drives a browser
//!   through; [`browser::webdriver`] implements it over a spawned
//!   `geckodriver`/`chromedriver` process.
//! - [`executor`] runs one interpreter process end-to-end, guarding every
//!   action against stale state versions.
//! - [`result`], [`diff`], and [`hash`] form the trace model: hashed
//!   observed states, transitions, and structural per-element diffs.
//! - [`reporter`] renders diffed results to the console, JSON, or HTML.
//!
//! # Examples
//!
//! ```no_run
//! use quickstrom::{diff_result, Browser, Check};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quickstrom::error::CheckError> {
//!     let mut check = Check::new("todomvc", "https://todomvc.com/examples/react/");
//!     check.browser = Browser::Firefox;
//!     let results = check.execute().await?;
//!     for result in results {
//!         let diffed = diff_result(result);
//!         println!("{:?}", diffed);
//!     }
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

pub mod browser;
pub mod diff;
pub mod error;
pub mod executor;
pub mod hash;
pub mod protocol;
pub mod reporter;
pub mod result;
pub mod scripts;

pub use crate::browser::Browser;
pub use crate::diff::{diff_result, DiffedResult};
pub use crate::executor::Check;
pub use crate::result::CheckedResult;
