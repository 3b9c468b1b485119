//! Reporters over diffed results.
//!
//! Reporters run after the engine has returned and the results have been
//! diffed; they never feed back into the session protocol.

pub mod console;
pub mod html;
pub mod json;

use crate::diff::DiffedResult;
use crate::error::ConfigError;
use std::error::Error;
use std::fmt;
use std::io::Error as IOError;

/// A failure while rendering or writing a report.
#[derive(Debug)]
pub enum ReportError {
    /// Writing report output failed.
    Io(IOError),
    /// The reporter was misconfigured (e.g. missing assets directory).
    Config(ConfigError),
}

impl Error for ReportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReportError::Io(e) => Some(e),
            ReportError::Config(e) => Some(e),
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "could not write report: {}", e),
            ReportError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl From<IOError> for ReportError {
    fn from(e: IOError) -> Self {
        ReportError::Io(e)
    }
}

impl From<ConfigError> for ReportError {
    fn from(e: ConfigError) -> Self {
        ReportError::Config(e)
    }
}

/// Renders the diffed results of a check run.
pub trait Reporter {
    /// Report all results of one run.
    fn report(&mut self, results: &[DiffedResult]) -> Result<(), ReportError>;
}
