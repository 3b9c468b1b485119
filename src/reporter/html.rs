//! HTML report writer.
//!
//! Copies the static viewer assets into the report directory and writes the
//! run's results as `report.jsonp.js`, which the viewer loads via a script
//! tag. Screenshots land next to the assets, named by state hash.

use crate::diff::DiffedResult;
use crate::error::ConfigError;
use crate::reporter::json::encode_report;
use crate::reporter::{ReportError, Reporter};
use std::fs;
use std::path::PathBuf;

/// The environment variable naming the directory with the viewer's static
/// assets.
pub const HTML_REPORT_DIR_VAR: &str = "QUICKSTROM_HTML_REPORT_DIRECTORY";

/// Writes a self-contained HTML report directory.
#[derive(Debug)]
pub struct HtmlReporter {
    /// The directory the report is assembled in.
    pub directory: PathBuf,
}

impl Reporter for HtmlReporter {
    fn report(&mut self, results: &[DiffedResult]) -> Result<(), ReportError> {
        let assets_dir = std::env::var_os(HTML_REPORT_DIR_VAR)
            .ok_or(ConfigError::MissingEnvVar(HTML_REPORT_DIR_VAR))?;
        fs::create_dir_all(&self.directory)?;
        for entry in fs::read_dir(&assets_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), self.directory.join(entry.file_name()))?;
            }
        }
        let report = encode_report(results, Some(&self.directory))?;
        let rendered = format!(
            "window.report = {};\n",
            serde_json::to_string(&report).map_err(std::io::Error::from)?
        );
        fs::write(self.directory.join("report.jsonp.js"), rendered)?;
        Ok(())
    }
}
