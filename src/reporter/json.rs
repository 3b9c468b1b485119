//! JSON report serializer.
//!
//! Writes one report document per run: a `generatedAt` timestamp plus every
//! diffed result. Screenshots, when present, are written as PNG files named
//! by their state hash into the configured files directory and referenced by
//! path from the document.

use crate::diff::{Diff, DiffedResult, DiffedState};
use crate::protocol::ElementState;
use crate::reporter::{ReportError, Reporter};
use crate::result::{Screenshot, Test, TestResult, Transition};
use serde_json::{json, Value as Json};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Writes the run's results as a JSON document.
#[derive(Debug)]
pub struct JsonReporter {
    /// Where the report document is written.
    pub path: PathBuf,
    /// Where screenshot files are written, if anywhere.
    pub files_directory: Option<PathBuf>,
}

impl Reporter for JsonReporter {
    fn report(&mut self, results: &[DiffedResult]) -> Result<(), ReportError> {
        let report = encode_report(results, self.files_directory.as_deref())?;
        let rendered = serde_json::to_string_pretty(&report).map_err(io::Error::from)?;
        fs::write(&self.path, rendered)?;
        Ok(())
    }
}

/// Encode a full report document, writing screenshots alongside.
pub(crate) fn encode_report(
    results: &[DiffedResult],
    files_directory: Option<&Path>,
) -> Result<Json, ReportError> {
    if let Some(dir) = files_directory {
        fs::create_dir_all(dir)?;
    }
    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut encoded = Vec::with_capacity(results.len());
    for result in results {
        encoded.push(encode_result(result, files_directory)?);
    }
    Ok(json!({
        "generatedAt": generated_at,
        "results": encoded,
    }))
}

fn encode_result(
    result: &DiffedResult,
    files: Option<&Path>,
) -> Result<Json, ReportError> {
    Ok(match result {
        TestResult::Passed { passed } => json!({
            "tag": "Passed",
            "passedTests": encode_tests(passed, files)?,
        }),
        TestResult::Failed { passed, failed } => json!({
            "tag": "Failed",
            "passedTests": encode_tests(passed, files)?,
            "failedTest": encode_test(failed, files)?,
        }),
        TestResult::Errored { error, tests } => json!({
            "tag": "Errored",
            "error": error,
            "tests": tests,
        }),
    })
}

fn encode_tests(
    tests: &[Test<DiffedState>],
    files: Option<&Path>,
) -> Result<Vec<Json>, ReportError> {
    let mut encoded = Vec::with_capacity(tests.len());
    for test in tests {
        encoded.push(encode_test(test, files)?);
    }
    Ok(encoded)
}

fn encode_test(test: &Test<DiffedState>, files: Option<&Path>) -> Result<Json, ReportError> {
    let mut transitions = Vec::with_capacity(test.transitions.len());
    for transition in &test.transitions {
        transitions.push(encode_transition(transition, files)?);
    }
    Ok(json!({
        "validity": test.validity,
        "transitions": transitions,
    }))
}

fn encode_transition(
    transition: &Transition<DiffedState>,
    files: Option<&Path>,
) -> Result<Json, ReportError> {
    let from_state = match &transition.from_state {
        Some(state) => encode_state(state, files)?,
        None => Json::Null,
    };
    Ok(json!({
        "fromState": from_state,
        "toState": encode_state(&transition.to_state, files)?,
        "actions": transition.actions,
        "stutter": transition.stutter,
    }))
}

fn encode_state(state: &DiffedState, files: Option<&Path>) -> Result<Json, ReportError> {
    let mut queries = serde_json::Map::new();
    for (selector, elements) in &state.queries {
        queries.insert(
            selector.clone(),
            Json::Array(elements.iter().map(encode_diff).collect()),
        );
    }
    let screenshot = match &state.screenshot {
        Some(shot) => encode_screenshot(shot, &state.hash, files)?,
        None => Json::Null,
    };
    Ok(json!({
        "hash": state.hash,
        "queries": queries,
        "screenshot": screenshot,
    }))
}

fn encode_diff(diff: &Diff<ElementState>) -> Json {
    match diff {
        Diff::Added(el) => json!({ "tag": "Added", "element": el }),
        Diff::Removed(el) => json!({ "tag": "Removed", "element": el }),
        Diff::Modified { old, new } => json!({ "tag": "Modified", "old": old, "new": new }),
        Diff::Unmodified(el) => json!({ "tag": "Unmodified", "element": el }),
    }
}

fn encode_screenshot(
    screenshot: &Screenshot,
    hash: &str,
    files: Option<&Path>,
) -> Result<Json, ReportError> {
    let file = match files {
        Some(dir) => {
            let path = dir.join(format!("{}.png", hash));
            if !path.exists() {
                fs::write(&path, &screenshot.image)?;
            }
            Json::String(path.to_string_lossy().into_owned())
        }
        None => Json::Null,
    };
    Ok(json!({
        "file": file,
        "width": screenshot.width,
        "height": screenshot.height,
        "scale": screenshot.scale,
    }))
}
