//! Terminal reporter: prints failing traces with per-element diff markers.

use crate::diff::{Diff, DiffedResult, DiffedState};
use crate::protocol::{Action, ElementState};
use crate::reporter::{ReportError, Reporter};
use crate::result::{Test, TestResult};
use colored::Colorize;
use serde_json::Value as Json;
use std::io::Write;

// `ref` identifies the element and `position` is presentation-only; neither
// is listed as an attribute.
const HIDDEN_KEYS: [&str; 2] = ["ref", "position"];

/// Prints results to a terminal.
///
/// Failing traces are always printed in full; passing tests are summarized
/// unless `report_on_success` is set.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    /// Print full traces for passing tests too.
    pub report_on_success: bool,
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, results: &[DiffedResult]) -> Result<(), ReportError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for result in results {
            self.write_result(&mut out, result)?;
        }
        Ok(())
    }
}

impl ConsoleReporter {
    fn write_result(&self, out: &mut impl Write, result: &DiffedResult) -> std::io::Result<()> {
        match result {
            TestResult::Passed { passed } => {
                for test in passed {
                    if self.report_on_success {
                        write_test(out, test)?;
                    }
                    writeln!(out, "Result: {}", verdict(test).green())?;
                }
            }
            TestResult::Failed { passed, failed } => {
                for test in passed {
                    writeln!(out, "Result: {}", verdict(test).green())?;
                }
                write_test(out, failed)?;
                writeln!(out, "Result: {}", verdict(failed).red())?;
            }
            TestResult::Errored { error, tests } => {
                writeln!(
                    out,
                    "Result: {} ({} test(s) affected)",
                    format!("error: {}", error).red(),
                    tests
                )?;
            }
        }
        Ok(())
    }
}

fn verdict(test: &Test<DiffedState>) -> String {
    format!("{} {}", test.validity.certainty, test.validity.value)
}

fn write_test(out: &mut impl Write, test: &Test<DiffedState>) -> std::io::Result<()> {
    writeln!(out, "Trace:")?;
    let mut step = 0usize;
    for transition in &test.transitions {
        step += 1;
        write_actions(out, step, &transition.actions)?;
        step += 1;
        let heading = if transition.stutter {
            format!("{}. State (stutter)", step)
        } else {
            format!("{}. State", step)
        };
        writeln!(out, "{}", indent(&heading.bold().underline().to_string(), 1))?;
        write_state(out, &transition.to_state)?;
    }
    Ok(())
}

fn write_actions(out: &mut impl Write, step: usize, actions: &[Action]) -> std::io::Result<()> {
    for action in actions {
        let label = if action.is_event { "Event" } else { "Action" };
        let heading = format!("{}. {}: {}", step, label, action);
        writeln!(out, "{}", indent(&heading.bold().underline().to_string(), 1))?;
    }
    Ok(())
}

fn write_state(out: &mut impl Write, state: &DiffedState) -> std::io::Result<()> {
    for (selector, elements) in &state.queries {
        writeln!(out, "{}", indent(&format!("`{}`", selector).bold().to_string(), 2))?;
        for element in elements {
            write_element(out, element)?;
        }
    }
    Ok(())
}

fn write_element(out: &mut impl Write, element: &Diff<ElementState>) -> std::io::Result<()> {
    let heading = match element {
        Diff::Added(..) => "+ Element".green().to_string(),
        Diff::Removed(..) => "- Element".red().to_string(),
        Diff::Modified { .. } => "~ Element".blue().to_string(),
        Diff::Unmodified(..) => "* Element".to_string(),
    };
    let suffix = element
        .new_value()
        .get("ref")
        .and_then(Json::as_str)
        .map(|r| format!(" ({})", r))
        .unwrap_or_default();
    writeln!(out, "{}{}", indent(&heading, 3), suffix)?;

    match element {
        Diff::Added(el) => write_attributes(out, el, |v| show(v).green().to_string()),
        Diff::Removed(el) => write_attributes(out, el, |v| show(v).red().to_string()),
        Diff::Unmodified(el) => write_attributes(out, el, |v| show(v).dimmed().to_string()),
        Diff::Modified { old, new } => {
            for (key, new_value) in visible_attributes(new) {
                let rendered = match old.get(key) {
                    Some(old_value) if old_value == new_value => {
                        show(new_value).dimmed().to_string()
                    }
                    Some(old_value) => format!("{} -> {}", show(old_value), show(new_value))
                        .blue()
                        .to_string(),
                    None => show(new_value).green().to_string(),
                };
                writeln!(out, "{}", indent(&format!("* {}: {}", key, rendered), 4))?;
            }
            for (key, old_value) in visible_attributes(old) {
                if !new.contains_key(key) {
                    let rendered = show(old_value).red().to_string();
                    writeln!(out, "{}", indent(&format!("* {}: {}", key, rendered), 4))?;
                }
            }
            Ok(())
        }
    }
}

fn write_attributes(
    out: &mut impl Write,
    element: &ElementState,
    style: impl Fn(&Json) -> String,
) -> std::io::Result<()> {
    for (key, value) in visible_attributes(element) {
        writeln!(out, "{}", indent(&format!("* {}: {}", key, style(value)), 4))?;
    }
    Ok(())
}

fn visible_attributes(element: &ElementState) -> impl Iterator<Item = (&String, &Json)> {
    element
        .iter()
        .filter(|(key, _)| !HIDDEN_KEYS.contains(&key.as_str()))
}

fn show(value: &Json) -> String {
    value.to_string()
}

fn indent(s: &str, level: usize) -> String {
    format!("{}{}", " ".repeat(level * 2), s)
}
