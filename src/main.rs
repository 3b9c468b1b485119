//! The `quickstrom` command-line interface.

use clap::{ArgAction, Args, Parser, Subcommand};
use quickstrom::browser::Cookie;
use quickstrom::diff::diff_result;
use quickstrom::error::CheckError;
use quickstrom::reporter::console::ConsoleReporter;
use quickstrom::reporter::html::HtmlReporter;
use quickstrom::reporter::json::JsonReporter;
use quickstrom::reporter::Reporter;
use quickstrom::{Browser, Check};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "quickstrom", version, about = "Property-based acceptance testing for web applications")]
struct Cli {
    /// Log level (error|warn|info|debug|trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// When to color terminal output
    #[arg(long, global = true, default_value = "auto", value_parser = ["auto", "always", "no"])]
    color: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Checks the configured properties in the given module.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// The specification module to check
    module: String,

    /// The URL or local file of the app under test
    origin: String,

    /// The browser to drive
    #[arg(short = 'B', long, default_value = "firefox")]
    browser: Browser,

    /// Include a path in the interpreter's module search paths
    #[arg(short = 'I', long = "include", value_name = "PATH")]
    include: Vec<PathBuf>,

    /// Capture a screenshot at each distinct state
    #[arg(short = 'S', long = "capture-screenshots")]
    capture_screenshots: bool,

    /// Reporters to run (console|json|html)
    #[arg(long = "reporter", value_name = "NAME")]
    reporters: Vec<String>,

    /// Where the JSON reporter writes its document
    #[arg(long, value_name = "PATH", default_value = "report.json")]
    json_report_file: PathBuf,

    /// Where the JSON reporter writes screenshot files
    #[arg(long, value_name = "PATH")]
    json_report_files_directory: Option<PathBuf>,

    /// Where the HTML reporter assembles its report
    #[arg(long, value_name = "PATH", default_value = "html-report")]
    html_report_directory: PathBuf,

    /// A cookie to install before checking, as DOMAIN NAME VALUE
    #[arg(
        long = "cookie",
        num_args = 3,
        value_names = ["DOMAIN", "NAME", "VALUE"],
        action = ArgAction::Append
    )]
    cookie: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.color.as_str() {
        "always" => colored::control::set_override(true),
        "no" => colored::control::set_override(false),
        _ => {}
    }

    let code = match cli.command {
        Command::Check(args) => run_check(args).await,
    };
    std::process::exit(code);
}

async fn run_check(args: CheckArgs) -> i32 {
    let origin = match resolve_origin(&args.origin) {
        Ok(origin) => origin,
        Err(message) => {
            eprintln!("{}", message);
            return 1;
        }
    };

    let mut check = Check::new(args.module, origin);
    check.browser = args.browser;
    check.include_paths = args.include;
    check.capture_screenshots = args.capture_screenshots;
    check.cookies = args
        .cookie
        .chunks(3)
        .map(|chunk| Cookie {
            domain: chunk[0].clone(),
            name: chunk[1].clone(),
            value: chunk[2].clone(),
        })
        .collect();

    let results = tokio::select! {
        results = check.execute() => match results {
            Ok(results) => results,
            Err(err) => {
                eprintln!("{}", err);
                if let CheckError::InterpreterFailed { log_path, .. } = &err {
                    eprintln!("See interpreter log file for details: {}", log_path.display());
                    return 2;
                }
                return 1;
            }
        },
        // Ctrl-C terminates immediately; child processes are reaped on drop
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            return 1;
        }
    };

    let any_errored = results.iter().any(|r| r.is_errored());
    let any_failed = results.iter().any(|r| r.is_failed());
    let diffed: Vec<_> = results.into_iter().map(diff_result).collect();

    let names = if args.reporters.is_empty() {
        vec!["console".to_string()]
    } else {
        args.reporters.clone()
    };
    for name in names {
        let mut reporter: Box<dyn Reporter> = match name.as_str() {
            "console" => Box::new(ConsoleReporter::default()),
            "json" => Box::new(JsonReporter {
                path: args.json_report_file.clone(),
                files_directory: args.json_report_files_directory.clone(),
            }),
            "html" => Box::new(HtmlReporter {
                directory: args.html_report_directory.clone(),
            }),
            other => {
                eprintln!("unknown reporter: {}", other);
                return 1;
            }
        };
        if let Err(e) = reporter.report(&diffed) {
            eprintln!("{}", e);
            return 1;
        }
    }

    if any_errored {
        1
    } else if any_failed {
        3
    } else {
        0
    }
}

/// Resolve the origin argument to a URL, treating bare paths as local files
/// that must exist.
fn resolve_origin(origin: &str) -> Result<String, String> {
    match Url::parse(origin) {
        Ok(url) => {
            if url.scheme() == "file" && !Path::new(url.path()).is_file() {
                Err(format!("File does not exist: {}", origin))
            } else {
                Ok(url.to_string())
            }
        }
        Err(_) => {
            let path = std::fs::canonicalize(origin)
                .map_err(|_| format!("File does not exist: {}", origin))?;
            let url = Url::from_file_path(&path)
                .map_err(|_| format!("Invalid origin: {}", origin))?;
            Ok(url.to_string())
        }
    }
}
