//! `retrace` instruments Rust code with error return tracing.
//!
//! # Usage
//!
//! ```text
//! retrace [options] <source files | package selectors>
//! ```
//!
//! Transformed source is written to stdout; with no arguments, input is read
//! from stdin (like a formatter). Package selectors resolve through
//! `cargo metadata`: an exact package name, a `prefix*` wildcard, or `.` for
//! every workspace package.
//!
//! Options:
//!
//! - `-w, --write` rewrite the files in place instead of printing.
//! - `-l, --list` list the files that would change; no writes.
//! - `--format {auto,always,never}` post-format through `rustfmt`;
//!   `auto` (the default) formats only when writing in place.
//! - `--no-wrapn` rewrite tuple returns with a block temporary instead of
//!   `.trace_last()`.
//!
//! # Compile-time interposition
//!
//! Installed as a `RUSTC_WRAPPER`, the same binary rewrites compiles
//! transparently:
//!
//! ```text
//! RUSTC_WRAPPER=retrace cargo build
//! ```
//!
//! See the `interpose` module for the wrapper protocol and its
//! `RETRACE_REQUIRED_PACKAGES` / `RETRACE_UNSAFE_PACKAGES` environment
//! options.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::{self, Command, Stdio};

use clap::{Parser, ValueEnum};
use retrace::ResultExt as _;
use serde::Deserialize;

mod interpose;
mod markers;
mod rewrite;

use rewrite::RewriteOpts;

fn main() {
    init_tracing();

    let args: Vec<OsString> = env::args_os().skip(1).collect();
    let mut diags = Diagnostics;

    if let Some(code) = interpose::try_run(&args, &mut diags) {
        process::exit(code);
    }

    let params = Params::parse();
    process::exit(run_batch(&params, &mut diags));
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RETRACE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

/// User-facing diagnostics; exit codes are decided by the callers.
pub struct Diagnostics;

impl Diagnostics {
    pub fn warn(&mut self, message: &str) {
        eprintln!("{message}");
    }

    pub fn error(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

#[derive(Parser)]
#[command(name = "retrace", version, about = "Instrument Rust code with error return tracing")]
struct Params {
    /// Source files, `-` for stdin, or cargo package selectors.
    patterns: Vec<String>,

    /// Write results back to the input files instead of stdout.
    #[arg(short = 'w', long)]
    write: bool,

    /// List files that would be modified, without changing anything.
    #[arg(short = 'l', long)]
    list: bool,

    /// Whether to post-format output with rustfmt; auto formats only with
    /// --write.
    #[arg(long, value_enum, default_value = "auto")]
    format: FormatMode,

    /// Rewrite tuple returns with a block temporary instead of
    /// `.trace_last()`.
    #[arg(long = "no-wrapn", env = "RETRACE_NO_WRAPN")]
    no_wrapn: bool,

    /// Interpose mode: package selectors that must already depend on
    /// retrace; a matching compile without the dependency fails the build.
    #[arg(long, env = "RETRACE_REQUIRED_PACKAGES")]
    required_packages: Option<String>,

    /// Interpose mode: package selectors to rewrite even without a retrace
    /// dependency, by injecting one from the build's library search path.
    #[arg(long, env = "RETRACE_UNSAFE_PACKAGES")]
    unsafe_packages: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatMode {
    Auto,
    Always,
    Never,
}

impl Params {
    fn should_format(&self) -> bool {
        match self.format {
            FormatMode::Auto => self.write,
            FormatMode::Always => true,
            FormatMode::Never => false,
        }
    }
}

struct FileRequest {
    /// Name shown to the user.
    display: String,
    /// Actual location, `-` for stdin.
    path: String,
    implicit_stdin: bool,
}

fn run_batch(params: &Params, diags: &mut Diagnostics) -> i32 {
    if params.required_packages.is_some() || params.unsafe_packages.is_some() {
        diags.warn(
            "retrace: --required-packages and --unsafe-packages only apply in rustc-wrapper mode",
        );
    }

    let requests = match expand_patterns(&params.patterns, diags) {
        Ok(requests) => requests,
        Err(err) => {
            diags.error(&format!("retrace: {err}"));
            return 1;
        }
    };

    let opts = RewriteOpts {
        no_wrapn: params.no_wrapn,
    };

    let mut exit = 0;
    for request in requests {
        if let Err(err) = process_file(&request, params, &opts, diags) {
            diags.error(&format!("{}:{err}", request.display));
            exit = 1;
        }
    }
    exit
}

/// Turns arguments into concrete file requests: existing files pass through,
/// `-` is stdin, anything else resolves as a package selector.
fn expand_patterns(patterns: &[String], diags: &mut Diagnostics) -> retrace::Result<Vec<FileRequest>> {
    let cwd = env::current_dir().map(|d| format!("{}/", d.display())).unwrap_or_default();
    let display_of = |path: &str| -> String {
        path.strip_prefix(&cwd).unwrap_or(path).to_owned()
    };

    if patterns.is_empty() {
        return Ok(vec![FileRequest {
            display: "stdin".to_owned(),
            path: "-".to_owned(),
            implicit_stdin: true,
        }]);
    }

    let mut requests = Vec::new();
    let mut selectors = Vec::new();
    for pattern in patterns {
        if pattern == "-" {
            requests.push(FileRequest {
                display: "stdin".to_owned(),
                path: "-".to_owned(),
                implicit_stdin: false,
            });
        } else if fs::metadata(pattern).map(|m| m.is_file()).unwrap_or(false) {
            requests.push(FileRequest {
                display: display_of(pattern),
                path: pattern.clone(),
                implicit_stdin: false,
            });
        } else {
            selectors.push(pattern.clone());
        }
    }

    if !selectors.is_empty() {
        for path in package_files(&selectors, diags).trace()? {
            let path = path.to_string_lossy().into_owned();
            requests.push(FileRequest {
                display: display_of(&path),
                path,
                implicit_stdin: false,
            });
        }
    }

    Ok(requests)
}

// ============================================================================
// cargo metadata package resolution
// ============================================================================

#[derive(Deserialize)]
struct Metadata {
    packages: Vec<Package>,
}

#[derive(Deserialize)]
struct Package {
    name: String,
    targets: Vec<Target>,
}

#[derive(Deserialize)]
struct Target {
    src_path: PathBuf,
}

/// Resolves package selectors to the `.rs` files of their targets, asking
/// `cargo metadata` for the file set.
fn package_files(selectors: &[String], diags: &mut Diagnostics) -> retrace::Result<Vec<PathBuf>> {
    let output = Command::new("cargo")
        .args(["metadata", "--no-deps", "--format-version", "1"])
        .stderr(Stdio::inherit())
        .output()?;
    if !output.status.success() {
        return Err(retrace::msg("cargo metadata failed"));
    }

    let metadata: Metadata = serde_json::from_slice(&output.stdout)
        .map_err(|err| retrace::errorf!("cargo metadata output malformed: {err}"))?;

    let matches_any = |name: &str| {
        selectors
            .iter()
            .any(|sel| sel == "." || sel == "./..." || interpose::selector_match(sel, name))
    };

    let mut files = BTreeSet::new();
    let mut matched = false;
    for package in &metadata.packages {
        if !matches_any(&package.name) {
            continue;
        }
        matched = true;
        let mut dirs = BTreeSet::new();
        for target in &package.targets {
            if let Some(dir) = target.src_path.parent() {
                dirs.insert(dir.to_path_buf());
            }
        }
        for dir in dirs {
            files.extend(interpose::collect_sources(&dir)?);
        }
    }

    if !matched {
        diags.warn(&format!("retrace: no packages match {}", selectors.join(", ")));
    }
    Ok(files.into_iter().collect())
}

// ============================================================================
// Per-file processing
// ============================================================================

fn process_file(
    request: &FileRequest,
    params: &Params,
    opts: &RewriteOpts,
    diags: &mut Diagnostics,
) -> retrace::Result<()> {
    let src = read_source(request, params).trace()?;

    let parsed = rewrite::parse_file(&request.display, &src, opts).trace()?;

    for line in &parsed.unused_markers {
        diags.warn(&format!("{}:{line}:unused retrace:skip", request.display));
    }
    for diag in &parsed.diagnostics {
        diags.warn(&format!("{}:{diag}", request.display));
    }

    if params.list {
        if parsed.changed() {
            println!("{}", request.display);
        }
        return Ok(());
    }

    let mut out = parsed.rewrite();
    if params.should_format() {
        out = rustfmt(&out).trace()?;
    }

    if params.write {
        if parsed.changed() {
            fs::write(&request.path, out)?;
        }
    } else {
        io::stdout().write_all(out.as_bytes())?;
    }
    Ok(())
}

fn read_source(request: &FileRequest, params: &Params) -> retrace::Result<String> {
    if request.path != "-" {
        return Ok(fs::read_to_string(&request.path)?);
    }

    if params.write {
        return Err(retrace::msg("can't use --write with stdin"));
    }
    if request.implicit_stdin && io::stdin().is_terminal() {
        eprintln!("reading from stdin; use '--help' for help");
    }

    let mut src = String::new();
    io::stdin().read_to_string(&mut src)?;
    Ok(src)
}


/// Post-formats through the canonical formatter.
fn rustfmt(src: &str) -> retrace::Result<String> {
    let mut child = Command::new("rustfmt")
        .args(["--edition", "2021"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|err| retrace::errorf!("format: {err}"))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| retrace::msg("format: no stdin handle"))?;
    let input = src.to_owned();
    // Feed stdin from a separate thread so a large file can't deadlock
    // against rustfmt's output pipe.
    let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

    let output = child.wait_with_output()?;
    let _ = writer.join();
    if !output.status.success() {
        return Err(retrace::msg("format: rustfmt failed"));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
