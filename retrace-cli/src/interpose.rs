//! Compile-time interposition: `retrace` as a `RUSTC_WRAPPER`.
//!
//! Cargo invokes the wrapper as `retrace /path/to/rustc <args…>` for every
//! compiler call, including the `-vV` probe it fingerprints build caches
//! with. The wrapper:
//!
//! - answers the version probe with the real compiler's output plus a suffix
//!   identifying this wrapper and a hash of its rewriting options, so caches
//!   invalidate when either changes;
//! - passes through everything that is not an eligible compile;
//! - for eligible compiles, mirrors the crate's source tree into a temp
//!   directory, rewrites the files that need annotation, and re-execs the
//!   real compiler against the mirror with `--remap-path-prefix` pointing
//!   diagnostics and locations back at the original files. Edits never add
//!   or remove lines, so positions stay accurate.
//!
//! Options come from the environment (`RETRACE_REQUIRED_PACKAGES`,
//! `RETRACE_UNSAFE_PACKAGES`, `RETRACE_NO_WRAPN`) because cargo does not
//! pass arguments to a wrapper; the same flags work on the command line for
//! direct invocations.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::rewrite::{parse_file, RewriteOpts};
use crate::Diagnostics;

/// Packages that must never be rewritten: rewriting the library itself (or
/// this tool) would recurse into the calls the rewrite inserts.
const OWN_PACKAGES: &[&str] = &["retrace", "retrace-cli"];

/// Prefix for unsafe standard-library rewriting, which needs an explicit
/// opt-in because error identity checks inside std can break under wrapping.
const STD_UNSAFE_SELECTOR: &str = "std-unsafe";

#[derive(Clone, Default)]
pub struct InterposeOpts {
    pub required_packages: Vec<String>,
    pub unsafe_packages: Vec<String>,
    pub no_wrapn: bool,
}

impl InterposeOpts {
    pub fn from_env() -> InterposeOpts {
        fn selectors(var: &str) -> Vec<String> {
            env::var(var)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        }

        InterposeOpts {
            required_packages: selectors("RETRACE_REQUIRED_PACKAGES"),
            unsafe_packages: selectors("RETRACE_UNSAFE_PACKAGES"),
            no_wrapn: env::var_os("RETRACE_NO_WRAPN").is_some(),
        }
    }

    /// A stable digest of every option that affects generated code. Tool
    /// arguments are deliberately excluded.
    fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "required={:?};unsafe={:?};no_wrapn={}",
            self.required_packages, self.unsafe_packages, self.no_wrapn
        ));
        let digest = hasher.finalize();
        let mut out = String::with_capacity(16);
        for byte in &digest[..8] {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    fn required_package(&self, pkg: &str) -> bool {
        self.required_packages
            .iter()
            .any(|sel| selector_match(sel, pkg))
    }

    fn unsafe_rewrite(&self, pkg: &str) -> bool {
        !OWN_PACKAGES.contains(&pkg)
            && self
                .unsafe_packages
                .iter()
                .any(|sel| sel != STD_UNSAFE_SELECTOR && selector_match(sel, pkg))
    }

    fn unsafe_rewrite_std(&self) -> bool {
        self.unsafe_packages.iter().any(|s| s == STD_UNSAFE_SELECTOR)
    }
}

/// A selector is an exact package name or a `prefix*` wildcard matching the
/// prefix itself and anything longer.
pub fn selector_match(selector: &str, pkg: &str) -> bool {
    match selector.strip_suffix('*') {
        Some(prefix) => pkg.starts_with(prefix),
        None => selector == pkg,
    }
}

/// Handles an interposed invocation if the arguments look like one.
///
/// Returns `None` when this is not interpose mode (no rustc path among the
/// arguments, no version probe, no cargo package environment), in which case
/// the caller proceeds with batch mode.
pub fn try_run(args: &[OsString], diags: &mut Diagnostics) -> Option<i32> {
    let rustc_idx = args.iter().position(|arg| is_rustc_path(arg))?;
    let tool = args[rustc_idx].clone();
    let tool_args: Vec<OsString> = args[rustc_idx + 1..].to_vec();

    let version_probe = tool_args
        .iter()
        .any(|arg| arg == "-vV" || arg == "-V" || arg == "--version")
        && root_source(&tool_args).is_none();
    let pkg = env::var("CARGO_PKG_NAME").ok();

    if !version_probe && pkg.is_none() {
        return None;
    }

    let opts = InterposeOpts::from_env();
    if version_probe {
        return Some(run_version_probe(&tool, &tool_args, &opts, diags));
    }

    let pkg = pkg.unwrap_or_default();
    match rewrite_compile(&tool, &tool_args, &pkg, &opts, diags) {
        Ok(code) => Some(code),
        Err(err) => {
            diags.error(&format!("retrace: {err}"));
            Some(1)
        }
    }
}

fn is_rustc_path(arg: &OsString) -> bool {
    let path = Path::new(arg);
    let stem_is_rustc = path
        .file_stem()
        .map(|stem| stem == "rustc")
        .unwrap_or(false);
    let extension_ok = match path.extension() {
        None => true,
        Some(ext) => ext == "exe",
    };
    stem_is_rustc && extension_ok
}

/// The single `.rs` input of a compile invocation, if any.
fn root_source(tool_args: &[OsString]) -> Option<PathBuf> {
    tool_args.iter().find_map(|arg| {
        let s = arg.to_string_lossy();
        if !s.starts_with('-') && s.ends_with(".rs") {
            Some(PathBuf::from(arg))
        } else {
            None
        }
    })
}

fn flag_value<'a>(tool_args: &'a [OsString], flag: &str) -> Option<&'a OsString> {
    tool_args
        .iter()
        .position(|arg| arg == flag)
        .and_then(|i| tool_args.get(i + 1))
}

// ============================================================================
// Version probe
// ============================================================================

/// Proxies the version probe, suffixing the first output line with this
/// wrapper's identity and option hash so build caching sees rewrites as part
/// of the compiler version.
fn run_version_probe(
    tool: &OsString,
    tool_args: &[OsString],
    opts: &InterposeOpts,
    diags: &mut Diagnostics,
) -> i32 {
    let output = match Command::new(tool).args(tool_args).output() {
        Ok(output) => output,
        Err(err) => {
            diags.error(&format!("retrace: tool {} failed: {err}", tool.to_string_lossy()));
            return 1;
        }
    };
    eprint!("{}", String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return output.status.code().unwrap_or(1);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let suffix = format!("-retrace-{}{}", binary_version(), opts.cache_key());
    for (i, line) in stdout.lines().enumerate() {
        if i == 0 {
            println!("{line}{suffix}");
        } else {
            println!("{line}");
        }
    }
    0
}

/// Identity of this wrapper binary: a digest of the executable when
/// readable (so locally rebuilt wrappers invalidate caches), else the crate
/// version.
fn binary_version() -> String {
    let hashed = env::current_exe()
        .and_then(fs::read)
        .map(|bytes| {
            let digest = Sha256::digest(&bytes);
            digest[..6]
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<String>()
        })
        .ok();
    hashed.unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned())
}

// ============================================================================
// Compile rewriting
// ============================================================================

fn rewrite_compile(
    tool: &OsString,
    tool_args: &[OsString],
    pkg: &str,
    opts: &InterposeOpts,
    diags: &mut Diagnostics,
) -> retrace::Result<i32> {
    let Some(root) = root_source(tool_args) else {
        // Not a compile step (metadata query, linker call, …).
        return Ok(run_original(tool, tool_args, diags));
    };

    let crate_name = flag_value(tool_args, "--crate-name")
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or_default();

    if crate_name.starts_with("build_script_") || OWN_PACKAGES.contains(&pkg) {
        debug!(pkg, %crate_name, "pass-through: builtin or own package");
        return Ok(run_original(tool, tool_args, diags));
    }

    if is_std_source(&root) && !opts.unsafe_rewrite_std() {
        debug!(pkg, "pass-through: standard library");
        return Ok(run_original(tool, tool_args, diags));
    }

    let root_dir = root.parent().unwrap_or(Path::new(".")).to_path_buf();
    let sources = collect_sources(&root_dir)?;

    let rewrite_opts = RewriteOpts {
        no_wrapn: opts.no_wrapn,
    };

    let mut rewritten: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut any_uses_lib = false;
    for path in &sources {
        let src = fs::read_to_string(path)?;
        let parsed = parse_file(&path.to_string_lossy(), &src, &rewrite_opts)
            .map_err(|err| retrace::errorf!("{}:{err}", path.display()))?;
        any_uses_lib |= parsed.uses_lib;
        for line in &parsed.unused_markers {
            diags.warn(&format!("{}:{line}:unused retrace:skip", path.display()));
        }
        if parsed.changed() {
            rewritten.insert(path.clone(), parsed.rewrite());
        }
    }

    if rewritten.is_empty() {
        debug!(pkg, "pass-through: no file needs edits");
        return Ok(run_original(tool, tool_args, diags));
    }

    // Eligibility: the crate must already depend on the library, unless an
    // unsafe selector lets us inject the dependency ourselves.
    let mut extra_args: Vec<OsString> = Vec::new();
    if !has_retrace_extern(tool_args) {
        if opts.unsafe_rewrite(pkg) {
            match find_retrace_rlib(tool_args) {
                Some(rlib) => {
                    extra_args.push(OsString::from("--extern"));
                    let mut value = OsString::from("retrace=");
                    value.push(&rlib);
                    extra_args.push(value);
                    debug!(pkg, rlib = %rlib.display(), "unsafe rewrite: injecting extern");
                }
                None => {
                    diags.warn(&format!(
                        "retrace: unsafe package {pkg} has no compiled retrace rlib in its search paths; not rewriting"
                    ));
                    return Ok(run_original(tool, tool_args, diags));
                }
            }
        } else if opts.required_package(pkg) {
            diags.error(&format!(
                "retrace: required package {pkg} does not depend on retrace, needs rewrite"
            ));
            return Ok(1);
        } else {
            debug!(pkg, uses_lib = any_uses_lib, "pass-through: package does not depend on retrace");
            return Ok(run_original(tool, tool_args, diags));
        }
    }

    // Module resolution is relative to the crate root file, so the whole
    // root directory is mirrored; the temp directory is removed on every
    // exit path when it drops.
    let temp = tempfile::Builder::new().prefix("retrace-").tempdir()?;
    mirror_dir(&root_dir, temp.path(), &root_dir, &rewritten)?;

    let new_root = temp.path().join(root.strip_prefix(&root_dir).unwrap_or(&root));
    let mut new_args: Vec<OsString> = Vec::with_capacity(tool_args.len() + 3);
    for arg in tool_args {
        if arg.as_os_str() == root.as_os_str() {
            new_args.push(new_root.clone().into_os_string());
        } else {
            new_args.push(arg.clone());
        }
    }
    let mut remap = OsString::from("--remap-path-prefix");
    remap.push("=");
    remap.push(temp.path());
    remap.push("=");
    remap.push(&root_dir);
    new_args.push(remap);
    new_args.extend(extra_args);

    debug!(pkg, files = rewritten.len(), "compiling rewritten sources");
    Ok(run_original(tool, &new_args, diags))
}

fn has_retrace_extern(tool_args: &[OsString]) -> bool {
    let mut iter = tool_args.iter().peekable();
    while let Some(arg) = iter.next() {
        let s = arg.to_string_lossy();
        let value = if s == "--extern" {
            match iter.peek() {
                Some(next) => next.to_string_lossy().into_owned(),
                None => continue,
            }
        } else if let Some(rest) = s.strip_prefix("--extern=") {
            rest.to_owned()
        } else {
            continue;
        };
        if value == "retrace" || value.starts_with("retrace=") {
            return true;
        }
    }
    false
}

/// Library search directories of the invocation, for unsafe-mode injection.
fn lib_search_dirs(tool_args: &[OsString]) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut iter = tool_args.iter().peekable();
    while let Some(arg) = iter.next() {
        let s = arg.to_string_lossy();
        let value = if s == "-L" {
            match iter.peek() {
                Some(next) => next.to_string_lossy().into_owned(),
                None => continue,
            }
        } else if let Some(rest) = s.strip_prefix("-L") {
            rest.to_owned()
        } else {
            continue;
        };
        let path = value
            .split_once('=')
            .map(|(_, path)| path.to_owned())
            .unwrap_or(value);
        dirs.push(PathBuf::from(path));
    }
    dirs
}

fn find_retrace_rlib(tool_args: &[OsString]) -> Option<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for dir in lib_search_dirs(tool_args) {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("libretrace-") || !name.ends_with(".rlib") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                newest = Some((modified, entry.path()));
            }
        }
    }
    newest.map(|(_, path)| path)
}

fn is_std_source(root: &Path) -> bool {
    root.to_string_lossy().contains("rustlib/src")
}

/// All `.rs` files under `dir`, sorted, skipping build output and VCS
/// directories.
pub fn collect_sources(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if entry.file_type()?.is_dir() {
                if name == "target" || name.starts_with('.') {
                    continue;
                }
                stack.push(path);
            } else if name.ends_with(".rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Mirrors `dir` into `dst`, substituting rewritten file contents.
fn mirror_dir(
    dir: &Path,
    dst_root: &Path,
    src_root: &Path,
    rewritten: &BTreeMap<PathBuf, String>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let relative = path.strip_prefix(src_root).unwrap_or(&path);
        let target = dst_root.join(relative);
        if entry.file_type()?.is_dir() {
            if name == "target" || name.starts_with('.') {
                continue;
            }
            fs::create_dir_all(&target)?;
            mirror_dir(&path, dst_root, src_root, rewritten)?;
        } else if let Some(contents) = rewritten.get(&path) {
            fs::write(&target, contents)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

fn run_original(tool: &OsString, tool_args: &[OsString], diags: &mut Diagnostics) -> i32 {
    match Command::new(tool).args(tool_args).status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => {
            diags.error(&format!(
                "retrace: tool {} failed: {err}",
                tool.to_string_lossy()
            ));
            1
        }
    }
}
