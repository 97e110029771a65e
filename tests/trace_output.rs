//! End-to-end rendering scenarios.
//!
//! Symbolized traces carry environment-specific paths and line numbers, so
//! every assertion goes through [`clean`], which reduces file paths to their
//! basename and renumbers lines to the smallest values that keep their
//! relative order.

use std::collections::{BTreeMap, BTreeSet};

use regex::{Captures, Regex};
use retrace::{msg, wrap, Traced};

/// Normalizes `path/to/file.rs:123` occurrences for deterministic
/// comparison: basename only, lines renumbered per file in ascending order.
fn clean(trace: &str) -> String {
    let file_line = Regex::new(r"([^\s:]+\.rs):(\d+)").unwrap();

    let mut lines: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    for caps in file_line.captures_iter(trace) {
        let file = basename(&caps[1]);
        let line: u32 = caps[2].parse().unwrap();
        lines.entry(file).or_default().insert(line);
    }

    let numbering: BTreeMap<(String, u32), usize> = lines
        .into_iter()
        .flat_map(|(file, lines)| {
            lines
                .into_iter()
                .enumerate()
                .map(move |(i, line)| ((file.clone(), line), i + 1))
        })
        .collect();

    file_line
        .replace_all(trace, |caps: &Captures<'_>| {
            let file = basename(&caps[1]);
            let line: u32 = caps[2].parse().unwrap();
            let renumbered = numbering[&(file.clone(), line)];
            format!("{file}:{renumbered}")
        })
        .into_owned()
}

fn basename(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap().to_owned()
}

// ============================================================================
// Scenario: single chain
// ============================================================================

#[inline(never)]
fn f3() -> Traced {
    msg("failed")
}

#[inline(never)]
fn f2() -> Traced {
    wrap(f3())
}

#[inline(never)]
fn f1() -> Traced {
    wrap(f2())
}

#[test]
fn single_chain_renders_innermost_first() {
    let rendered = clean(&retrace::format_string(&f1()));
    assert_eq!(
        rendered,
        "failed\n\
         \n\
         trace_output::f3\n\
         \ttrace_output.rs:1\n\
         trace_output::f2\n\
         \ttrace_output.rs:2\n\
         trace_output::f1\n\
         \ttrace_output.rs:3\n"
    );
}

// ============================================================================
// Scenario: multi-error fan-in
// ============================================================================

#[inline(never)]
fn make_boom() -> Traced {
    let inner = msg("boom");
    wrap(inner)
}

#[inline(never)]
fn make_crash() -> Traced {
    let inner = msg("crash");
    wrap(inner)
}

#[inline(never)]
fn join_two() -> Traced {
    wrap(retrace::join([make_boom(), make_crash()]))
}

#[test]
fn join_renders_children_before_the_shared_trace() {
    let rendered = clean(&retrace::format_string(&join_two()));
    assert_eq!(
        rendered,
        "+- boom\n\
         |  \n\
         |  trace_output::make_boom\n\
         |  \ttrace_output.rs:1\n\
         |  trace_output::make_boom\n\
         |  \ttrace_output.rs:2\n\
         |  \n\
         +- crash\n\
         |  \n\
         |  trace_output::make_crash\n\
         |  \ttrace_output.rs:3\n\
         |  trace_output::make_crash\n\
         |  \ttrace_output.rs:4\n\
         |  \n\
         boom\n\
         crash\n\
         \n\
         trace_output::join_two\n\
         \ttrace_output.rs:5\n"
    );
}

#[test]
fn nested_join_inlines_as_a_deeper_branch() {
    let err = wrap(retrace::join([
        make_boom(),
        make_crash(),
        retrace::join([make_boom(), make_crash()]),
    ]));
    let rendered = clean(&retrace::format_string(&err));

    // Outer children in order, inner join's children one level deeper.
    let boom = rendered.find("+- boom").expect("first child");
    let crash = rendered.find("+- crash").expect("second child");
    let nested_boom = rendered.find("|  +- boom").expect("nested first child");
    let nested_crash = rendered.find("|  +- crash").expect("nested second child");
    assert!(boom < crash, "children must render in join order:\n{rendered}");
    assert!(crash < nested_boom, "nested join renders after its siblings:\n{rendered}");
    assert!(nested_boom < nested_crash, "nested children keep their order:\n{rendered}");

    // The nested join has no frames of its own: its message lines render
    // under the pipe art with nothing else.
    assert!(
        rendered.contains("+- boom\n|  crash\n"),
        "frameless join node still shows up:\n{rendered}"
    );
}

// ============================================================================
// Scenario: messages with embedded newlines
// ============================================================================

#[test]
fn multiline_messages_split_into_prefixed_lines() {
    let err = wrap(retrace::join([msg("first line\nsecond line")]));
    let rendered = retrace::format_string(&err);
    assert!(
        rendered.contains("+- first line\n|  second line\n"),
        "each message line needs its own pipe prefix:\n{rendered}"
    );
}

// ============================================================================
// Formatting through a failing sink
// ============================================================================

struct FailingSink {
    failures: usize,
}

impl std::io::Write for FailingSink {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        self.failures += 1;
        Err(std::io::Error::new(std::io::ErrorKind::Other, "sink closed"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn sink_errors_are_aggregated_not_fatal() {
    let mut sink = FailingSink { failures: 0 };
    let err = f1();
    let result = retrace::format(&mut sink, &err);
    let joined = result.unwrap_err();
    // Every write failed, and every failure is in the joined error.
    assert!(sink.failures > 1, "rendering should keep writing past failures");
    assert_eq!(joined.to_string().lines().count(), sink.failures);
}
