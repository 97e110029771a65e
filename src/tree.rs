//! Trace tree construction and rendering.
//!
//! An error chain renders as a stack-trace-like listing; a multi-error join
//! splits it into a tree, drawn depth-first with children before their
//! parent's own frames:
//!
//! ```text
//!    +- error message 1
//!    |
//!    |  func5
//!    |  	path/to/file.rs:90
//!    |
//!    +- error message 2
//!    |
//! +- error message 3
//! |
//! error message 4
//!
//! func1
//! 	path/to/file.rs:12
//! ```

use std::io::{self, Write};

use crate::frame::{symbolize, Frame};
use crate::traced::{Inner, Traced};
use crate::Tracer as _;

/// An error and its traces as a tree.
///
/// `trace` holds the frames accumulated down to the first multi-error,
/// innermost call first; `children` holds one subtree per joined error, in
/// join order.
struct TraceTree<'a> {
    err: &'a Traced,
    trace: Vec<Frame>,
    children: Vec<TraceTree<'a>>,
}

fn build(err: &Traced) -> TraceTree<'_> {
    let mut current = TraceTree {
        err,
        trace: Vec::new(),
        children: Vec::new(),
    };

    let mut cursor = err;
    loop {
        // A PC of 0 or one that fails to symbolize contributes nothing; the
        // node is still walked through.
        current.trace.extend(symbolize(cursor.trace_pc()));

        match &cursor.node().inner {
            Inner::Chain(inner) => cursor = inner,
            Inner::Join(children) => {
                // A multi-error ends this tree node; everything below is a
                // child with its own trace.
                current.children = children.iter().map(build).collect();
                break;
            }
            // Terminal: a message, or a foreign error whose chain cannot
            // carry further annotations.
            Inner::Adopted(_) | Inner::Message(_) => break,
        }
    }

    // Frames were accumulated outermost-first while unwrapping; rendering
    // wants the deepest call first.
    current.trace.reverse();
    current
}

/// Writes the return trace for `err` to `w`.
///
/// All sink errors are collected and joined into the returned error; writing
/// continues past individual failures.
///
/// ## Example
///
/// ```rust
/// let err = retrace::msg("boom");
/// let mut out = Vec::new();
/// retrace::format(&mut out, &err).expect("vec sinks cannot fail");
/// assert!(out.starts_with(b"boom\n"));
/// ```
pub fn format<W: Write>(mut w: W, err: &Traced) -> crate::Result<()> {
    let mut writer = TreeWriter {
        w: &mut w,
        errs: Vec::new(),
    };
    writer.write_tree(&build(err), &mut Vec::new());
    if writer.errs.is_empty() {
        Ok(())
    } else {
        Err(crate::join(writer.errs))
    }
}

/// Renders the return trace for `err` into a string.
///
/// ## Example
///
/// ```rust
/// let err = retrace::wrap(retrace::msg("boom"));
/// let trace = retrace::format_string(&err);
/// assert!(trace.starts_with("boom\n"));
/// ```
pub fn format_string(err: &Traced) -> String {
    let mut out = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = format(&mut out, err);
    String::from_utf8_lossy(&out).into_owned()
}

struct TreeWriter<'w> {
    w: &'w mut dyn Write,
    errs: Vec<io::Error>,
}

impl TreeWriter<'_> {
    fn write_tree(&mut self, tree: &TraceTree<'_>, path: &mut Vec<usize>) {
        for (i, child) in tree.children.iter().enumerate() {
            path.push(i);
            self.write_tree(child, path);
            path.pop();
        }
        self.write_trace(tree.err, &tree.trace, path);
    }

    fn write_trace(&mut self, err: &Traced, trace: &[Frame], path: &[usize]) {
        // The message may contain newlines; each line gets its own prefix so
        // the pipes stay connected.
        for (i, line) in err.to_string().split('\n').enumerate() {
            self.pipes(path, if i == 0 { "+- " } else { "|  " });
            self.write_str(line);
            self.write_str("\n");
        }

        if !trace.is_empty() {
            // Empty line between the message and the trace.
            self.pipes(path, "|  ");
            self.write_str("\n");

            for frame in trace {
                self.pipes(path, "|  ");
                self.write_str(&frame.function);
                self.write_str("\n");

                self.pipes(path, "|  ");
                self.write_str(&format!("\t{}:{}\n", frame.file, frame.line));
            }
        }

        // Connecting "|" line between sibling traces.
        if !path.is_empty() {
            self.pipes(path, "|  ");
            self.write_str("\n");
        }
    }

    /// Draws the `|  |  ` prefix for the node at `path`, ending with `last`
    /// (normally `"|  "`, or `"+- "` on the first line of a message).
    ///
    /// A first child has nothing above it to connect to, so intermediate
    /// zero positions draw spaces instead of a pipe.
    fn pipes(&mut self, path: &[usize], last: &str) {
        for (depth, idx) in path.iter().enumerate() {
            if depth == path.len() - 1 {
                self.write_str(last);
            } else if *idx == 0 {
                self.write_str("   ");
            } else {
                self.write_str("|  ");
            }
        }
    }

    fn write_str(&mut self, s: &str) {
        if let Err(err) = self.w.write_all(s.as_bytes()) {
            self.errs.push(err);
        }
    }
}
