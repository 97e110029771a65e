//! Symbolization of captured program counters.

use std::ffi::c_void;
use std::fmt;

/// A single frame in a return trace: one site where an error was wrapped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Fully qualified function name, demangled, without the trailing hash.
    pub function: String,
    /// File the function is defined in; empty when debug info is missing.
    pub file: String,
    /// Line of the wrap site; 0 when debug info is missing.
    pub line: u32,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.function, self.file, self.line)
    }
}

/// Expands one PC into its frames, innermost inlined function first.
///
/// A PC of 0 (capture failure) and a PC without symbols both yield no
/// frames; the annotation node is then a pass-through.
pub(crate) fn symbolize(pc: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    if pc == 0 {
        return frames;
    }
    // The captured PC is a return address; symbolize the call instruction
    // just before it so the frame points at the wrap line, not the next one.
    backtrace::resolve((pc - 1) as *mut c_void, |symbol| {
        let Some(name) = symbol.name() else {
            return;
        };
        frames.push(Frame {
            function: format!("{name:#}"),
            file: symbol
                .filename()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            line: symbol.lineno().unwrap_or(0),
        });
    });
    frames
}

/// The innermost frame for a PC, if it symbolizes.
pub(crate) fn symbolize_first(pc: usize) -> Option<Frame> {
    symbolize(pc).into_iter().next()
}
