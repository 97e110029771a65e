//! # retrace - Return traces for errors
//!
//! A return trace is not a stack trace: instead of a snapshot of the call
//! stack at the moment an error was created, it records the path the error
//! took as it was *returned*, through every annotated return point and
//! across thread and task boundaries, until something finally handled it.
//!
//! ## Design Goals
//!
//! - **One machine word per frame**: each annotation captures a single
//!   program counter; symbolization to function/file/line happens only when
//!   a trace is rendered.
//! - **Zero cost on the Ok path**: [`ResultExt::trace`] on `Ok` neither
//!   captures nor allocates.
//! - **Batched allocation**: annotation nodes come from a slab arena, not
//!   one `Box` per wrap.
//! - **Mechanical adoption**: the companion `retrace` rewriter inserts the
//!   wrap calls for you, as a formatter or transparently at compile time.
//!
//! ## Quick Start
//!
//! ```rust
//! use retrace::{msg, Result, ResultExt};
//!
//! fn read_config() -> Result<()> {
//!     Err(msg("config not found"))
//! }
//!
//! fn init() -> Result<()> {
//!     read_config().trace()?;
//!     Ok(())
//! }
//!
//! let err = init().unwrap_err();
//! assert_eq!(err.to_string(), "config not found");
//!
//! // Each annotated return point is one frame, innermost first.
//! let trace = retrace::format_string(&err);
//! assert!(trace.starts_with("config not found\n"));
//! ```
//!
//! ## Adopting Foreign Errors
//!
//! `Traced` does not implement `std::error::Error`; in exchange, any error
//! type converts into it through `?`, and the conversion site itself becomes
//! the first frame of the trace:
//!
//! ```rust
//! use retrace::Result;
//!
//! fn parse(input: &str) -> Result<i32> {
//!     let n: i32 = input.parse()?; // adoption site, recorded
//!     Ok(n)
//! }
//!
//! let err = parse("x").unwrap_err();
//! assert!(err.is::<std::num::ParseIntError>());
//! ```
//!
//! ## Multi-Errors
//!
//! [`join`] fans several errors into one; rendering draws each child's trace
//! as a branch of a tree:
//!
//! ```rust
//! use retrace::{msg, wrap};
//!
//! let err = wrap(retrace::join([msg("disk failed"), msg("net failed")]));
//! let rendered = retrace::format_string(&err);
//! assert!(rendered.contains("+- disk failed"));
//! assert!(rendered.contains("+- net failed"));
//! ```
//!
//! ## Capture Cost
//!
//! By default the caller's program counter is found by walking the stack
//! through the host unwinder. The `fast-pc` feature replaces that with a
//! frame-pointer read (a few instructions) on `x86_64` and `aarch64`; it
//! requires building with `-C force-frame-pointers=yes`.

#![deny(unsafe_code)]

mod arena;
mod ext;
mod frame;
mod pc;
mod traced;
mod tree;

pub mod prelude;

pub use ext::{ErrorExt, ResultExt, TraceLast};
pub use frame::Frame;
pub use traced::{
    caller, join, msg, wrap, Caller, IntoTraced, Rendered, Traced, Tracer, Unwrapped,
};
pub use tree::{format, format_string};

#[doc(hidden)]
pub use traced::__errorf;

/// `Result<T, Traced>`, the currency of instrumented functions.
pub type Result<T, E = Traced> = core::result::Result<T, E>;

/// A new formatted error, already annotated with the caller's location.
///
/// The simpler alternative to `wrap` around a hand-formatted error:
///
/// ```rust
/// use retrace::{errorf, Result};
///
/// fn lookup(key: &str) -> Result<()> {
///     Err(errorf!("no such key: {key}"))
/// }
/// ```
#[macro_export]
macro_rules! errorf {
    ($($arg:tt)*) => {
        $crate::__errorf(::core::format_args!($($arg)*))
    };
}

/// An `("error", value)` pair carrying the rendered trace, for `tracing`
/// fields:
///
/// ```rust,ignore
/// let (key, value) = retrace::attr(&err);
/// tracing::error!({ key } = value, "request failed");
/// ```
#[cfg(feature = "tracing")]
pub fn attr(err: &Traced) -> (&'static str, tracing::field::DisplayValue<Rendered<'_>>) {
    ("error", tracing::field::display(err.rendered()))
}

#[cfg(test)]
mod tests;
