//! The [`Traced`] annotation node and the operations that create one.
//!
//! A `Traced` is a cheap shared handle to an arena-allocated node carrying
//! one captured program counter and the inner error it annotates. Chains of
//! nodes form the return trace; [`crate::join`] fans several traces into one
//! multi-error.
//!
//! `Traced` deliberately does **not** implement [`std::error::Error`]: that
//! is what keeps the blanket `From<E: Error>` conversion coherent, so the
//! `?` operator adopts foreign errors (and records the adoption site as a
//! frame) without any annotation at the call site.

use std::error::Error as StdError;
use std::fmt;

use crate::arena::{Arena, Ref};
use crate::frame::{self, Frame};
use crate::pc;
use crate::tree;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync + 'static>;

thread_local! {
    static NODES: Arena<Node> = Arena::new();
}

fn new_node(pc: usize, inner: Inner) -> Traced {
    Traced {
        node: NODES.with(|arena| arena.take(Node { pc, inner })),
    }
}

// ============================================================================
// Node model
// ============================================================================

pub(crate) struct Node {
    pub(crate) pc: usize,
    pub(crate) inner: Inner,
}

pub(crate) enum Inner {
    /// Another annotation node below this one.
    Chain(Traced),
    /// A foreign error adopted into the chain. Its `source()` chain is still
    /// reachable through the structured accessors.
    Adopted(BoxError),
    /// A fresh message error created by [`crate::msg`] or [`crate::errorf!`].
    Message(Box<str>),
    /// A multi-error join; order of the children is preserved.
    Join(Box<[Traced]>),
}

/// An error annotated with the return trace it traveled.
///
/// Create one with [`wrap`](crate::wrap), [`msg`](crate::msg),
/// [`errorf!`](crate::errorf), the [`ResultExt::trace`](crate::ResultExt)
/// extension, or implicitly through `?` on any `std::error::Error`.
///
/// ## Example
///
/// ```rust
/// use retrace::{msg, wrap, Result};
///
/// fn load() -> Result<()> {
///     Err(msg("connection refused"))
/// }
///
/// fn run() -> Result<()> {
///     load().map_err(wrap)
/// }
///
/// let err = run().unwrap_err();
/// assert_eq!(err.to_string(), "connection refused");
/// // `{:#}` renders the full return trace.
/// assert!(format!("{err:#}").starts_with("connection refused\n"));
/// ```
#[derive(Clone)]
pub struct Traced {
    node: Ref<Node>,
}

impl Traced {
    pub(crate) fn node(&self) -> &Node {
        self.node.get()
    }

    /// The message of the innermost error, without the trace.
    fn write_message(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node().inner {
            Inner::Chain(inner) => inner.write_message(f),
            Inner::Adopted(err) => fmt::Display::fmt(err, f),
            Inner::Message(text) => f.pad(text),
            Inner::Join(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    child.write_message(f)?;
                }
                Ok(())
            }
        }
    }

    /// Unwraps the outermost annotation: the frame this node's PC symbolizes
    /// to (if any) and a view of what sits below it.
    ///
    /// The frame is `None` when the PC is 0 or does not symbolize; the node
    /// is still a valid pass-through in that case.
    pub fn unwrap_frame(&self) -> (Option<Frame>, Unwrapped<'_>) {
        let frame = frame::symbolize_first(self.trace_pc());
        let inner = match &self.node().inner {
            Inner::Chain(inner) => Unwrapped::Traced(inner),
            Inner::Adopted(err) => {
                let err: &(dyn StdError + 'static) = &**err;
                Unwrapped::Foreign(err)
            }
            Inner::Message(_) => Unwrapped::Terminal,
            Inner::Join(children) => Unwrapped::Joined(children),
        };
        (frame, inner)
    }

    /// Iterates over the frames recorded along the annotation chain,
    /// outermost wrap first. A PC that symbolizes to inlined frames yields
    /// all of them, innermost first.
    pub fn frames(&self) -> impl Iterator<Item = Frame> {
        let mut frames = Vec::new();
        let mut cur = self;
        loop {
            frames.extend(frame::symbolize(cur.trace_pc()));
            match &cur.node().inner {
                Inner::Chain(inner) => cur = inner,
                _ => break,
            }
        }
        frames.into_iter()
    }

    /// The outermost frame, if this node's PC symbolizes.
    pub fn frame(&self) -> Option<Frame> {
        frame::symbolize_first(self.trace_pc())
    }

    /// Reports whether the chain below this error contains a `T`.
    ///
    /// Annotation nodes are transparent: wrapping never hides the inner
    /// error from this lookup.
    pub fn is<T: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// Finds the first `T` in the chain: adopted errors, their `source()`
    /// chains, and join children in order.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        match &self.node().inner {
            Inner::Chain(inner) => inner.downcast_ref(),
            Inner::Adopted(err) => {
                let mut cur: Option<&(dyn StdError + 'static)> = Some(&**err);
                while let Some(err) = cur {
                    if let Some(hit) = err.downcast_ref::<T>() {
                        return Some(hit);
                    }
                    cur = err.source();
                }
                None
            }
            Inner::Message(_) => None,
            Inner::Join(children) => children.iter().find_map(|c| c.downcast_ref()),
        }
    }

    /// A [`Display`](fmt::Display) adapter for the fully rendered trace,
    /// suitable for structured-log fields:
    ///
    /// ```rust,ignore
    /// tracing::error!(error = %err.rendered(), "request failed");
    /// ```
    pub fn rendered(&self) -> Rendered<'_> {
        Rendered(self)
    }
}

/// What sits below the outermost annotation node.
pub enum Unwrapped<'a> {
    /// Another annotation node.
    Traced(&'a Traced),
    /// A foreign error adopted into the chain.
    Foreign(&'a (dyn StdError + 'static)),
    /// The ordered children of a multi-error join.
    Joined(&'a [Traced]),
    /// A terminal message error.
    Terminal,
}

/// The capability of contributing a frame to trace extraction.
///
/// [`Traced`] yields the PC captured when it was created. A PC of 0 means
/// "no usable frame": the error still participates in the chain but renders
/// no location.
pub trait Tracer {
    fn trace_pc(&self) -> usize;
}

impl Tracer for Traced {
    fn trace_pc(&self) -> usize {
        self.node().pc
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// Annotates `err` with the program counter of the caller.
///
/// Accepts a [`Traced`] (adding one more frame to its trace) or any
/// `std::error::Error + Send + Sync + 'static` (adopting it). Each call adds
/// exactly one annotation node; wrapping twice records two frames.
#[inline(never)]
pub fn wrap(err: impl IntoTraced) -> Traced {
    new_node(pc::caller_pc(), err.into_payload().0)
}

/// A new message error, already annotated with the caller's location.
///
/// The simpler alternative to `wrap` around a hand-built error value.
#[inline(never)]
pub fn msg(text: impl Into<Box<str>>) -> Traced {
    new_node(pc::caller_pc(), Inner::Message(text.into()))
}

#[doc(hidden)]
#[inline(never)]
pub fn __errorf(args: fmt::Arguments<'_>) -> Traced {
    new_node(
        pc::caller_pc(),
        Inner::Message(fmt::format(args).into_boxed_str()),
    )
}

/// Joins several errors into one multi-error.
///
/// The join itself carries no frame (its PC is 0); each child keeps its own
/// trace, and rendering shows them as an ordered tree.
pub fn join<I>(errs: I) -> Traced
where
    I: IntoIterator,
    I::Item: IntoTraced,
{
    let children: Box<[Traced]> = errs
        .into_iter()
        .map(|err| into_child(err.into_payload()))
        .collect();
    new_node(0, Inner::Join(children))
}

/// Already-traced errors join as-is; anything else becomes a frameless node.
fn into_child(payload: Payload) -> Traced {
    match payload.0 {
        Inner::Chain(traced) => traced,
        inner => new_node(0, inner),
    }
}

// ============================================================================
// Caller handles
// ============================================================================

/// A captured caller location, for error helpers.
///
/// A helper that wraps on behalf of its caller captures once up front and
/// wraps later, so the recorded frame points at the helper's call site
/// rather than at the helper:
///
/// ```rust
/// use retrace::{msg, Traced};
///
/// fn fail_with(ctx: &str) -> Traced {
///     let caller = retrace::caller();
///     caller.wrap(msg(format!("failed: {ctx}")))
/// }
/// # let _ = fail_with("demo");
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Caller {
    pc: usize,
}

/// Captures the program counter of the caller's caller.
///
/// Intended for error helpers; see [`Caller`].
#[inline(never)]
pub fn caller() -> Caller {
    Caller {
        pc: pc::caller_pc_skip_one(),
    }
}

impl Caller {
    /// A handle around an externally captured PC. This is the extension
    /// point for foreign capture mechanisms: any PC the host unwinder can
    /// symbolize participates in traces on equal footing.
    pub fn from_pc(pc: usize) -> Caller {
        Caller { pc }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Annotates `err` with the previously captured PC, like
    /// [`wrap`](crate::wrap) performed at the moment of capture.
    pub fn wrap(&self, err: impl IntoTraced) -> Traced {
        new_node(self.pc, err.into_payload().0)
    }
}

pub(crate) fn wrap_with_pc(err: impl IntoTraced, pc: usize) -> Traced {
    new_node(pc, err.into_payload().0)
}

// ============================================================================
// Conversions
// ============================================================================

/// Values that can enter an annotation chain: a [`Traced`], or any
/// `std::error::Error + Send + Sync + 'static`.
pub trait IntoTraced {
    #[doc(hidden)]
    fn into_payload(self) -> Payload;
}

#[doc(hidden)]
pub struct Payload(pub(crate) Inner);

impl IntoTraced for Traced {
    fn into_payload(self) -> Payload {
        Payload(Inner::Chain(self))
    }
}

impl<E> IntoTraced for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_payload(self) -> Payload {
        Payload(Inner::Adopted(Box::new(self)))
    }
}

/// The `?` operator's conversion: adopts a foreign error and records the
/// adoption site as the first frame of its trace.
impl<E> From<E> for Traced
where
    E: StdError + Send + Sync + 'static,
{
    #[inline(never)]
    fn from(err: E) -> Traced {
        new_node(pc::caller_pc(), Inner::Adopted(Box::new(err)))
    }
}

impl From<Traced> for Box<dyn StdError + Send + Sync + 'static> {
    fn from(err: Traced) -> Self {
        Box::new(TracedCompat(err))
    }
}

impl From<Traced> for Box<dyn StdError + 'static> {
    fn from(err: Traced) -> Self {
        Box::new(TracedCompat(err))
    }
}

/// Adapter giving `Traced` an [`std::error::Error`] face for APIs that
/// require one.
struct TracedCompat(Traced);

impl fmt::Display for TracedCompat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for TracedCompat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl StdError for TracedCompat {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.0.node().inner {
            Inner::Adopted(err) => {
                let err: &(dyn StdError + 'static) = &**err;
                Some(err)
            }
            _ => None,
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

impl fmt::Display for Traced {
    /// Plain `{}` forwards to the inner error, preserving width and
    /// precision; the alternate `{:#}` renders the full return trace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str(&tree::format_string(self))
        } else {
            self.write_message(f)
        }
    }
}

impl fmt::Debug for Traced {
    /// Renders the full trace, so `Err(err)?` out of `main` shows it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&tree::format_string(self))
    }
}

/// See [`Traced::rendered`].
pub struct Rendered<'a>(&'a Traced);

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&tree::format_string(self.0))
    }
}
