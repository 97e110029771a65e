//! Extension traits for annotating errors at return points.
//!
//! These are the operations the `retrace` rewriter inserts:
//!
//! - [`ResultExt::trace`] on any `Result` being returned or propagated
//!   with `?`;
//! - [`ErrorExt::traced`] on an error value inside an `Err(…)` literal;
//! - [`TraceLast::trace_last`] on a returned tuple whose final element is a
//!   `Result`.
//!
//! All of them add exactly one frame on the error path and leave the success
//! path untouched: no capture, no allocation.

use crate::pc;
use crate::traced::{wrap_with_pc, IntoTraced, Traced};

// ============================================================================
// ResultExt - annotate a propagated Result
// ============================================================================

/// Adds the caller's location to the error of a `Result`.
///
/// ## Example
///
/// ```rust
/// use retrace::{msg, Result, ResultExt};
///
/// fn inner() -> Result<()> {
///     Err(msg("failed"))
/// }
///
/// fn outer() -> Result<()> {
///     inner().trace()?;
///     Ok(())
/// }
///
/// let err = outer().unwrap_err();
/// assert_eq!(err.frames().count(), 2);
/// ```
pub trait ResultExt<T> {
    /// Annotates the error, if any, with the caller's location.
    fn trace(self) -> Result<T, Traced>;
}

impl<T, E: IntoTraced> ResultExt<T> for Result<T, E> {
    #[inline(never)]
    fn trace(self) -> Result<T, Traced> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(wrap_with_pc(err, pc::caller_pc())),
        }
    }
}

// ============================================================================
// ErrorExt - annotate an error value
// ============================================================================

/// Adds the caller's location to a bare error value.
///
/// Equivalent to [`wrap`](crate::wrap), in method position:
///
/// ```rust
/// use retrace::{ErrorExt, Result};
///
/// fn parse(input: &str) -> Result<i32> {
///     match input.parse() {
///         Ok(n) => Ok(n),
///         Err(err) => Err(err.traced()),
///     }
/// }
/// ```
pub trait ErrorExt {
    fn traced(self) -> Traced;
}

impl<E: IntoTraced> ErrorExt for E {
    #[inline(never)]
    fn traced(self) -> Traced {
        wrap_with_pc(self, pc::caller_pc())
    }
}

// ============================================================================
// TraceLast - annotate the final Result of a returned tuple
// ============================================================================

/// Annotates the final `Result` of a tuple without splitting the expression
/// that produced it.
///
/// This exists solely for rewritten returns of the form
/// `return make_both()` where `make_both` yields `(Stats, Result<T, _>)`:
/// the rewriter cannot name the tuple's elements, so it appends
/// `.trace_last()` instead. Implemented for tuple arities 2 through 6 whose
/// **final** element is the `Result`.
pub trait TraceLast {
    type Output;

    fn trace_last(self) -> Self::Output;
}

macro_rules! impl_trace_last {
    ($($name:ident)*) => {
        impl<$($name,)* T, ErrT: IntoTraced> TraceLast for ($($name,)* Result<T, ErrT>,) {
            type Output = ($($name,)* Result<T, Traced>,);

            #[inline(never)]
            #[allow(non_snake_case)]
            fn trace_last(self) -> Self::Output {
                let ($($name,)* result,) = self;
                let result = match result {
                    Ok(value) => Ok(value),
                    Err(err) => Err(wrap_with_pc(err, pc::caller_pc())),
                };
                ($($name,)* result,)
            }
        }
    };
}

impl_trace_last!(A);
impl_trace_last!(A B);
impl_trace_last!(A B C);
impl_trace_last!(A B C D);
impl_trace_last!(A B C D E);
