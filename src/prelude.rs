//! Convenience re-exports: `use retrace::prelude::*;`.
//!
//! Brings the extension traits into scope anonymously, so they cannot clash
//! with local names, plus the handful of constructors instrumented code
//! calls.

pub use crate::{
    ErrorExt as _, IntoTraced as _, ResultExt as _, TraceLast as _, Tracer as _,
};

pub use crate::{errorf, join, msg, wrap, Result, Traced};
