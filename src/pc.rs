//! Program-counter capture for wrap sites.
//!
//! Every wrap operation records the program counter of the code that invoked
//! it. Two implementations exist, selected at build time:
//!
//! - The default walks the stack through the [`backtrace`] crate and is
//!   portable.
//! - The `fast-pc` feature reads the return address straight out of the
//!   active call frame on `x86_64` and `aarch64`. This is a handful of
//!   instructions but requires frame pointers
//!   (`RUSTFLAGS="-C force-frame-pointers=yes"`); all other targets fall back
//!   to the portable path.
//!
//! Both paths yield `0` when the stack cannot be inspected; a zero PC wraps
//! fine but contributes no frame to rendered traces.
//!
//! The skip accounting assumes exactly one non-inlined library function
//! between the capture and user code. Every exported wrap operation is
//! `#[inline(never)]` for that reason; see the crate docs before adding a new
//! caller here.

#[cfg(not(all(
    feature = "fast-pc",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
mod imp {
    /// Walks the stack until `anchor` (the entry address of the capture
    /// function itself) is found, then returns the ip of the frame
    /// `skip + 1` levels above it.
    ///
    /// Anchoring on our own entry address instead of a fixed depth keeps the
    /// count correct regardless of how many internal frames the unwinder
    /// inserts below us. If the anchor never shows up (no unwind data, or the
    /// capture function was inlined after all), this returns 0.
    fn pc_above(anchor: usize, skip: usize) -> usize {
        let mut remaining: Option<usize> = None;
        let mut pc = 0usize;
        backtrace::trace(|frame| {
            match remaining.as_mut() {
                Some(0) => {
                    pc = frame.ip() as usize;
                    return false;
                }
                Some(n) => *n -= 1,
                None => {
                    if frame.symbol_address() as usize == anchor {
                        remaining = Some(skip);
                    }
                }
            }
            true
        });
        pc
    }

    /// PC of the function that invoked this function's caller.
    #[inline(never)]
    pub(crate) fn caller_pc() -> usize {
        // Skip one frame past the anchor: the wrap operation calling us.
        pc_above(caller_pc as fn() -> usize as usize, 1)
    }

    /// Like [`caller_pc`], one frame further out. Used by [`crate::caller`]
    /// so an error helper attributes frames to its own caller.
    #[inline(never)]
    pub(crate) fn caller_pc_skip_one() -> usize {
        pc_above(caller_pc_skip_one as fn() -> usize as usize, 2)
    }
}

#[cfg(all(
    feature = "fast-pc",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
#[allow(unsafe_code)]
mod imp {
    use core::arch::asm;

    /// Reads the current frame pointer register.
    ///
    /// The register itself cannot be named as an `out` operand while frame
    /// pointers are enabled, so copy it through a scratch register.
    #[inline(always)]
    fn frame_pointer() -> usize {
        let fp: usize;
        #[cfg(target_arch = "x86_64")]
        unsafe {
            asm!("mov {fp}, rbp", fp = out(reg) fp, options(nomem, nostack, preserves_flags));
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            asm!("mov {fp}, x29", fp = out(reg) fp, options(nomem, nostack, preserves_flags));
        }
        fp
    }

    /// The saved return address sits one word above the frame record on both
    /// supported ABIs: `[rbp + 8]` on x86_64, `[x29 + 8]` (the saved `lr`)
    /// on aarch64.
    #[inline(always)]
    fn return_address(fp: usize) -> usize {
        if fp == 0 {
            return 0;
        }
        unsafe { *((fp + core::mem::size_of::<usize>()) as *const usize) }
    }

    /// PC of the function that invoked this function's caller.
    ///
    /// `#[inline(always)]` is load-bearing: the read happens in the frame of
    /// the `#[inline(never)]` wrap operation, whose return address is the
    /// wrap call site in user code.
    #[inline(always)]
    pub(crate) fn caller_pc() -> usize {
        return_address(frame_pointer())
    }

    /// Like [`caller_pc`], one frame further out: chase one frame-pointer
    /// link before reading the return address.
    #[inline(always)]
    pub(crate) fn caller_pc_skip_one() -> usize {
        let fp = frame_pointer();
        if fp == 0 {
            return 0;
        }
        let caller_fp = unsafe { *(fp as *const usize) };
        return_address(caller_fp)
    }
}

pub(crate) use imp::{caller_pc, caller_pc_skip_one};
