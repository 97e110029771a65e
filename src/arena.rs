//! Slab arena for annotation nodes.
//!
//! Wrapping is expected at every return point of an instrumented program, so
//! nodes are allocated in batches rather than one `Box` at a time. Each
//! thread owns a current slab; reserving a slot is a plain bump, and when the
//! slab is exhausted the thread installs a fresh one. A retired slab stays
//! alive exactly as long as any outstanding node handle references it, so
//! handles are cheap to clone and nodes are never moved.
//!
//! Slots are [`OnceLock`]s: the reserving caller is the only writer, and the
//! write happens before the handle is returned, so reads through a handle
//! always observe an initialized slot.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

/// Number of nodes per slab.
///
/// Matches the batch size to the common case of short-lived handler errors:
/// large enough to amortize the slab allocation, small enough that a retired
/// slab pinned by one long-lived error is not a burden.
const SLAB_LEN: usize = 64;

type Slab<T> = Arc<[OnceLock<T>]>;

fn new_slab<T>() -> Slab<T> {
    (0..SLAB_LEN).map(|_| OnceLock::new()).collect()
}

/// A thread-local allocator handing out [`Ref`]s into the current slab.
pub(crate) struct Arena<T> {
    current: RefCell<Current<T>>,
}

struct Current<T> {
    slab: Slab<T>,
    next: usize,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Arena {
            current: RefCell::new(Current {
                slab: new_slab(),
                next: 0,
            }),
        }
    }

    /// Moves `value` into the next free slot, replacing the slab first if it
    /// is exhausted.
    pub(crate) fn take(&self, value: T) -> Ref<T> {
        let mut current = self.current.borrow_mut();
        if current.next == current.slab.len() {
            current.slab = new_slab();
            current.next = 0;
        }
        let index = current.next;
        current.next += 1;

        // The slot was freshly reserved above, so this set cannot fail.
        let _ = current.slab[index].set(value);
        Ref {
            slab: Arc::clone(&current.slab),
            index,
        }
    }
}

/// Shared handle to one slot of a slab.
///
/// Clones share the slot; the slab lives until the last handle into it is
/// dropped.
pub(crate) struct Ref<T> {
    slab: Slab<T>,
    index: usize,
}

impl<T> Ref<T> {
    pub(crate) fn get(&self) -> &T {
        self.slab[self.index]
            .get()
            .expect("arena slot is written before the handle exists")
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref {
            slab: Arc::clone(&self.slab),
            index: self.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_hands_out_distinct_slots() {
        let arena = Arena::new();
        let a = arena.take(1u32);
        let b = arena.take(2u32);
        assert_eq!(*a.get(), 1);
        assert_eq!(*b.get(), 2);
    }

    #[test]
    fn refs_survive_slab_rollover() {
        let arena = Arena::new();
        let refs: Vec<_> = (0..SLAB_LEN * 3).map(|i| arena.take(i)).collect();
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(*r.get(), i);
        }
    }

    #[test]
    fn clones_share_the_slot() {
        let arena = Arena::new();
        let a = arena.take(String::from("x"));
        let b = a.clone();
        assert_eq!(a.get(), b.get());
        assert!(std::ptr::eq(a.get(), b.get()));
    }
}
