//! Thread-Safe Queue
//!
//! [`Uqueue`] is a fixed-capacity multi-producer multi-consumer queue built
//! on a ring of tagged cells and compare-and-swap, without mutexes. Cells
//! move between two lock-free stacks: an empty stack feeding `push` and a
//! carrier stack drained from the bottom by `pop`, which preserves FIFO
//! order per producer. Each move bumps the cell's tag, so a stale
//! compare-and-swap can never land on a recycled cell.
//!
//! Readiness is exposed as two edge-triggered channels usable as event-loop
//! watchers: push-ready (cleared while the queue is full) and pop-ready
//! (cleared while it is empty).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::error::Result;
use crate::ueventfd::Ueventfd;
use crate::upump::{Upump, UpumpMgr};

/// Multiplexed (index, tag) word. Index 0 is the null element.
type Utag = u64;

const UTAG_NULL: Utag = 0;

fn utag_index(utag: Utag) -> u32 {
    (utag & u64::from(u32::MAX)) as u32
}

fn utag_new(index: u32, tag: u32) -> Utag {
    (u64::from(tag) << 32) | u64::from(index)
}

struct Cell<T> {
    /// Incremented at each use.
    tag: AtomicU32,
    /// Utag of the next element in the stack holding this cell.
    next: AtomicU64,
    slot: UnsafeCell<Option<T>>,
}

/// Fixed-capacity MPMC queue of record handles.
pub struct Uqueue<T> {
    cells: Box<[Cell<T>]>,
    /// Stack of filled cells; `pop` shifts from the bottom.
    carrier: AtomicU64,
    /// Stack of free cells.
    empty: AtomicU64,
    count: AtomicUsize,
    capacity: usize,
    event_push: Ueventfd,
    event_pop: Ueventfd,
}

// A cell's slot is only touched by the single owner that holds it outside
// both stacks.
unsafe impl<T: Send> Send for Uqueue<T> {}
unsafe impl<T: Send> Sync for Uqueue<T> {}

impl<T> Uqueue<T> {
    /// Creates a queue of at most `capacity` elements.
    pub fn new(capacity: usize) -> Result<Self> {
        let cells: Box<[Cell<T>]> = (0..capacity)
            .map(|i| Cell {
                tag: AtomicU32::new(0),
                // All cells start chained on the empty stack.
                next: AtomicU64::new(if i + 1 < capacity {
                    utag_new(i as u32 + 2, 0)
                } else {
                    UTAG_NULL
                }),
                slot: UnsafeCell::new(None),
            })
            .collect();
        Ok(Self {
            cells,
            carrier: AtomicU64::new(UTAG_NULL),
            empty: AtomicU64::new(if capacity > 0 { utag_new(1, 0) } else { UTAG_NULL }),
            count: AtomicUsize::new(0),
            capacity,
            event_push: Ueventfd::new(true)?,
            event_pop: Ueventfd::new(false)?,
        })
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of elements.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes an element, returning it when the queue is full.
    pub fn push(&self, element: T) -> std::result::Result<(), T> {
        let mut utag = self.stack_pop(&self.empty);
        if utag == UTAG_NULL {
            // Signal that we are full, then double-check: a concurrent pop
            // may have freed a cell in between.
            self.event_push.reset();
            utag = self.stack_pop(&self.empty);
            if utag == UTAG_NULL {
                return Err(element);
            }
            self.event_push.signal();
        }

        let idx = utag_index(utag) as usize - 1;
        let cell = &self.cells[idx];
        unsafe {
            *cell.slot.get() = Some(element);
        }
        let tag = cell.tag.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        self.stack_push(&self.carrier, utag_new(idx as u32 + 1, tag));

        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            self.event_pop.signal();
        }
        Ok(())
    }

    /// Pops the oldest element, or `None` when the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut utag = self.stack_shift(&self.carrier);
        if utag == UTAG_NULL {
            // Signal that we starve, then double-check.
            self.event_pop.reset();
            utag = self.stack_shift(&self.carrier);
            if utag == UTAG_NULL {
                return None;
            }
            self.event_pop.signal();
        }

        let idx = utag_index(utag) as usize - 1;
        let cell = &self.cells[idx];
        let element = unsafe { (*cell.slot.get()).take() };
        let tag = cell.tag.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        self.stack_push(&self.empty, utag_new(idx as u32 + 1, tag));

        if self.count.fetch_sub(1, Ordering::SeqCst) == self.capacity {
            self.event_push.signal();
        }
        element
    }

    /// Allocates a watcher firing when an element can be pushed.
    pub fn upump_alloc_push(
        &self,
        upump_mgr: &UpumpMgr,
        cb: impl FnMut(&Upump) + Send + 'static,
    ) -> Upump {
        upump_mgr.alloc_eventfd(&self.event_push, false, cb)
    }

    /// Allocates a watcher firing when an element can be popped.
    pub fn upump_alloc_pop(
        &self,
        upump_mgr: &UpumpMgr,
        cb: impl FnMut(&Upump) + Send + 'static,
    ) -> Upump {
        upump_mgr.alloc_eventfd(&self.event_pop, true, cb)
    }

    /// Pops an element from a stack.
    fn stack_pop(&self, top: &AtomicU64) -> Utag {
        loop {
            let utag = top.load(Ordering::SeqCst);
            if utag == UTAG_NULL {
                return UTAG_NULL;
            }
            let next = self.cells[utag_index(utag) as usize - 1]
                .next
                .load(Ordering::SeqCst);
            if top
                .compare_exchange(utag, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return utag;
            }
        }
    }

    /// Pushes an element onto a stack.
    fn stack_push(&self, top: &AtomicU64, utag: Utag) {
        let cell = &self.cells[utag_index(utag) as usize - 1];
        loop {
            let cur = top.load(Ordering::SeqCst);
            cell.next.store(cur, Ordering::SeqCst);
            if top
                .compare_exchange(cur, utag, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Removes the bottom element of a stack, walking the chain. Tags make
    /// a compare-and-swap on a recycled cell fail.
    fn stack_shift(&self, top: &AtomicU64) -> Utag {
        'restart: loop {
            let mut prev: Option<usize> = None;
            let mut utag = top.load(Ordering::SeqCst);
            if utag == UTAG_NULL {
                return UTAG_NULL;
            }
            loop {
                let idx = utag_index(utag) as usize - 1;
                let next = self.cells[idx].next.load(Ordering::SeqCst);
                if next == UTAG_NULL {
                    let target = match prev {
                        None => top,
                        Some(p) => &self.cells[p].next,
                    };
                    if target
                        .compare_exchange(utag, UTAG_NULL, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return utag;
                    }
                    continue 'restart;
                }
                prev = Some(idx);
                utag = next;
            }
        }
    }
}

impl<T> std::fmt::Debug for Uqueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uqueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
