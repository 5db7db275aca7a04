//! The shared buffer ("sbuffer"): an ordered, multi-consumer delivery
//! queue with gated removal.
//!
//! One producer (the connection manager) appends readings at the tail.
//! Two independent consumers drain it from the front, at different
//! speeds and for different purposes:
//!
//! - the data manager **reads** non-destructively, advancing a `mid`
//!   cursor and marking each node it has seen as "releasable";
//! - the storage manager **removes** destructively from `head`, but only
//!   nodes that are already releasable.
//!
//! This is what lets a crashing SQL layer never cause the data-analysis
//! path to lose a reading: a node cannot be physically freed until the
//! data manager has observed it.
//!
//! Representation: the original C implementation threads three raw
//! pointers (`head`, `mid`, `tail`) through one singly linked chain of
//! heap nodes. Rust's ownership rules make that representation painful
//! without unsafe aliasing, and the three cursors never need random
//! access or reverse traversal — they only ever advance. So this rewrite
//! keeps the same queue and the same invariants but represents them as a
//! `VecDeque<BufferNode>` plus `mid_offset`, the count of nodes from the
//! front that the data manager has already read. `head` is `front()`,
//! `tail` is `back()`, `mid` is `nodes[mid_offset]` if that index is in
//! bounds. `releasable` for node `i` is exactly `i < mid_offset`: the
//! invariant "every node before mid is releasable, every node from mid
//! onward is not" is a property of the representation rather than a
//! per-node flag that could fall out of sync.
//!
//! Locking: the spec describes a *write lock* (serialising inserts and
//! tail linkage) kept disjoint from a *main lock* (head/mid/removal/waits)
//! so the producer doesn't contend with the slower consumers on the
//! common path. A `VecDeque` cannot be split across two locks without
//! unsafe aliasing — `push_back` can reallocate the whole backing store
//! out from under a concurrent reader — so this implementation uses one
//! `Mutex<Inner>` guarding the whole queue, with the two condition
//! variables kept distinct and signalled exactly as specified. See
//! DESIGN.md for the full rationale.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::wire::SensorReading;

/// One element of the shared buffer.
#[derive(Debug, Clone, Copy)]
struct BufferNode {
    reading: SensorReading,
}

/// Which cursor a consumer is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The storage manager waits on `head`.
    Head,
    /// The data manager waits on `mid`.
    Mid,
}

struct Inner {
    nodes: VecDeque<BufferNode>,
    /// Count of nodes from the front already read by the data manager.
    mid_offset: usize,
    terminated: bool,
}

impl Inner {
    fn mid_is_empty(&self) -> bool {
        self.mid_offset >= self.nodes.len()
    }

    fn head_is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The shared, multi-consumer, ordered delivery buffer.
pub struct SharedBuffer {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    allow_remove: Condvar,
}

impl SharedBuffer {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: VecDeque::new(),
                mid_offset: 0,
                terminated: false,
            }),
            not_empty: Condvar::new(),
            allow_remove: Condvar::new(),
        }
    }

    /// Producer: append a reading at the tail.
    ///
    /// If the data manager had drained to `mid = None` (it was waiting on
    /// an empty queue) the newly inserted node becomes the new `mid`
    /// automatically, since `mid_offset` already pointed one past the
    /// last node. Without this the reader could never resume and the
    /// storage manager would block forever waiting for a node that can
    /// never become releasable — this is an invariant, not an
    /// optimisation.
    pub fn insert(&self, reading: SensorReading) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.push_back(BufferNode { reading });
        drop(inner);
        self.not_empty.notify_all();
    }

    /// Data manager: non-destructively read the oldest unread node.
    ///
    /// Returns `None` ("no data") without blocking if `mid` is empty.
    pub fn read(&self) -> Option<SensorReading> {
        let mut inner = self.inner.lock().unwrap();
        if inner.mid_is_empty() {
            return None;
        }
        let reading = inner.nodes[inner.mid_offset].reading;
        inner.mid_offset += 1;
        drop(inner);
        self.allow_remove.notify_all();
        Some(reading)
    }

    /// Storage manager: destructively remove the oldest node.
    ///
    /// Returns `None` ("no data") without blocking if `head` is empty.
    /// Otherwise blocks until that node is releasable (has been seen by
    /// the data manager) before popping it.
    pub fn remove(&self) -> Option<SensorReading> {
        let mut inner = self.inner.lock().unwrap();
        if inner.head_is_empty() {
            return None;
        }
        while inner.mid_offset == 0 {
            inner = self.allow_remove.wait(inner).unwrap();
        }
        let node = inner.nodes.pop_front().expect("head checked non-empty");
        inner.mid_offset -= 1;
        Some(node.reading)
    }

    /// Block while the given cursor is empty. Returns `true` once data is
    /// available, `false` if the buffer was terminated while waiting.
    /// This is the sole supported way to wait for data; `read` and
    /// `remove` only ever observe instantaneous state.
    pub fn wait_not_empty(&self, which: Cursor) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let empty = match which {
                Cursor::Head => inner.head_is_empty(),
                Cursor::Mid => inner.mid_is_empty(),
            };
            if !empty {
                return true;
            }
            if inner.terminated {
                return false;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Like `wait_not_empty`, but gives up and returns `true` (meaning:
    /// "stop waiting, re-check state yourself") if `timeout` elapses
    /// without the cursor becoming non-empty or the buffer terminating.
    /// Lets a consumer poll other state (a shutdown flag, a deadline)
    /// instead of sleeping on the buffer forever.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn wait_not_empty_timeout(&self, which: Cursor, timeout: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let empty = match which {
                Cursor::Head => inner.head_is_empty(),
                Cursor::Mid => inner.mid_is_empty(),
            };
            if !empty {
                return true;
            }
            if inner.terminated {
                return false;
            }
            let (guard, result) = self.not_empty.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if result.timed_out() {
                return true;
            }
        }
    }

    /// Orchestrator: mark the buffer terminated and wake every waiter on
    /// both condition variables, so no consumer can sleep past shutdown.
    pub fn terminate(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.terminated = true;
        drop(inner);
        self.not_empty.notify_all();
        self.allow_remove.notify_all();
    }
}

impl Default for SharedBuffer {
    fn default() -> Self {
        Self::new()
    }
}
