// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The request-object pool (§4.D): a lock-free freelist of fixed-capacity
//! [`Request`] records, falling back to heap allocation on exhaustion.
//!
//! The design note in spec.md §9 retargets the original's raw-pointer CAS
//! freelist ("pointer-style freelist -> arena + index + generation") at a
//! memory-safe target: a fixed arena (`Box<[UnsafeCell<Request>]>`) plus
//! an atomic, index-based Treiber stack. Each stack head packs a 32-bit
//! index with a 32-bit ABA tag into one `AtomicU64`, so a slot that gets
//! popped and pushed back between two reads of the head is still detected
//! as having changed. This replaces the original's sentinel-function-
//! pointer `is_request` trick with the `PooledRequest` enum discriminant
//! itself - there is no opaque pointer to validate in safe Rust.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use riptide_parser::h1::request::Request;

const NIL: usize = usize::MAX;

/// Packs `(tag, index)` into one word so a compare-and-swap on the stack
/// head detects both "someone changed the top" and "the top changed and
/// changed back" (the classic ABA problem a bare index CAS would miss).
#[inline]
fn pack(tag: u32, index: usize) -> u64 {
    ((tag as u64) << 32) | (index as u32 as u64)
}

#[inline]
fn unpack(word: u64) -> (u32, usize) {
    let tag = (word >> 32) as u32;
    let index = (word & 0xFFFF_FFFF) as u32 as usize;
    (tag, index)
}

/// Fixed-capacity arena backing the freelist, plus the Treiber stack
/// linking free slots together.
struct Arena {
    slots: Box<[UnsafeCell<Request>]>,
    /// `next[i]` is the index of the next free slot below `i` in the
    /// freelist, or `NIL` if `i` was at the bottom of the stack.
    next: Box<[AtomicUsize]>,
    /// Packed `(tag, index)` of the current stack top, or `(tag, NIL)`
    /// when the freelist is empty.
    head: AtomicU64,
}

// Safety: every slot is handed out to exactly one caller at a time (the
// CAS stack enforces this - a slot's index cannot be popped twice without
// an intervening push), so concurrent access to different slots never
// aliases, and the pool never hands out the same slot to two callers
// simultaneously.
unsafe impl Sync for Arena {}

impl Arena {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(Request::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let next = (0..capacity)
            .map(|i| AtomicUsize::new(if i + 1 < capacity { i + 1 } else { NIL }))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let head = AtomicU64::new(pack(0, if capacity == 0 { NIL } else { 0 }));
        Self { slots, next, head }
    }

    fn pop(&self) -> Option<usize> {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (tag, index) = unpack(current);
            if index == NIL {
                return None;
            }
            let next_index = self.next[index].load(Ordering::Relaxed);
            let desired = pack(tag.wrapping_add(1), next_index);
            match self.head.compare_exchange_weak(
                current,
                desired,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(observed) => current = observed,
            }
        }
    }

    fn push(&self, index: usize) {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (tag, top) = unpack(current);
            self.next[index].store(top, Ordering::Relaxed);
            let desired = pack(tag.wrapping_add(1), index);
            match self.head.compare_exchange_weak(
                current,
                desired,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Default compile-time pool capacity; oversubscription falls back to
/// heap allocation per the design.
pub const DEFAULT_CAPACITY: usize = 32;

/// Process-wide request pool. Construct one with [`RequestPool::new`] and
/// share it (an `Arc`) across the worker pool and reactor.
pub struct RequestPool {
    arena: Arena,
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("capacity", &self.arena.capacity())
            .finish()
    }
}

impl RequestPool {
    /// Builds a pool with `capacity` pre-allocated slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: Arena::new(capacity),
        }
    }

    /// Acquires a request record: a pooled slot via lock-free CAS pop if
    /// one is free, otherwise a freshly heap-allocated one marked
    /// non-pooled. Exhaustion is never a user-visible error (§7).
    pub fn acquire(self: &std::sync::Arc<Self>) -> PooledRequest {
        match self.arena.pop() {
            Some(index) => PooledRequest::Pooled {
                pool: std::sync::Arc::clone(self),
                index,
            },
            None => PooledRequest::Heap(Box::new(Request::new())),
        }
    }

    fn release(&self, index: usize) {
        // Safety: the slot at `index` is only reachable through a
        // `PooledRequest::Pooled` that owns the sole outstanding
        // acquisition of it (the CAS pop/push pair guarantees no other
        // holder exists), so a `&mut` through the `UnsafeCell` here does
        // not alias any other live reference.
        let request = unsafe { &mut *self.arena.slots[index].get() };
        request.clear();
        self.arena.push(index);
    }

    /// Total pooled slots (not counting heap fallback allocations).
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }
}

/// A request drawn from the pool, or a one-off heap allocation if the
/// pool was exhausted at acquisition time. `Deref`/`DerefMut` give
/// transparent access to the underlying [`Request`]; dropping releases
/// pooled slots back to the freelist and simply frees heap ones.
pub enum PooledRequest {
    /// Borrowed from `pool`'s arena at `index`; returned on drop.
    Pooled {
        pool: std::sync::Arc<RequestPool>,
        index: usize,
    },
    /// A one-off allocation made when the pool was empty.
    Heap(Box<Request>),
}

impl std::fmt::Debug for PooledRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PooledRequest::Pooled { index, .. } => {
                f.debug_struct("PooledRequest::Pooled").field("index", index).finish()
            }
            PooledRequest::Heap(_) => f.write_str("PooledRequest::Heap"),
        }
    }
}

impl PooledRequest {
    /// `true` if this record came from the pool's arena rather than a
    /// heap fallback allocation - the safe-Rust analogue of the
    /// original's `is_request` sentinel check (§4.D, §8 testable
    /// properties).
    pub fn is_pooled(&self) -> bool {
        matches!(self, PooledRequest::Pooled { .. })
    }
}

impl std::ops::Deref for PooledRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        match self {
            // Safety: see `RequestPool::release`; while this `PooledRequest`
            // is alive the slot cannot have been popped by anyone else.
            PooledRequest::Pooled { pool, index } => unsafe { &*pool.arena.slots[*index].get() },
            PooledRequest::Heap(b) => b,
        }
    }
}

impl std::ops::DerefMut for PooledRequest {
    fn deref_mut(&mut self) -> &mut Request {
        match self {
            PooledRequest::Pooled { pool, index } => unsafe { &mut *pool.arena.slots[*index].get() },
            PooledRequest::Heap(b) => b,
        }
    }
}

impl Drop for PooledRequest {
    fn drop(&mut self) {
        if let PooledRequest::Pooled { pool, index } = self {
            pool.release(*index);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_marks_pooled_and_release_returns_slot() {
        let pool = Arc::new(RequestPool::new(2));
        let a = pool.acquire();
        assert!(a.is_pooled());
        drop(a);
        // the slot should be reusable: acquiring twice more should not
        // fall back to heap allocation.
        let b = pool.acquire();
        let c = pool.acquire();
        assert!(b.is_pooled());
        assert!(c.is_pooled());
    }

    #[test]
    fn exhaustion_falls_back_to_heap_without_error() {
        let pool = Arc::new(RequestPool::new(1));
        let _a = pool.acquire();
        let b = pool.acquire();
        assert!(!b.is_pooled());
    }

    #[test]
    fn release_clears_request_state() {
        let pool = Arc::new(RequestPool::new(1));
        let mut a = pool.acquire();
        a.path.push_str("/hello");
        drop(a);
        let b = pool.acquire();
        assert_eq!("", b.path);
    }

    #[test]
    fn no_record_is_reachable_from_two_acquisitions_at_once() {
        let pool = Arc::new(RequestPool::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(pool.acquire());
        }
        // all four must be pooled and distinct; a fifth must fall back.
        assert!(handles.iter().all(PooledRequest::is_pooled));
        let fifth = pool.acquire();
        assert!(!fifth.is_pooled());
    }

    #[test]
    fn concurrent_acquire_release_never_exceeds_capacity() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::thread;

        let pool = Arc::new(RequestPool::new(8));
        let live = Arc::new(AtomicUsize::new(0));
        let max_live = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let live = Arc::clone(&live);
                let max_live = Arc::clone(&max_live);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let req = pool.acquire();
                        if req.is_pooled() {
                            let n = live.fetch_add(1, Ordering::SeqCst) + 1;
                            max_live.fetch_max(n, Ordering::SeqCst);
                            live.fetch_sub(1, Ordering::SeqCst);
                        }
                        drop(req);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_live.load(Ordering::SeqCst) <= pool.capacity());
    }
}
