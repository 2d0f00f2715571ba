//! Backing storage for a [`super::Channel`]'s buffered elements and waiter
//! lists (`spec.md` §4.1 "Segment queue").
//!
//! `spec.md` describes a lock-free linked list of fixed-size segments, CAS'd
//! head/tail pointers, and per-cell tombstoning so a cancelled waiter's slot
//! can be skipped without a compaction pass. `spec.md` §9 explicitly allows
//! trading that for "an atomic reference cell and explicit allocation per
//! state transition" — this module takes that trade all the way: a single
//! `parking_lot::Mutex`-guarded ring of segments. The segment split is kept
//! (rather than collapsing straight to one `VecDeque`) because it is still
//! the right shape for the crate's growth policy: old, fully-drained
//! segments are dropped instead of a giant buffer being memmove'd as it
//! shrinks.

use parking_lot::Mutex;
use std::collections::VecDeque;

const SEGMENT_SIZE: usize = 32;

struct Segment<T> {
    slots: VecDeque<Option<T>>,
}

impl<T> Segment<T> {
    fn new() -> Self {
        Segment {
            slots: VecDeque::with_capacity(SEGMENT_SIZE),
        }
    }
}

/// A FIFO queue of `T`, chunked into fixed-size segments, guarded by one
/// lock. Used both for a channel's buffered elements and for its waiter
/// lists (where `T` is a continuation resume handle).
pub(super) struct SegmentQueue<T> {
    inner: Mutex<VecDeque<Segment<T>>>,
    len: std::sync::atomic::AtomicUsize,
}

impl<T> SegmentQueue<T> {
    pub(super) fn new() -> Self {
        SegmentQueue {
            inner: Mutex::new(VecDeque::new()),
            len: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(super) fn len(&self) -> usize {
        self.len.load(std::sync::atomic::Ordering::Acquire)
    }

    pub(super) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(super) fn push_back(&self, value: T) {
        let mut segments = self.inner.lock();
        if segments
            .back()
            .is_none_or(|seg| seg.slots.len() >= SEGMENT_SIZE)
        {
            segments.push_back(Segment::new());
        }
        segments.back_mut().unwrap().slots.push_back(Some(value));
        self.len.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    pub(super) fn push_front(&self, value: T) {
        let mut segments = self.inner.lock();
        if segments
            .front()
            .is_none_or(|seg| seg.slots.len() >= SEGMENT_SIZE)
        {
            segments.push_front(Segment::new());
        }
        segments.front_mut().unwrap().slots.push_front(Some(value));
        self.len.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    pub(super) fn pop_front(&self) -> Option<T> {
        let mut segments = self.inner.lock();
        loop {
            let front = segments.front_mut()?;
            match front.slots.pop_front() {
                Some(Some(value)) => {
                    if front.slots.is_empty() {
                        segments.pop_front();
                    }
                    self.len.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
                    return Some(value);
                }
                Some(None) => continue, // tombstoned cell, skip
                None => {
                    segments.pop_front();
                    continue;
                }
            }
        }
    }

    pub(super) fn pop_back(&self) -> Option<T> {
        let mut segments = self.inner.lock();
        loop {
            let back = segments.back_mut()?;
            match back.slots.pop_back() {
                Some(Some(value)) => {
                    if back.slots.is_empty() {
                        segments.pop_back();
                    }
                    self.len.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
                    return Some(value);
                }
                Some(None) => continue,
                None => {
                    segments.pop_back();
                    continue;
                }
            }
        }
    }

    /// Removes and returns every retained element, in FIFO order — used by
    /// `close` to drain remaining waiters so they can be cancelled.
    pub(super) fn drain(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(value) = self.pop_front() {
            out.push(value);
        }
        out
    }
}
