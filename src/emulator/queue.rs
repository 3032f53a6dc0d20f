//! Completion deadlines of a thread's outstanding fabric requests.

use crate::utils::cycles::{spin_until, CycleClock};

/// Bounded FIFO of completion deadlines, in cycles.
///
/// Owned by exactly one thread. Entries leave strictly in arrival order,
/// even if a later deadline happens to be smaller: the fabric serves
/// requests first-come first-served, not earliest-deadline-first.
#[derive(Debug)]
pub struct PendingRequestQueue {
    deadlines: Box<[u64]>,
    head: usize,
    len: usize,
}

impl PendingRequestQueue {
    /// A queue of `capacity` slots. A capacity of zero is raised to one,
    /// which serializes every request.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            deadlines: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.deadlines.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Deadline of the oldest outstanding request.
    pub fn front(&self) -> Option<u64> {
        (!self.is_empty()).then(|| self.deadlines[self.head])
    }

    /// Outstanding deadlines, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).map(move |i| self.deadlines[(self.head + i) % self.capacity()])
    }

    /// Make room for one more request.
    ///
    /// If the queue is full, spin until the oldest deadline has passed and
    /// retire it. Returns the cycles spent stalled, counted from `now`.
    pub fn admit<C: CycleClock>(&mut self, now: u64, clock: &C) -> u64 {
        if !self.is_full() {
            return 0;
        }
        let oldest = self.deadlines[self.head];
        self.pop_front();
        if oldest <= now {
            return 0;
        }
        spin_until(clock, oldest).saturating_sub(now)
    }

    /// Record a new deadline at the tail.
    ///
    /// # Panics
    /// If the queue is full; [`admit`](Self::admit) must run first.
    pub fn enqueue(&mut self, deadline: u64) {
        assert!(!self.is_full(), "fam request enqueued without admission");
        let tail = (self.head + self.len) % self.capacity();
        self.deadlines[tail] = deadline;
        self.len += 1;
    }

    /// Retire every outstanding request, oldest first, spinning until each
    /// deadline has passed. Returns the cycles spent, counted from `now`.
    pub fn drain_all<C: CycleClock>(&mut self, now: u64, clock: &C) -> u64 {
        let mut last = now;
        while let Some(deadline) = self.front() {
            last = spin_until(clock, deadline);
            self.pop_front();
        }
        last.saturating_sub(now)
    }

    fn pop_front(&mut self) {
        if self.len > 0 {
            self.head = (self.head + 1) % self.capacity();
            self.len -= 1;
        }
    }
}
