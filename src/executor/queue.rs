//! Time-ordered queue of work for the loop.

use core::cmp::Ordering;

use alloc::{
    boxed::Box,
    collections::BinaryHeap,
};

use crate::{
    executor::{
        syscall::Resume,
        task::TaskRef,
        Scheduler,
    },
    platform::Millis,
};

/// Identifies one queued entry so it can be cancelled. Handles are never
/// reused within a scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

pub(crate) type Callback = Box<dyn FnOnce(&Scheduler)>;

pub(crate) enum Action {
    /// Step a task, handing it `Resume` as the outcome of its last syscall.
    Resume(TaskRef, Resume),
    Call(Callback),
}

pub(crate) struct Entry {
    pub(crate) deadline: Millis,
    pub(crate) handle: Handle,
    pub(crate) action: Action,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap pops the greatest entry, so earlier deadlines compare greater.
// The handle breaks ties in scheduling order.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.handle).cmp(&(self.deadline, self.handle))
    }
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Entry>,
    next: u64,
}

impl TimerQueue {
    pub(crate) fn push(&mut self, deadline: Millis, action: Action) -> Handle {
        self.next += 1;
        let handle = Handle(self.next);
        self.heap.push(Entry {
            deadline,
            handle,
            action,
        });
        handle
    }

    pub(crate) fn pop(&mut self) -> Option<Entry> {
        self.heap.pop()
    }

    /// Drop the entry carrying `handle`, if it has not run yet.
    /// Returns how many entries were removed.
    pub(crate) fn cancel(&mut self, handle: Handle) -> usize {
        let before = self.heap.len();
        self.heap.retain(|e| e.handle != handle);
        before - self.heap.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    use super::{Action, TimerQueue};

    fn noop() -> Action {
        Action::Call(Box::new(|_| {}))
    }

    #[test]
    fn pops_by_deadline_then_insertion() {
        let mut q = TimerQueue::default();
        let late = q.push(20, noop());
        let first = q.push(5, noop());
        let second = q.push(5, noop());
        let early = q.push(1, noop());

        let order: Vec<_> = core::iter::from_fn(|| q.pop()).map(|e| e.handle).collect();
        assert_eq!(order, [early, first, second, late]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut q = TimerQueue::default();
        let h = q.push(3, noop());
        q.push(4, noop());
        assert_eq!(1, q.cancel(h));
        assert_eq!(0, q.cancel(h));
        assert_eq!(1, q.len());
        assert_eq!(Some(4), q.pop().map(|e| e.deadline));
    }
}
