//! Single-assignment result cells.
//!
//! A [`Future`] is created by whoever starts an asynchronous operation and
//! resolved exactly once by whoever sees it complete. Interested parties
//! register callbacks. Tasks don't poll a `Future` directly; they block on
//! it through [`Scheduler::wait_for`](crate::executor::Scheduler::wait_for),
//! which parks them via an *unblocking* callback.

use core::{
    cell::{Cell, RefCell},
    fmt::{self, Debug, Formatter},
    mem,
};

use alloc::{
    boxed::Box,
    rc::Rc,
    vec::Vec,
};

use crate::{
    error::{Error, Result},
    executor::{Scheduler, WeakScheduler},
};

/// Identifies a registered unblocking callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CallbackId(u32);

type Callback<T> = Box<dyn FnOnce(&Future<T>)>;

enum Slot<T> {
    Pending,
    Resolved(T),
}

struct Inner<T> {
    scheduler: WeakScheduler,
    slot: RefCell<Slot<T>>,
    done: RefCell<Vec<Callback<T>>>,
    unblocking: RefCell<Vec<(CallbackId, Callback<T>)>>,
    next_id: Cell<u32>,
}

/// Shared handle to a result cell. Clones refer to the same cell.
pub struct Future<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Future<T> {
    /// A pending future. Callbacks registered after resolution are
    /// deferred onto `scheduler`.
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(Inner {
                scheduler: scheduler.downgrade(),
                slot: RefCell::new(Slot::Pending),
                done: RefCell::new(Vec::new()),
                unblocking: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn done(&self) -> bool {
        matches!(*self.inner.slot.borrow(), Slot::Resolved(_))
    }

    /// Store the result and run the callbacks: done-callbacks first, then
    /// unblocking callbacks, each in registration order.
    ///
    /// Fails with `InvalidState` if the future already has a result; the
    /// first result is kept.
    pub fn set_result(&self, value: T) -> Result<()> {
        {
            let mut slot = self.inner.slot.borrow_mut();
            if let Slot::Resolved(_) = *slot {
                return Err(Error::InvalidState);
            }
            *slot = Slot::Resolved(value);
        }

        let done = mem::take(&mut *self.inner.done.borrow_mut());
        for callback in done {
            callback(self);
        }
        let unblocking = mem::take(&mut *self.inner.unblocking.borrow_mut());
        for (_, callback) in unblocking {
            callback(self);
        }
        Ok(())
    }

    pub fn add_done_callback(&self, callback: impl FnOnce(&Future<T>) + 'static) {
        if self.done() {
            self.defer(Box::new(callback));
        } else {
            self.inner.done.borrow_mut().push(Box::new(callback));
        }
    }

    /// Register a callback that wakes a parked task. Runs after all
    /// done-callbacks.
    pub fn add_unblocking_callback(&self, callback: impl FnOnce(&Future<T>) + 'static) -> CallbackId {
        let id = CallbackId(self.inner.next_id.get());
        self.inner.next_id.set(id.0.wrapping_add(1));
        if self.done() {
            self.defer(Box::new(callback));
        } else {
            self.inner.unblocking.borrow_mut().push((id, Box::new(callback)));
        }
        id
    }

    pub fn remove_unblocking_callback(&self, id: CallbackId) -> bool {
        let mut unblocking = self.inner.unblocking.borrow_mut();
        let before = unblocking.len();
        unblocking.retain(|(i, _)| *i != id);
        unblocking.len() != before
    }

    pub fn clear_unblocking_callbacks(&self) {
        self.inner.unblocking.borrow_mut().clear();
    }

    /// Whether both handles refer to the same cell.
    pub fn same(&self, other: &Future<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn as_blocker(&self) -> Rc<dyn Blocker> {
        Rc::new(self.clone())
    }

    // Already resolved: run the callback on the next loop pass rather than
    // inside the caller.
    fn defer(&self, callback: Callback<T>) {
        let future = self.clone();
        match self.inner.scheduler.upgrade() {
            Some(scheduler) => {
                scheduler.call_soon(move |_| callback(&future));
            }
            None => {
                log::warn!("future outlived its scheduler, running callback inline");
                callback(&future)
            }
        }
    }
}

impl<T: Clone + 'static> Future<T> {
    /// The result, or `InvalidState` while still pending.
    pub fn result(&self) -> Result<T> {
        match &*self.inner.slot.borrow() {
            Slot::Resolved(value) => Ok(value.clone()),
            Slot::Pending => Err(Error::InvalidState),
        }
    }
}

impl<T> Debug for Future<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.slot.borrow() {
            Slot::Pending => "PENDING",
            Slot::Resolved(_) => "FINISHED",
        };
        write!(
            f,
            "Future<{}, {} done, {} unblocking>",
            state,
            self.inner.done.borrow().len(),
            self.inner.unblocking.borrow().len()
        )
    }
}

/// The type-erased view the loop needs to park a task on a future.
pub trait Blocker {
    fn done(&self) -> bool;
    fn add_unblocking_callback(&self, callback: Box<dyn FnOnce()>) -> CallbackId;
    fn remove_unblocking_callback(&self, id: CallbackId) -> bool;
}

impl<T: 'static> Blocker for Future<T> {
    fn done(&self) -> bool {
        Future::done(self)
    }

    fn add_unblocking_callback(&self, callback: Box<dyn FnOnce()>) -> CallbackId {
        Future::add_unblocking_callback(self, move |_| callback())
    }

    fn remove_unblocking_callback(&self, id: CallbackId) -> bool {
        Future::remove_unblocking_callback(self, id)
    }
}
