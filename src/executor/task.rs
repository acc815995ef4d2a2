use core::{
    cell::{Cell, RefCell},
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
        RawWaker,
        RawWakerVTable,
        Waker,
    },
};

use alloc::{
    boxed::Box,
    rc::Rc,
};
use heapless::String;

pub(crate) type TaskRef = Rc<Task>;

/// Where a task is in its life.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Queued to run as soon as its deadline passes.
    Ready,
    /// Being polled right now.
    Running,
    /// Queued behind a `Sleep`.
    Sleeping,
    /// Parked on a future; only its unblocking callback or timeout
    /// will queue it again.
    Blocked,
    /// Ran to completion, or failed.
    Terminated,
}

pub(crate) struct Task {
    id: u64,
    name: String<16>,
    state: Cell<TaskState>,
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
}

impl Task {
    pub(crate) fn new(id: u64, label: &str, future: impl Future<Output = ()> + 'static) -> TaskRef {
        Rc::new(Task {
            id,
            name: truncated(label),
            state: Cell::new(TaskState::Ready),
            future: RefCell::new(Some(Box::pin(future))),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    /// Advance the task to its next suspension point.
    pub(crate) fn poll(&self) -> Poll<()> {
        let mut slot = match self.future.try_borrow_mut() {
            Ok(slot) => slot,
            Err(_) => {
                log::error!("{} polled while already running", self.name);
                return Poll::Pending;
            }
        };

        let finished = match slot.as_mut() {
            Some(future) => {
                let waker = unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
                let mut context = Context::from_waker(&waker);
                future.as_mut().poll(&mut context).is_ready()
            }
            None => true,
        };

        if finished {
            // drop the future's state now rather than when the last handle goes
            slot.take();
            self.state.set(TaskState::Terminated);
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// A task's identity, as handed out by `Scheduler::current_task`.
#[derive(Clone)]
pub struct TaskHandle(pub(crate) TaskRef);

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn state(&self) -> TaskState {
        self.0.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.0.state() == TaskState::Terminated
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskHandle {}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Task#{}({}, {:?})", self.0.id, self.0.name, self.0.state())
    }
}

fn truncated(label: &str) -> String<16> {
    let mut name = String::new();
    for c in label.chars() {
        if name.push(c).is_err() {
            break;
        }
    }
    name
}

// Wakers are inert: the loop requeues a task from the syscall it issued,
// and a task pending without one is requeued straight away.
static VTABLE: RawWakerVTable = {
    unsafe fn clone(p: *const ()) -> RawWaker {
        RawWaker::new(p, &VTABLE)
    }
    unsafe fn wake(_: *const ()) {}
    unsafe fn wake_by_ref(_: *const ()) {}
    unsafe fn drop(_: *const ()) {}

    RawWakerVTable::new(clone, wake, wake_by_ref, drop)
};

#[cfg(test)]
mod tests {
    use core::{cell::Cell, task::Poll};

    use alloc::rc::Rc;

    use super::{Task, TaskHandle, TaskState};
    use crate::task::defer;

    #[test]
    fn poll_until_terminated() {
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let task = Task::new(1, "counter-with-a-long-name", async move {
            for _ in 0..3 {
                seen.set(seen.get() + 1);
                defer().await;
            }
        });

        assert_eq!("counter-with-a-l", task.name());
        assert_eq!(Poll::Pending, task.poll());
        assert_eq!(Poll::Pending, task.poll());
        assert_eq!(Poll::Pending, task.poll());
        assert_eq!(Poll::Ready(()), task.poll());
        assert_eq!(3, count.get());
        assert_eq!(TaskState::Terminated, task.state());
        // polling a finished task stays finished
        assert_eq!(Poll::Ready(()), task.poll());
    }

    #[test]
    fn handles_compare_by_identity() {
        let a = Task::new(1, "a", async {});
        let b = Task::new(2, "a", async {});
        assert_eq!(TaskHandle(a.clone()), TaskHandle(a));
        assert_ne!(TaskHandle(b.clone()), TaskHandle(Task::new(2, "a", async {})));
        assert_eq!(2, TaskHandle(b).id());
    }
}
