//! Requests a task hands to the loop, and what it gets back.

use core::{
    any::Any,
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use alloc::{
    boxed::Box,
    rc::Rc,
};

use crate::{
    executor::{
        task::TaskHandle,
        Scheduler,
    },
    future::Blocker,
    platform::Millis,
};

/// A request from the running task. The loop acts on it once the task's
/// poll returns `Pending`.
pub enum Syscall {
    /// Requeue the task after this many milliseconds.
    Sleep(Millis),
    /// Return from `run_forever` with this value.
    StopLoop(Box<dyn Any>),
    /// Park the task until the future resolves, or until the timeout.
    BlockUntilDone {
        future: Rc<dyn Blocker>,
        timeout: Option<Millis>,
    },
    /// Resume straight away with the task's own handle.
    GetRunningTask,
    /// Resume straight away with the scheduler.
    GetRunningLoop,
}

impl Debug for Syscall {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Syscall::Sleep(ms) => write!(f, "Sleep({})", ms),
            Syscall::StopLoop(_) => write!(f, "StopLoop"),
            Syscall::BlockUntilDone { future, timeout } => {
                write!(f, "BlockUntilDone(done={}, timeout={:?})", future.done(), timeout)
            }
            Syscall::GetRunningTask => write!(f, "GetRunningTask"),
            Syscall::GetRunningLoop => write!(f, "GetRunningLoop"),
        }
    }
}

/// What a task is resumed with.
pub enum Resume {
    /// First step of a new task.
    Start,
    /// After a plain cooperative yield.
    Yielded,
    /// After a `Sleep`.
    Woke,
    /// The future the task blocked on has resolved.
    Unblocked,
    /// The block timed out before the future resolved.
    TimedOut,
    Task(TaskHandle),
    Loop(Scheduler),
}

impl Debug for Resume {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Resume::Start => write!(f, "Start"),
            Resume::Yielded => write!(f, "Yielded"),
            Resume::Woke => write!(f, "Woke"),
            Resume::Unblocked => write!(f, "Unblocked"),
            Resume::TimedOut => write!(f, "TimedOut"),
            Resume::Task(task) => write!(f, "Task({:?})", task),
            Resume::Loop(_) => write!(f, "Loop"),
        }
    }
}

/// Issues one syscall on its first poll, then completes with whatever the
/// loop resumed the task with.
pub struct SyscallFuture {
    scheduler: Scheduler,
    call: Option<Syscall>,
}

impl SyscallFuture {
    pub(crate) fn new(scheduler: Scheduler, call: Syscall) -> Self {
        Self {
            scheduler,
            call: Some(call),
        }
    }
}

impl Future for SyscallFuture {
    type Output = Resume;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.call.take() {
            Some(call) => {
                self.scheduler.issue(call);
                Poll::Pending
            }
            None => Poll::Ready(self.scheduler.take_resume()),
        }
    }
}
