//! Helpers for code running inside a task.

use core::fmt::Debug;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

/// Used within an async context to yield to other tasks without any
/// delay. Not named 'yield' because keywordness causes ugliness.
///
/// The task goes to the back of the work that is already due.
pub async fn defer() {
    struct Defer {
        yielded: bool,
    }

    impl Future for Defer {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.yielded {
                Poll::Ready(())
            } else {
                // pending without a syscall: the loop requeues us
                self.yielded = true;
                Poll::Pending
            }
        }
    }

    Defer { yielded: false }.await
}

/// How a finished task reports back. A task may end in `()` or in a
/// `Result`; errors are logged and the task is dropped, nothing else is
/// disturbed.
pub trait Outcome {
    fn report(self, task: &str);
}

impl Outcome for () {
    fn report(self, task: &str) {
        log::debug!("{} finished", task);
    }
}

impl<T, E: Debug> Outcome for Result<T, E> {
    fn report(self, task: &str) {
        match self {
            Ok(_) => log::debug!("{} finished", task),
            Err(e) => log::warn!("{} failed: {:?}", task, e),
        }
    }
}
