//! The event loop.
//!
//! One [`Scheduler`] owns a min-heap of `(deadline, handle)` ordered entries.
//! Each entry either calls a plain callback or steps a task. A task is an
//! ordinary `async` block; when its poll returns `Pending` the loop looks at
//! the [`Syscall`] it issued (if any) to decide when it runs again:
//!
//! * nothing: requeue now, behind work that is already due
//! * `Sleep(d)`: requeue after `d`
//! * `BlockUntilDone(f, timeout)`: park until `f` resolves or the timeout
//!   fires, whichever comes first
//! * `GetRunningTask` / `GetRunningLoop`: step again at once with the answer
//! * `StopLoop(v)`: return `v` from `run_forever`
//!
//! There is exactly one thread of control. The only place the CPU is ever
//! parked is the loop's own wait for the next deadline, and that is where
//! the [`IdleHook`] gets to run.

mod queue;
mod syscall;
mod task;

use core::{
    any::Any,
    cell::{Cell, RefCell},
    fmt::{self, Debug, Formatter},
    future::Future as CoreFuture,
};

use alloc::{
    boxed::Box,
    rc::{Rc, Weak},
    string::String,
};

pub use self::{
    queue::Handle,
    syscall::{Resume, Syscall, SyscallFuture},
    task::{TaskHandle, TaskState},
};
use self::{
    queue::{Action, TimerQueue},
    task::{Task, TaskRef},
};
use crate::{
    config::SchedulerConfig,
    error::{Error, Result},
    future::{Blocker, Future},
    platform::{Clock, IdleHook, Millis},
    task::Outcome,
};

/// Counters kept by the loop.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Task polls.
    pub steps: u64,
    /// Time spent waiting for the next deadline.
    pub idle_ms: Millis,
    pub idle_hook_runs: u32,
    /// Blocked tasks woken by their future.
    pub unblocks: u32,
    /// Blocked tasks woken by their timeout.
    pub timeouts: u32,
    /// Entries removed by `cancel`.
    pub cancelled: u32,
}

struct Inner {
    clock: Box<dyn Clock>,
    config: SchedulerConfig,
    idle_hook: RefCell<Option<Box<dyn IdleHook>>>,
    queue: RefCell<TimerQueue>,
    last_tick: Cell<u32>,
    now: Cell<Millis>,
    syscall: RefCell<Option<Syscall>>,
    resume: RefCell<Option<Resume>>,
    running: Cell<bool>,
    next_task: Cell<u64>,
    stats: Cell<Stats>,
}

/// Handle to an event loop. Clones drive the same loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

/// A handle that does not keep the loop alive.
#[derive(Clone)]
pub struct WeakScheduler(Weak<Inner>);

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Scheduler {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self::with_config(clock, SchedulerConfig::default())
    }

    pub fn with_config(clock: impl Clock + 'static, config: SchedulerConfig) -> Self {
        let tick = clock.now_ms();
        Self {
            inner: Rc::new(Inner {
                clock: Box::new(clock),
                config,
                idle_hook: RefCell::new(None),
                queue: RefCell::new(TimerQueue::default()),
                last_tick: Cell::new(tick),
                now: Cell::new(0),
                syscall: RefCell::new(None),
                resume: RefCell::new(None),
                running: Cell::new(false),
                next_task: Cell::new(0),
                stats: Cell::new(Stats::default()),
            }),
        }
    }

    pub fn set_idle_hook(&self, hook: impl IdleHook + 'static) {
        self.inner.idle_hook.replace(Some(Box::new(hook)));
    }

    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Rc::downgrade(&self.inner))
    }

    /// Milliseconds since the scheduler was created. Unlike the raw clock
    /// this never wraps.
    pub fn time(&self) -> Millis {
        let tick = self.inner.clock.now_ms();
        let last = self.inner.last_tick.replace(tick);
        let now = self.inner.now.get() + tick.wrapping_sub(last) as Millis;
        self.inner.now.set(now);
        now
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats.get()
    }

    /// Number of queued entries.
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    // ------------------------------------------------------------------------
    // scheduling
    // ------------------------------------------------------------------------

    pub fn call_at(&self, time: Millis, callback: impl FnOnce(&Scheduler) + 'static) -> Handle {
        self.schedule_at(time, Action::Call(Box::new(callback)))
    }

    pub fn call_after(&self, delay: Millis, callback: impl FnOnce(&Scheduler) + 'static) -> Handle {
        self.call_at(self.time().saturating_add(delay), callback)
    }

    pub fn call_soon(&self, callback: impl FnOnce(&Scheduler) + 'static) -> Handle {
        self.call_after(0, callback)
    }

    /// Queue a new task to start at `time`.
    pub fn spawn_at<F>(&self, time: Millis, name: &str, task: F) -> Handle
        where F: CoreFuture + 'static,
              F::Output: Outcome,
    {
        let task = self.new_task(name, task);
        self.schedule_at(time, Action::Resume(task, Resume::Start))
    }

    pub fn spawn_after<F>(&self, delay: Millis, name: &str, task: F) -> Handle
        where F: CoreFuture + 'static,
              F::Output: Outcome,
    {
        self.spawn_at(self.time().saturating_add(delay), name, task)
    }

    /// Fire-and-forget: the task starts behind everything already due.
    pub fn spawn<F>(&self, name: &str, task: F) -> Handle
        where F: CoreFuture + 'static,
              F::Output: Outcome,
    {
        self.spawn_after(0, name, task)
    }

    /// Remove a queued entry that has not run yet. Returns how many entries
    /// were removed; stale and repeated handles remove nothing.
    pub fn cancel(&self, handle: Handle) -> usize {
        let removed = self.inner.queue.borrow_mut().cancel(handle);
        if removed > 0 {
            log::trace!("cancelled {:?}", handle);
            self.bump(|s| s.cancelled += removed as u32);
        }
        removed
    }

    /// Drop everything still queued.
    pub fn close(&self) {
        self.inner.queue.borrow_mut().clear();
    }

    fn new_task<F>(&self, name: &str, task: F) -> TaskRef
        where F: CoreFuture + 'static,
              F::Output: Outcome,
    {
        let id = self.inner.next_task.get() + 1;
        self.inner.next_task.set(id);
        let label = String::from(name);
        Task::new(id, name, async move { task.await.report(&label) })
    }

    fn schedule_at(&self, time: Millis, action: Action) -> Handle {
        let handle = self.inner.queue.borrow_mut().push(time, action);
        log::trace!("scheduled {:?} for {}", handle, time);
        handle
    }

    fn resume_soon(&self, task: TaskRef, resume: Resume) {
        task.set_state(TaskState::Ready);
        let now = self.time();
        self.schedule_at(now, Action::Resume(task, resume));
    }

    fn bump(&self, update: impl FnOnce(&mut Stats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }

    // ------------------------------------------------------------------------
    // running
    // ------------------------------------------------------------------------

    /// Run queued work until some task issues `StopLoop`, and return the
    /// value it carried. Whatever is still queued stays queued.
    ///
    /// When the queue is empty the loop keeps waiting for interrupts; only
    /// a `StopLoop` ends it.
    pub fn run_forever(&self) -> Result<Box<dyn Any>> {
        if self.inner.running.replace(true) {
            log::error!("loop is already running");
            return Err(Error::InvalidState);
        }
        log::debug!("loop running");

        let mut starved = false;
        let value = loop {
            let next = self.inner.queue.borrow_mut().pop();
            let entry = match next {
                Some(entry) => entry,
                None => {
                    if !starved {
                        log::debug!("nothing queued, waiting");
                        starved = true;
                    }
                    self.inner.clock.wait_for_interrupt();
                    // keep the timeline current across long empty stretches
                    self.time();
                    continue;
                }
            };
            starved = false;

            self.idle_until(entry.deadline);
            match entry.action {
                Action::Call(callback) => callback(self),
                Action::Resume(task, resume) => {
                    if let Some(value) = self.step(task, resume) {
                        break value;
                    }
                }
            }
        };

        self.inner.running.set(false);
        log::debug!("loop stopped");
        Ok(value)
    }

    /// Run `task` as a new task and drive the loop until it completes.
    pub fn run_until_complete<F>(&self, task: F) -> Result<F::Output>
        where F: CoreFuture + 'static,
              F::Output: 'static,
    {
        let scheduler = self.clone();
        self.spawn("main", async move {
            let value = task.await;
            scheduler.stop(value).await
        });
        let value = self.run_forever()?;
        // someone else stopped the loop with a value of another type
        value.downcast::<F::Output>().map(|v| *v).map_err(|_| Error::Stopped)
    }

    fn idle_until(&self, deadline: Millis) {
        let now = self.time();
        if deadline <= now {
            return;
        }
        let budget = deadline - now;
        if budget >= self.inner.config.idle_hook_threshold_ms {
            if let Some(hook) = self.inner.idle_hook.borrow_mut().as_mut() {
                hook.on_idle(budget);
                self.bump(|s| s.idle_hook_runs += 1);
            }
        }
        while self.time() < deadline {
            self.inner.clock.wait_for_interrupt();
        }
        self.bump(|s| s.idle_ms += budget);
    }

    /// Poll `task` once and act on its syscall. Returns the loop's result
    /// if the task stopped it.
    fn step(&self, task: TaskRef, mut resume: Resume) -> Option<Box<dyn Any>> {
        loop {
            log::trace!("stepping {} with {:?}", task.name(), resume);
            self.inner.resume.replace(Some(resume));
            task.set_state(TaskState::Running);
            self.bump(|s| s.steps += 1);

            let poll = task.poll();
            self.inner.resume.replace(None);
            let call = self.inner.syscall.borrow_mut().take();

            if poll.is_ready() {
                if let Some(call) = call {
                    log::warn!("{} finished with {:?} outstanding", task.name(), call);
                }
                return None;
            }

            match call {
                None => {
                    self.resume_soon(task, Resume::Yielded);
                    return None;
                }
                Some(Syscall::Sleep(ms)) => {
                    task.set_state(TaskState::Sleeping);
                    let at = self.time().saturating_add(ms);
                    self.schedule_at(at, Action::Resume(task, Resume::Woke));
                    return None;
                }
                Some(Syscall::BlockUntilDone { future, timeout }) => {
                    self.block(task, future, timeout);
                    return None;
                }
                Some(Syscall::StopLoop(value)) => {
                    log::debug!("{} stopped the loop", task.name());
                    task.set_state(TaskState::Terminated);
                    return Some(value);
                }
                Some(Syscall::GetRunningTask) => resume = Resume::Task(TaskHandle(task.clone())),
                Some(Syscall::GetRunningLoop) => resume = Resume::Loop(self.clone()),
            }
        }
    }

    /// Park `task` on `future`. Exactly one of the unblocking callback and
    /// the timeout gets to requeue it; each disarms the other.
    fn block(&self, task: TaskRef, future: Rc<dyn Blocker>, timeout: Option<Millis>) {
        task.set_state(TaskState::Blocked);
        let timer: Rc<Cell<Option<Handle>>> = Rc::new(Cell::new(None));

        let scheduler = self.downgrade();
        let waiter = task.clone();
        let armed = timer.clone();
        let id = future.add_unblocking_callback(Box::new(move || {
            if let Some(scheduler) = scheduler.upgrade() {
                if let Some(handle) = armed.take() {
                    scheduler.cancel(handle);
                }
                scheduler.bump(|s| s.unblocks += 1);
                scheduler.resume_soon(waiter, Resume::Unblocked);
            }
        }));

        if let Some(timeout) = timeout {
            let handle = self.call_after(timeout, move |scheduler| {
                future.remove_unblocking_callback(id);
                log::trace!("{} timed out", task.name());
                scheduler.bump(|s| s.timeouts += 1);
                scheduler.resume_soon(task, Resume::TimedOut);
            });
            timer.set(Some(handle));
        }
    }

    // ------------------------------------------------------------------------
    // syscalls, from the task's side
    // ------------------------------------------------------------------------

    pub(crate) fn issue(&self, call: Syscall) {
        if let Some(previous) = self.inner.syscall.replace(Some(call)) {
            log::warn!("syscall {:?} replaced before the loop saw it", previous);
        }
    }

    pub(crate) fn take_resume(&self) -> Resume {
        self.inner.resume.borrow_mut().take().unwrap_or(Resume::Yielded)
    }

    /// Issue a raw syscall; completes with what the loop resumes the task
    /// with. Only meaningful inside a task run by this scheduler.
    pub fn syscall(&self, call: Syscall) -> SyscallFuture {
        SyscallFuture::new(self.clone(), call)
    }

    pub async fn sleep(&self, ms: Millis) {
        self.syscall(Syscall::Sleep(ms)).await;
    }

    /// Make `run_forever` return `value`. The calling task is not resumed.
    pub async fn stop<T: 'static>(&self, value: T) {
        self.syscall(Syscall::StopLoop(Box::new(value))).await;
    }

    pub async fn current_task(&self) -> TaskHandle {
        loop {
            if let Resume::Task(task) = self.syscall(Syscall::GetRunningTask).await {
                return task;
            }
        }
    }

    pub async fn running_loop(&self) -> Scheduler {
        loop {
            if let Resume::Loop(scheduler) = self.syscall(Syscall::GetRunningLoop).await {
                return scheduler;
            }
        }
    }

    /// Wait for `future` to resolve, for at most `timeout` if given.
    /// An already resolved future returns without suspending.
    pub async fn wait_for<T: Clone + 'static>(&self, future: &Future<T>, timeout: Option<Millis>) -> Result<T> {
        while !future.done() {
            let call = Syscall::BlockUntilDone {
                future: future.as_blocker(),
                timeout,
            };
            if let Resume::TimedOut = self.syscall(call).await {
                return Err(Error::Timeout);
            }
        }
        future.result()
    }

    /// Drive `task` to completion. Without a timeout this is a direct call.
    /// With one, `task` runs as its own task; if it times out it keeps
    /// running in the background and its result is discarded.
    pub async fn wait_for_task<F>(&self, task: F, timeout: Option<Millis>) -> Result<F::Output>
        where F: CoreFuture + 'static,
              F::Output: Clone + 'static,
    {
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => return Ok(task.await),
        };
        let finished = Future::new(self);
        let setter = finished.clone();
        self.spawn("wait_for", async move { setter.set_result(task.await) });
        self.wait_for(&finished, Some(timeout)).await
    }

    /// Delegate to `sub` as a subroutine: it runs inside the caller's own
    /// steps, without a trip through the queue. Contrast with `spawn`.
    pub async fn call<F: CoreFuture>(&self, sub: F) -> F::Output {
        sub.await
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Scheduler@{:?}", Rc::as_ptr(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};

    use alloc::{rc::Rc, vec::Vec};
    use simple_logger::SimpleLogger;

    use super::{Scheduler, TaskState};
    use crate::{
        error::Error,
        future::Future,
        platform::{ManualClock, Millis},
        task::defer,
    };

    fn setup() -> (Scheduler, ManualClock) {
        let _ = SimpleLogger::new().init();
        let clock = ManualClock::new();
        (Scheduler::new(clock.clone()), clock)
    }

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn equal_deadlines_run_in_scheduling_order() {
        let (sched, _) = setup();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 1..=8 {
            let o = order.clone();
            if i % 2 == 0 {
                sched.call_after(0, move |_| o.borrow_mut().push(i));
            } else {
                sched.spawn("worker", async move { o.borrow_mut().push(i) });
            }
        }
        sched.run_until_complete(async {}).unwrap();
        assert_eq!(*order.borrow(), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn sleep_resumes_on_time() {
        let (sched, _) = setup();
        let s = sched.clone();
        let slept = sched
            .run_until_complete(async move {
                let t0 = s.time();
                s.sleep(10).await;
                s.time() - t0
            })
            .unwrap();
        assert!((10..=12).contains(&slept), "slept {}", slept);
        assert!(sched.stats().idle_ms >= 10);
    }

    #[test]
    fn sleepers_wake_in_deadline_order() {
        let (sched, _) = setup();
        let order = log();
        for (name, ms) in [("slow", 30), ("fast", 10), ("mid", 20)] {
            let s = sched.clone();
            let o = order.clone();
            sched.spawn(name, async move {
                s.sleep(ms).await;
                o.borrow_mut().push(name);
            });
        }
        let s = sched.clone();
        sched.run_until_complete(async move { s.sleep(40).await }).unwrap();
        assert_eq!(*order.borrow(), ["fast", "mid", "slow"]);
    }

    #[test]
    fn wait_for_returns_result_and_disarms_timeout() {
        let (sched, _) = setup();
        let fut = Future::new(&sched);

        let s = sched.clone();
        let resolver = fut.clone();
        sched.spawn("resolver", async move {
            s.sleep(5).await;
            resolver.set_result(42)
        });

        let s = sched.clone();
        let f = fut.clone();
        let woken = sched
            .run_until_complete(async move {
                let v = s.wait_for(&f, Some(20)).await;
                (v, s.time())
            })
            .unwrap();

        assert_eq!(Ok(42), woken.0);
        assert!(woken.1 < 20);
        let stats = sched.stats();
        assert_eq!(1, stats.unblocks);
        assert_eq!(0, stats.timeouts);
        assert_eq!(1, stats.cancelled);
        // the losing timeout is gone from the queue
        assert_eq!(0, sched.pending());
    }

    #[test]
    fn wait_for_times_out_and_late_result_is_inert() {
        let (sched, _) = setup();
        let fut = Future::new(&sched);
        let resumes = Rc::new(Cell::new(0));

        let s = sched.clone();
        let resolver = fut.clone();
        sched.spawn("resolver", async move {
            s.sleep(30).await;
            resolver.set_result(1)
        });

        let s = sched.clone();
        let f = fut.clone();
        let r = resumes.clone();
        let (result, at, done) = sched
            .run_until_complete(async move {
                let result = s.wait_for(&f, Some(10)).await;
                r.set(r.get() + 1);
                let at = s.time();
                s.sleep(40).await;
                (result, at, f.done())
            })
            .unwrap();

        assert_eq!(Err(Error::Timeout), result);
        assert!((10..=11).contains(&at), "timed out at {}", at);
        assert!(done);
        assert_eq!(1, resumes.get());
        let stats = sched.stats();
        assert_eq!(1, stats.timeouts);
        assert_eq!(0, stats.unblocks);
    }

    #[test]
    fn timeout_of_one_waiter_leaves_other_waiters_armed() {
        let (sched, _) = setup();
        let fut = Future::new(&sched);
        let patient = Rc::new(RefCell::new(None));

        let s = sched.clone();
        let f = fut.clone();
        let p = patient.clone();
        sched.spawn("patient", async move {
            *p.borrow_mut() = Some(s.wait_for(&f, None).await);
        });

        let s = sched.clone();
        let f = fut.clone();
        let hasty = sched
            .run_until_complete(async move {
                let hasty = s.wait_for(&f, Some(5)).await;
                f.set_result("late").unwrap();
                s.sleep(1).await;
                hasty
            })
            .unwrap();

        assert_eq!(Err(Error::Timeout), hasty);
        assert_eq!(Some(Ok("late")), *patient.borrow());
    }

    #[test]
    fn wait_for_resolved_future_does_not_suspend() {
        let (sched, _) = setup();
        let fut = Future::new(&sched);
        fut.set_result(5u8).unwrap();
        let order = log();

        let s = sched.clone();
        let o = order.clone();
        let value = sched
            .run_until_complete(async move {
                let other = o.clone();
                s.spawn("other", async move { other.borrow_mut().push("other") });
                o.borrow_mut().push("before");
                let v = s.wait_for(&fut, Some(0)).await;
                o.borrow_mut().push("after");
                v
            })
            .unwrap();

        assert_eq!(Ok(5), value);
        assert_eq!(*order.borrow(), ["before", "after"]);
    }

    #[test]
    fn cancel_twice_and_after_firing() {
        let (sched, _) = setup();
        let fired = Rc::new(Cell::new(0));

        let f = fired.clone();
        let later = sched.call_after(10, move |_| f.set(f.get() + 10));
        assert_eq!(1, sched.cancel(later));
        assert_eq!(0, sched.cancel(later));

        let f = fired.clone();
        let soon = sched.call_soon(move |_| f.set(f.get() + 1));
        let s = sched.clone();
        sched.run_until_complete(async move { s.sleep(20).await }).unwrap();

        assert_eq!(0, sched.cancel(soon));
        assert_eq!(1, fired.get());
        assert_eq!(1, sched.stats().cancelled);
    }

    #[test]
    fn spawned_child_queues_but_called_sub_runs_inline() {
        let (sched, _) = setup();
        let order = log();

        let s = sched.clone();
        let o = order.clone();
        sched.spawn("parent", async move {
            o.borrow_mut().push("parent-start");
            let child = o.clone();
            s.spawn("child", async move { child.borrow_mut().push("child") });
            let sub = o.clone();
            s.call(async move { sub.borrow_mut().push("sub") }).await;
            o.borrow_mut().push("parent-after-call");
            defer().await;
            o.borrow_mut().push("parent-end");
        });
        let o = order.clone();
        sched.spawn("other", async move { o.borrow_mut().push("other") });

        let s = sched.clone();
        sched.run_until_complete(async move { s.sleep(1).await }).unwrap();
        assert_eq!(
            *order.borrow(),
            ["parent-start", "sub", "parent-after-call", "other", "child", "parent-end"]
        );
    }

    #[test]
    fn running_task_and_loop_are_reported() {
        let (sched, _) = setup();
        let s = sched.clone();
        let (me, same_loop) = sched
            .run_until_complete(async move {
                let me = s.current_task().await;
                assert_eq!(TaskState::Running, me.state());
                let l = s.running_loop().await;
                (me, l == s)
            })
            .unwrap();
        assert_eq!("main", me.name());
        assert!(same_loop);
        assert!(me.is_terminated());
    }

    #[test]
    fn stop_loop_leaves_queue_untouched() {
        let (sched, _) = setup();
        let s = sched.clone();
        sched.spawn("sleeper", async move { s.sleep(100).await });
        let s = sched.clone();
        sched.spawn("stopper", async move {
            defer().await;
            s.stop(7u32).await
        });

        let value = sched.run_forever().unwrap();
        assert_eq!(Some(&7u32), value.downcast_ref::<u32>());
        assert_eq!(1, sched.pending());
        assert!(sched.time() < 100);
    }

    #[test]
    fn loop_stopped_by_someone_else() {
        let (sched, _) = setup();
        let s = sched.clone();
        sched.spawn("stopper", async move { s.stop("elsewhere").await });
        let s = sched.clone();
        let result = sched.run_until_complete(async move {
            s.sleep(50).await;
            1u32
        });
        assert_eq!(Err(Error::Stopped), result);
    }

    #[test]
    fn failed_task_does_not_disturb_others() {
        let (sched, _) = setup();
        sched.spawn("doomed", async { Err::<(), _>(Error::Timeout) });
        let s = sched.clone();
        let out = sched
            .run_until_complete(async move {
                s.sleep(2).await;
                "survived"
            })
            .unwrap();
        assert_eq!("survived", out);
    }

    #[test]
    fn idle_hook_runs_only_for_long_waits() {
        let (sched, _) = setup();
        let budgets = Rc::new(RefCell::new(Vec::new()));
        let b = budgets.clone();
        sched.set_idle_hook(move |budget: Millis| b.borrow_mut().push(budget));

        let s = sched.clone();
        sched
            .run_until_complete(async move {
                s.sleep(3).await;
                s.sleep(20).await;
            })
            .unwrap();
        assert_eq!(*budgets.borrow(), [20]);
        assert_eq!(1, sched.stats().idle_hook_runs);
    }

    #[test]
    fn timeline_survives_clock_wrap() {
        let _ = SimpleLogger::new().init();
        let clock = ManualClock::starting_at(u32::MAX - 3);
        let sched = Scheduler::new(clock);
        let s = sched.clone();
        let elapsed = sched
            .run_until_complete(async move {
                s.sleep(10).await;
                s.time()
            })
            .unwrap();
        assert!((10..=12).contains(&elapsed));
    }

    #[test]
    fn wait_for_task_with_and_without_timeout() {
        let (sched, _) = setup();
        let s = sched.clone();
        let (direct, quick, slow) = sched
            .run_until_complete(async move {
                let direct = s.wait_for_task(async { 1 }, None).await;
                let t = s.clone();
                let quick = s
                    .wait_for_task(
                        async move {
                            t.sleep(5).await;
                            2
                        },
                        Some(50),
                    )
                    .await;
                let t = s.clone();
                let slow = s
                    .wait_for_task(
                        async move {
                            t.sleep(50).await;
                            3
                        },
                        Some(10),
                    )
                    .await;
                (direct, quick, slow)
            })
            .unwrap();
        assert_eq!(Ok(1), direct);
        assert_eq!(Ok(2), quick);
        assert_eq!(Err(Error::Timeout), slow);
    }

    #[test]
    fn nested_run_is_refused() {
        let (sched, _) = setup();
        let s = sched.clone();
        let nested = sched
            .run_until_complete(async move { s.run_forever().err() })
            .unwrap();
        assert_eq!(Some(Error::InvalidState), nested);
    }

    #[test]
    fn huge_timeouts_saturate_instead_of_overflowing() {
        let (sched, _) = setup();
        let s = sched.clone();
        sched.spawn("forever", async move { s.sleep(Millis::MAX).await });

        let s = sched.clone();
        let result = sched
            .run_until_complete(async move {
                s.sleep(1).await;
                let future = Future::new(&s);
                let setter = future.clone();
                s.call_after(5, move |_| setter.set_result(7).unwrap());
                s.wait_for(&future, Some(Millis::MAX)).await
            })
            .unwrap();
        assert_eq!(Ok(7), result);
        assert_eq!(1, sched.stats().cancelled);
        // only the endless sleeper is left
        assert_eq!(1, sched.pending());
    }

    // A clock whose every wait spans a quarter of the raw tick range, with
    // an "interrupt" that queues work after a set number of waits.
    #[derive(Clone, Default)]
    struct JumpClock {
        now: Rc<Cell<u32>>,
        waits: Rc<Cell<u32>>,
        wake: Rc<RefCell<Option<super::WeakScheduler>>>,
        seen: Rc<Cell<Millis>>,
    }

    impl crate::platform::Clock for JumpClock {
        fn now_ms(&self) -> u32 {
            self.now.get()
        }

        fn wait_for_interrupt(&self) {
            self.now.set(self.now.get().wrapping_add(1 << 30));
            self.waits.set(self.waits.get() + 1);
            if self.waits.get() == 6 {
                let sched = self.wake.borrow().as_ref().and_then(|w| w.upgrade());
                if let Some(sched) = sched {
                    let s = sched.clone();
                    let seen = self.seen.clone();
                    sched.spawn("irq", async move {
                        seen.set(s.time());
                        s.stop(()).await
                    });
                }
            }
        }
    }

    #[test]
    fn empty_queue_keeps_the_timeline() {
        let _ = SimpleLogger::new().init();
        let clock = JumpClock::default();
        let sched = Scheduler::new(clock.clone());
        clock.wake.replace(Some(sched.downgrade()));

        sched.run_forever().unwrap();
        let expected: Millis = 6 << 30;
        assert_eq!(expected, clock.seen.get());
        assert_eq!(expected, sched.time());
    }
}
