//! Structured-concurrency runtime: scopes, task handles, channels, mutexes,
//! dispatchers.
//!
//! `async`/`launch` post work to a dispatcher-selected worker; the submitting
//! thread blocks at suspension points (`await`, `get`, `join`, `receive`,
//! timeouts, `delay`). Blocking waits poll in short slices so cancellation
//! and time quotas are observed without dedicated wakeup plumbing.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex, OnceLock,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{Error, RunResult},
    value::Value,
};

/// Poll slice for blocking waits; short enough that cancellation is prompt.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Cancellation/deadline context threaded into every blocking wait.
#[derive(Debug, Clone)]
pub struct WaitCx {
    /// The waiting task's cancel flag.
    pub cancel: Arc<AtomicBool>,
    /// Evaluation deadline from `maxExecutionTimeMs`, if any.
    pub deadline: Option<Instant>,
}

impl WaitCx {
    /// Checks cancellation and the evaluation deadline.
    pub fn check(&self) -> RunResult<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(Error::cancelled("task was cancelled"));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Error::quota("execution time limit exceeded"));
            }
        }
        Ok(())
    }
}

// --- task handles ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Value-producing (`async` -> Deferred).
    Deferred,
    /// Fire-and-forget (`launch` -> Job).
    Job,
}

#[derive(Debug)]
enum TaskState {
    Pending,
    Done(Value),
    Failed(Error),
    Cancelled,
}

/// Shared completion state of one spawned task.
#[derive(Debug)]
pub struct TaskHandle {
    kind: TaskKind,
    state: Mutex<TaskState>,
    cond: Condvar,
    cancel: Arc<AtomicBool>,
}

impl TaskHandle {
    #[must_use]
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            state: Mutex::new(TaskState::Pending),
            cond: Condvar::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The flag the task's own VM observes at checkpoints.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn complete(&self, value: Value) {
        let mut state = self.state.lock().expect("task state lock");
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Done(value);
        }
        self.cond.notify_all();
    }

    pub fn fail(&self, error: Error) {
        let mut state = self.state.lock().expect("task state lock");
        if matches!(*state, TaskState::Pending) {
            *state = if error.kind() == crate::ErrorKind::CancellationError {
                TaskState::Cancelled
            } else {
                TaskState::Failed(error)
            };
        }
        self.cond.notify_all();
    }

    /// Requests cancellation; observable at the task's next checkpoint, and
    /// immediately via `isCancelled`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        let mut state = self.state.lock().expect("task state lock");
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Cancelled;
        }
        self.cond.notify_all();
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.state.lock().expect("task state lock"), TaskState::Pending)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(*self.state.lock().expect("task state lock"), TaskState::Done(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock().expect("task state lock"), TaskState::Cancelled)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock().expect("task state lock"), TaskState::Pending)
    }

    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        match &*self.state.lock().expect("task state lock") {
            TaskState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Blocks until terminal, rethrowing failures (`get`/`await`/`join`).
    pub fn wait_value(&self, waiter: &WaitCx) -> RunResult<Value> {
        let mut state = self.state.lock().expect("task state lock");
        loop {
            match &*state {
                TaskState::Done(value) => return Ok(value.clone()),
                TaskState::Failed(error) => return Err(error.clone()),
                TaskState::Cancelled => return Err(Error::cancelled("task was cancelled")),
                TaskState::Pending => {
                    waiter.check()?;
                    let (next, _) = self.cond.wait_timeout(state, WAIT_SLICE).expect("task state lock");
                    state = next;
                }
            }
        }
    }

    /// Blocks until terminal without rethrowing (scope child accounting).
    pub fn wait_terminal(&self, deadline: Option<Instant>) -> RunResult<()> {
        let mut state = self.state.lock().expect("task state lock");
        while matches!(*state, TaskState::Pending) {
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    return Err(Error::quota("execution time limit exceeded"));
                }
            }
            let (next, _) = self.cond.wait_timeout(state, WAIT_SLICE).expect("task state lock");
            state = next;
        }
        Ok(())
    }
}

// --- scopes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Active,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

/// A node in the structured-concurrency scope tree.
#[derive(Debug)]
pub struct TaskScope {
    pub parent: Option<Arc<TaskScope>>,
    pub is_supervisor: bool,
    pub dispatcher: Dispatcher,
    children: Mutex<Vec<Arc<TaskHandle>>>,
    state: Mutex<ScopeState>,
    cancel_flag: Arc<AtomicBool>,
    first_error: Mutex<Option<Error>>,
}

impl TaskScope {
    #[must_use]
    pub fn root(dispatcher: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            is_supervisor: true,
            dispatcher,
            children: Mutex::new(Vec::new()),
            state: Mutex::new(ScopeState::Active),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            first_error: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn child(parent: &Arc<Self>, is_supervisor: bool, dispatcher: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(parent)),
            is_supervisor,
            dispatcher,
            children: Mutex::new(Vec::new()),
            state: Mutex::new(ScopeState::Active),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            first_error: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        *self.state.lock().expect("scope state lock")
    }

    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Registers a new task; fails when the scope is already cancelled.
    pub fn add_child(&self, handle: Arc<TaskHandle>) -> RunResult<()> {
        let state = self.state();
        if matches!(state, ScopeState::Cancelled | ScopeState::Cancelling) {
            return Err(Error::cancelled("scope is cancelled"));
        }
        self.children.lock().expect("scope children lock").push(handle);
        Ok(())
    }

    /// Reports a child failure. Non-supervisor scopes record the first error
    /// and cancel the siblings; supervisors isolate it.
    pub fn child_failed(&self, error: Error) {
        if self.is_supervisor {
            return;
        }
        let mut first = self.first_error.lock().expect("scope error lock");
        match &mut *first {
            None => {
                *first = Some(error);
                drop(first);
                *self.state.lock().expect("scope state lock") = ScopeState::Cancelling;
                self.cancel_flag.store(true, Ordering::Release);
                for child in self.children.lock().expect("scope children lock").iter() {
                    child.cancel();
                }
            }
            Some(primary) => primary.suppress(error),
        }
    }

    /// Explicit `scope.cancel()`: cancels all children, including through a
    /// supervisor boundary.
    pub fn cancel(&self) {
        *self.state.lock().expect("scope state lock") = ScopeState::Cancelled;
        self.cancel_flag.store(true, Ordering::Release);
        for child in self.children.lock().expect("scope children lock").iter() {
            child.cancel();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.state(), ScopeState::Cancelled | ScopeState::Cancelling)
    }

    /// Waits for every started task to terminate (children may keep being
    /// added while waiting), then applies the failure policy: non-supervisor
    /// scopes rethrow the first child failure with later ones suppressed.
    pub fn wait_children(&self, deadline: Option<Instant>) -> RunResult<()> {
        let mut seen = 0;
        loop {
            let next = {
                let children = self.children.lock().expect("scope children lock");
                children.get(seen).cloned()
            };
            match next {
                Some(child) => {
                    child.wait_terminal(deadline)?;
                    seen += 1;
                }
                None => break,
            }
        }
        let first = self.first_error.lock().expect("scope error lock").take();
        let mut state = self.state.lock().expect("scope state lock");
        match first {
            Some(error) if !self.is_supervisor => {
                *state = ScopeState::Failed;
                Err(error)
            }
            _ => {
                if !matches!(*state, ScopeState::Cancelled) {
                    *state = ScopeState::Completed;
                }
                Ok(())
            }
        }
    }
}

// --- channels ---

/// Bounded FIFO channel; capacity 0 is a rendezvous.
#[derive(Debug)]
pub struct ChannelValue {
    capacity: usize,
    queue: Mutex<VecDeque<Value>>,
    closed: AtomicBool,
    cond: Condvar,
}

impl ChannelValue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            cond: Condvar::new(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().expect("channel lock").is_empty()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.lock().expect("channel lock").len()
    }

    /// Blocks while full; fails once closed.
    pub fn send(&self, value: Value, waiter: &WaitCx) -> RunResult<()> {
        let slots = self.capacity.max(1);
        let mut queue = self.queue.lock().expect("channel lock");
        loop {
            if self.is_closed() {
                return Err(Error::channel_closed("send on closed channel"));
            }
            if queue.len() < slots {
                queue.push_back(value);
                self.cond.notify_all();
                break;
            }
            waiter.check()?;
            let (next, _) = self.cond.wait_timeout(queue, WAIT_SLICE).expect("channel lock");
            queue = next;
        }
        // Rendezvous: the send completes when a receiver takes the item.
        if self.capacity == 0 {
            while !queue.is_empty() && !self.is_closed() {
                waiter.check()?;
                let (next, _) = self.cond.wait_timeout(queue, WAIT_SLICE).expect("channel lock");
                queue = next;
            }
        }
        Ok(())
    }

    /// Blocks while empty; fails when closed and drained.
    pub fn receive(&self, waiter: &WaitCx) -> RunResult<Value> {
        match self.receive_inner(waiter, None)? {
            Some(value) => Ok(value),
            None => Err(Error::channel_closed("receive on closed channel")),
        }
    }

    /// Returns null-equivalent `None` immediately when empty.
    pub fn try_receive(&self) -> Option<Value> {
        let mut queue = self.queue.lock().expect("channel lock");
        let value = queue.pop_front();
        if value.is_some() {
            self.cond.notify_all();
        }
        value
    }

    /// Like `receive` but fails with `TimeoutError` after `ms`.
    pub fn receive_timeout(&self, ms: u64, waiter: &WaitCx) -> RunResult<Value> {
        let deadline = Instant::now() + Duration::from_millis(ms);
        match self.receive_inner(waiter, Some(deadline))? {
            Some(value) => Ok(value),
            None => Err(Error::channel_closed("receive on closed channel")),
        }
    }

    /// Blocking receive driving channel iteration: `Ok(None)` means closed
    /// and drained (normal loop exit).
    pub fn receive_or_closed(&self, waiter: &WaitCx) -> RunResult<Option<Value>> {
        self.receive_inner(waiter, None)
    }

    fn receive_inner(&self, waiter: &WaitCx, timeout_at: Option<Instant>) -> RunResult<Option<Value>> {
        let mut queue = self.queue.lock().expect("channel lock");
        loop {
            if let Some(value) = queue.pop_front() {
                self.cond.notify_all();
                return Ok(Some(value));
            }
            if self.is_closed() {
                return Ok(None);
            }
            if let Some(at) = timeout_at {
                if Instant::now() > at {
                    return Err(Error::timeout("receive timed out"));
                }
            }
            waiter.check()?;
            let (next, _) = self.cond.wait_timeout(queue, WAIT_SLICE).expect("channel lock");
            queue = next;
        }
    }

    /// No further sends; pending items remain receivable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cond.notify_all();
    }
}

// --- mutex ---

/// Non-reentrant mutex value.
#[derive(Debug, Default)]
pub struct MutexValue {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl MutexValue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, waiter: &WaitCx) -> RunResult<()> {
        let mut locked = self.locked.lock().expect("mutex state lock");
        while *locked {
            waiter.check()?;
            let (next, _) = self.cond.wait_timeout(locked, WAIT_SLICE).expect("mutex state lock");
            locked = next;
        }
        *locked = true;
        Ok(())
    }

    pub fn unlock(&self) -> RunResult<()> {
        let mut locked = self.locked.lock().expect("mutex state lock");
        if !*locked {
            return Err(Error::type_error("unlock of an unlocked mutex"));
        }
        *locked = false;
        self.cond.notify_all();
        Ok(())
    }

    #[must_use]
    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock().expect("mutex state lock");
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        *self.locked.lock().expect("mutex state lock")
    }
}

// --- dispatchers ---

/// Opaque execution-resource selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatcher {
    /// Unbounded: one host thread per task.
    Io,
    /// CPU-sized fixed worker pool.
    Default,
    /// Runs inline on the submitting thread.
    Unconfined,
}

type PoolJob = Box<dyn FnOnce() + Send + 'static>;

struct ThreadPool {
    sender: mpsc::Sender<PoolJob>,
}

static DEFAULT_POOL: OnceLock<ThreadPool> = OnceLock::new();

fn default_pool() -> &'static ThreadPool {
    DEFAULT_POOL.get_or_init(|| {
        let workers = thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        let (sender, receiver) = mpsc::channel::<PoolJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        for i in 0..workers {
            let receiver = Arc::clone(&receiver);
            thread::Builder::new()
                .name(format!("nova-worker-{i}"))
                .stack_size(8 * 1024 * 1024)
                .spawn(move || {
                    loop {
                        let job = {
                            let guard = receiver.lock().expect("pool receiver lock");
                            guard.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawn pool worker");
        }
        ThreadPool { sender }
    })
}

impl Dispatcher {
    /// Submits a job. `Unconfined` runs it before returning.
    pub fn spawn(self, job: impl FnOnce() + Send + 'static) {
        match self {
            Self::Io => {
                thread::Builder::new()
                    .name("nova-io".to_owned())
                    .stack_size(8 * 1024 * 1024)
                    .spawn(job)
                    .expect("spawn io worker");
            }
            Self::Default => {
                default_pool().sender.send(Box::new(job)).expect("pool alive");
            }
            Self::Unconfined => job(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter() -> WaitCx {
        WaitCx {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    #[test]
    fn channel_fifo_single_producer_consumer() {
        let channel = Arc::new(ChannelValue::new(16));
        let sender = Arc::clone(&channel);
        let producer = thread::spawn(move || {
            let w = waiter();
            for i in 0..100 {
                sender.send(Value::Int(i), &w).unwrap();
            }
            sender.close();
        });
        let w = waiter();
        let mut received = Vec::new();
        while let Some(v) = channel.receive_or_closed(&w).unwrap() {
            received.push(v);
        }
        producer.join().unwrap();
        let expected: Vec<Value> = (0..100).map(Value::Int).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn closed_channel_keeps_pending_items_receivable() {
        let channel = ChannelValue::new(4);
        let w = waiter();
        channel.send(Value::Int(1), &w).unwrap();
        channel.close();
        assert!(channel.send(Value::Int(2), &w).is_err());
        assert_eq!(channel.receive(&w).unwrap(), Value::Int(1));
        assert_eq!(
            channel.receive(&w).unwrap_err().kind(),
            crate::ErrorKind::ChannelClosedError
        );
    }

    #[test]
    fn receive_timeout_fires() {
        let channel = ChannelValue::new(1);
        let w = waiter();
        let err = channel.receive_timeout(20, &w).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TimeoutError);
    }

    #[test]
    fn mutex_is_not_reentrant() {
        let mutex = MutexValue::new();
        let w = waiter();
        mutex.lock(&w).unwrap();
        assert!(!mutex.try_lock());
        mutex.unlock().unwrap();
        assert!(mutex.try_lock());
    }

    #[test]
    fn scope_failure_cancels_siblings_and_rethrows_first() {
        let root = TaskScope::root(Dispatcher::Io);
        let scope = TaskScope::child(&root, false, Dispatcher::Io);
        let ok = Arc::new(TaskHandle::new(TaskKind::Deferred));
        let bad = Arc::new(TaskHandle::new(TaskKind::Deferred));
        scope.add_child(Arc::clone(&ok)).unwrap();
        scope.add_child(Arc::clone(&bad)).unwrap();
        bad.fail(Error::type_error("boom"));
        scope.child_failed(Error::type_error("boom"));
        assert!(ok.is_cancelled());
        ok.fail(Error::cancelled("task was cancelled"));
        let err = scope.wait_children(None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TypeError);
    }

    #[test]
    fn supervisor_isolates_child_failure() {
        let root = TaskScope::root(Dispatcher::Io);
        let scope = TaskScope::child(&root, true, Dispatcher::Io);
        let bad = Arc::new(TaskHandle::new(TaskKind::Deferred));
        scope.add_child(Arc::clone(&bad)).unwrap();
        bad.fail(Error::type_error("boom"));
        scope.child_failed(Error::type_error("boom"));
        scope.wait_children(None).unwrap();
        assert!(bad.failure().is_some());
    }

    #[test]
    fn cancelled_scope_rejects_new_children() {
        let root = TaskScope::root(Dispatcher::Io);
        let scope = TaskScope::child(&root, false, Dispatcher::Io);
        scope.cancel();
        let err = scope.add_child(Arc::new(TaskHandle::new(TaskKind::Job))).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CancellationError);
    }
}
