//! Capability gates and resource limits for sandboxed evaluation.
//!
//! A [`SecurityPolicy`] is checked at boundary operations: stdio, file IO,
//! network, process execution, host interop, and reflective access. Numeric
//! limits (time, recursion, loop iterations, async tasks) feed a per-eval
//! [`LimitTracker`] consulted at loop back-edges, call entries, and task
//! spawns. A `0` on any count/time limit means unlimited.
//!
//! Denials fail with a `SecurityError` whose message contains
//! `Security policy denied` and the action name.

use std::time::{Duration, Instant};

use crate::error::{Error, RunResult};

/// Capability booleans and numeric limits for one interpreter.
///
/// The policy is set before evaluation and read at operation boundaries;
/// it cannot be escalated from inside evaluated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Allow `import java` and host-delegate method calls.
    pub allow_java_interop: bool,
    /// Allow reflective access overrides on host members.
    pub allow_set_accessible: bool,
    /// Allow `print`/`println`/`readLine`.
    pub allow_stdio: bool,
    /// Allow the `File` API.
    pub allow_file_io: bool,
    /// Allow network operations.
    pub allow_network: bool,
    /// Allow `exec` and environment access.
    pub allow_exec: bool,
    /// Wall-clock budget for one evaluation, in milliseconds. 0 = unlimited.
    pub max_execution_time_ms: u64,
    /// Maximum interpreter recursion depth. 0 = unlimited.
    pub max_recursion_depth: usize,
    /// Maximum loop back-edge count for one evaluation. 0 = unlimited.
    pub max_loop_iterations: u64,
    /// Maximum concurrently live async tasks. 0 = unlimited.
    pub max_async_tasks: usize,
}

impl SecurityPolicy {
    /// Everything denied, tight limits. Suitable for untrusted input.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            allow_java_interop: false,
            allow_set_accessible: false,
            allow_stdio: false,
            allow_file_io: false,
            allow_network: false,
            allow_exec: false,
            max_execution_time_ms: 5_000,
            max_recursion_depth: 256,
            max_loop_iterations: 1_000_000,
            max_async_tasks: 16,
        }
    }

    /// Stdio allowed, host boundaries closed, generous limits. The default.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            allow_java_interop: false,
            allow_set_accessible: false,
            allow_stdio: true,
            allow_file_io: true,
            allow_network: false,
            allow_exec: false,
            max_execution_time_ms: 0,
            max_recursion_depth: 2_048,
            max_loop_iterations: 0,
            max_async_tasks: 1_024,
        }
    }

    /// Everything allowed, no limits. For trusted embedding hosts only.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            allow_java_interop: true,
            allow_set_accessible: true,
            allow_stdio: true,
            allow_file_io: true,
            allow_network: true,
            allow_exec: true,
            max_execution_time_ms: 0,
            max_recursion_depth: 0,
            max_loop_iterations: 0,
            max_async_tasks: 0,
        }
    }

    /// Checks a boolean capability, failing with the canonical denial message.
    ///
    /// # Arguments
    /// * `allowed` - the policy field guarding the operation
    /// * `action` - the action name embedded in the denial message
    pub fn check(&self, allowed: bool, action: &str) -> RunResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(Error::security(action))
        }
    }

    pub(crate) fn check_stdio(&self) -> RunResult<()> {
        self.check(self.allow_stdio, "stdio")
    }

    pub(crate) fn check_file_io(&self) -> RunResult<()> {
        self.check(self.allow_file_io, "file io")
    }

    pub(crate) fn check_network(&self) -> RunResult<()> {
        self.check(self.allow_network, "network")
    }

    pub(crate) fn check_exec(&self) -> RunResult<()> {
        self.check(self.allow_exec, "exec")
    }

    pub(crate) fn check_java_interop(&self) -> RunResult<()> {
        self.check(self.allow_java_interop, "java interop")
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Per-evaluation counters derived from a [`SecurityPolicy`].
///
/// One tracker is created at `eval` entry and threaded through the VM. Loop
/// back-edges call [`on_back_edge`](Self::on_back_edge); call entries use
/// [`enter_call`](Self::enter_call)/[`leave_call`](Self::leave_call).
#[derive(Debug)]
pub struct LimitTracker {
    deadline: Option<Instant>,
    loop_budget: Option<u64>,
    loop_count: u64,
    max_depth: usize,
    depth: usize,
}

impl LimitTracker {
    /// Creates a tracker for one evaluation under the given policy.
    #[must_use]
    pub fn new(policy: &SecurityPolicy) -> Self {
        let deadline = (policy.max_execution_time_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(policy.max_execution_time_ms));
        Self {
            deadline,
            loop_budget: (policy.max_loop_iterations > 0).then_some(policy.max_loop_iterations),
            loop_count: 0,
            max_depth: policy.max_recursion_depth,
            depth: 0,
        }
    }

    /// Checkpoint at a loop back-edge: counts one iteration and checks both
    /// the iteration quota and the time budget.
    pub fn on_back_edge(&mut self) -> RunResult<()> {
        self.loop_count += 1;
        if let Some(budget) = self.loop_budget {
            if self.loop_count > budget {
                return Err(Error::quota(format!("loop iteration limit exceeded ({budget})")));
            }
        }
        // Checking time on every 1024th edge keeps the hot path cheap.
        if self.loop_count & 0x3ff == 0 {
            self.check_time()?;
        }
        Ok(())
    }

    /// Checks the wall-clock budget.
    pub fn check_time(&self) -> RunResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Error::quota("execution time limit exceeded"));
            }
        }
        Ok(())
    }

    /// Enters one interpreter frame, failing with `StackOverflowError` past
    /// the recursion limit.
    pub fn enter_call(&mut self) -> RunResult<()> {
        self.depth += 1;
        if self.max_depth > 0 && self.depth > self.max_depth {
            return Err(Error::stack_overflow(self.max_depth));
        }
        Ok(())
    }

    /// Leaves one interpreter frame.
    pub fn leave_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Current frame depth, for diagnostics.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_denies_everything() {
        let policy = SecurityPolicy::strict();
        for (result, action) in [
            (policy.check_stdio(), "stdio"),
            (policy.check_file_io(), "file io"),
            (policy.check_network(), "network"),
            (policy.check_exec(), "exec"),
            (policy.check_java_interop(), "java interop"),
        ] {
            let err = result.unwrap_err();
            assert!(err.message().contains("Security policy denied"), "action {action}");
            assert!(err.message().contains(action));
        }
    }

    #[test]
    fn zero_means_unlimited() {
        let mut policy = SecurityPolicy::strict();
        policy.max_loop_iterations = 0;
        policy.max_recursion_depth = 0;
        let mut tracker = LimitTracker::new(&policy);
        for _ in 0..10_000 {
            tracker.on_back_edge().unwrap();
            tracker.enter_call().unwrap();
        }
    }

    #[test]
    fn loop_quota_trips() {
        let mut policy = SecurityPolicy::strict();
        policy.max_loop_iterations = 10;
        let mut tracker = LimitTracker::new(&policy);
        for _ in 0..10 {
            tracker.on_back_edge().unwrap();
        }
        let err = tracker.on_back_edge().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::QuotaExceededError);
    }

    #[test]
    fn recursion_limit_trips() {
        let mut policy = SecurityPolicy::strict();
        policy.max_recursion_depth = 4;
        let mut tracker = LimitTracker::new(&policy);
        for _ in 0..4 {
            tracker.enter_call().unwrap();
        }
        let err = tracker.enter_call().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::StackOverflowError);
    }
}
