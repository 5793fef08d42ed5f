use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Where the collection loop stands after a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Convergence {
    Polling,
    /// Target count reached.
    Converged,
    /// No growth for the whole timeout window.
    TimedOut,
    /// The page stopped answering item queries.
    ResponseFailed,
}

impl Convergence {
    pub fn is_terminal(self) -> bool {
        self != Convergence::Polling
    }
}

#[derive(Debug)]
pub struct ConvergenceMonitor {
    target: usize,
    timeout: Duration,
    last_growth: Instant,
    last_size: usize,
    state: Convergence,
}

impl ConvergenceMonitor {
    pub fn new(target: usize, timeout: Duration, now: Instant) -> Self {
        Self {
            target,
            timeout,
            last_growth: now,
            last_size: 0,
            state: Convergence::Polling,
        }
    }

    /// Evaluates one poll cycle that ended with `size` distinct items.
    /// Terminal states stick.
    ///
    /// Times out once the idle span reaches `timeout` (inclusive), so a run
    /// idle for exactly the window stops on that cycle rather than the next.
    pub fn observe(&mut self, size: usize, now: Instant) -> Convergence {
        if self.state.is_terminal() {
            return self.state;
        }
        if size > self.last_size {
            self.last_size = size;
            self.last_growth = now;
        }
        self.state = if size >= self.target {
            Convergence::Converged
        } else if now.saturating_duration_since(self.last_growth) >= self.timeout {
            Convergence::TimedOut
        } else {
            Convergence::Polling
        };
        self.state
    }

    pub fn query_failed(&mut self) -> Convergence {
        if !self.state.is_terminal() {
            self.state = Convergence::ResponseFailed;
        }
        self.state
    }

    pub fn state(&self) -> Convergence {
        self.state
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_growth)
    }
}
