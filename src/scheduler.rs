//! Local scheduler gate
//!
//! Decides whether this process may pick up work and lets the node lifecycle
//! manager halt everything that is running. Each run receives a child
//! cancellation token; shutting the scheduler down cancels all of them.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Not started yet (node not registered).
    Idle,
    /// Accepting new runs.
    Accepting,
    /// Permanently stopped; no recovery without restart.
    Stopped,
}

const IDLE: u8 = 0;
const ACCEPTING: u8 = 1;
const STOPPED: u8 = 2;

pub struct LocalScheduler {
    state: AtomicU8,
    root: CancellationToken,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            root: CancellationToken::new(),
        }
    }

    /// Starts accepting work. Returns `false` if the scheduler was already stopped.
    pub fn start(&self) -> bool {
        match self
            .state
            .compare_exchange(IDLE, ACCEPTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::info!("Local scheduler accepting work");
                true
            }
            Err(current) => current == ACCEPTING,
        }
    }

    /// Stops accepting new work and asks every in-flight run to halt.
    pub fn shutdown(&self) {
        let previous = self.state.swap(STOPPED, Ordering::AcqRel);
        if previous != STOPPED {
            tracing::warn!("Local scheduler shutting down, halting in-flight runs");
        }
        self.root.cancel();
    }

    pub fn state(&self) -> SchedulerState {
        match self.state.load(Ordering::Acquire) {
            IDLE => SchedulerState::Idle,
            ACCEPTING => SchedulerState::Accepting,
            _ => SchedulerState::Stopped,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == SchedulerState::Accepting
    }

    /// Token for one run. Cancelled by `shutdown()` or by the run's owner
    /// (suspend / cancel requests).
    pub fn run_token(&self) -> CancellationToken {
        self.root.child_token()
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}
