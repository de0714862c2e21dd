//! Execution scheduler - decides how many eligible stages may start

use crate::core::workflow::EngineSettings;
use std::fmt;
use std::str::FromStr;

/// Strategy for scheduling stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// One stage at a time, in dependency order
    Sequential,

    /// Every eligible stage at once
    Parallel,

    /// At most N concurrently running stages
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Parallel
    }
}

impl SchedulingStrategy {
    /// Strategy implied by a workflow's `settings.concurrency`
    pub fn from_settings(settings: &EngineSettings) -> Self {
        match settings.concurrency {
            Some(1) => SchedulingStrategy::Sequential,
            Some(n) => SchedulingStrategy::LimitedParallel(n),
            None => SchedulingStrategy::Parallel,
        }
    }

    /// Maximum concurrently running stages; `None` is unbounded
    pub fn limit(&self) -> Option<usize> {
        match self {
            SchedulingStrategy::Sequential => Some(1),
            SchedulingStrategy::Parallel => None,
            SchedulingStrategy::LimitedParallel(n) => Some((*n).max(1)),
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::Sequential => write!(f, "sequential"),
            SchedulingStrategy::Parallel => write!(f, "parallel"),
            SchedulingStrategy::LimitedParallel(n) => write!(f, "parallel-limited({})", n),
        }
    }
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    /// `sequential`, `parallel`, `parallel-limited` (limit 4) or `parallel-limited=N`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(SchedulingStrategy::Sequential),
            "parallel" => Ok(SchedulingStrategy::Parallel),
            "parallel-limited" => Ok(SchedulingStrategy::LimitedParallel(4)),
            other => other
                .strip_prefix("parallel-limited=")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .map(SchedulingStrategy::LimitedParallel)
                .ok_or_else(|| format!("unknown scheduling strategy '{}'", other)),
        }
    }
}

/// Picks which eligible stages to start
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Stages to start now, given eligible stages in priority order and
    /// the number already running
    pub fn next_stages(&self, eligible: &[String], running: usize) -> Vec<String> {
        let available = match self.strategy.limit() {
            Some(limit) => limit.saturating_sub(running),
            None => eligible.len(),
        };
        eligible.iter().take(available).cloned().collect()
    }
}
