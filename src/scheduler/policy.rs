//! Auto-command launch policy
//!
//! Pure decisions over one command's policy and bookkeeping; the monitor
//! applies them under the registry lock.

use crate::command::{AutoParams, LivingParams};

/// What one tick should do for one Auto command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickDecision {
    /// `run` is off
    Disabled,
    /// Last launch is more recent than `min_execution_interval`
    TooSoon { interval_secs: f64 },
    /// Launch `count` workers; `reset` when running workers are presumed dead
    Launch {
        count: u32,
        reset: bool,
        interval_secs: f64,
    },
}

/// Seconds elapsed since the last launch
pub fn seconds_since(living: &LivingParams, now_ms: u64) -> f64 {
    now_ms.saturating_sub(living.last_runtime_ms) as f64 / 1000.0
}

/// Decide the launches of one command at `now_ms`
pub fn evaluate(auto: &AutoParams, living: &LivingParams, now_ms: u64) -> TickDecision {
    if !auto.run {
        return TickDecision::Disabled;
    }

    let interval_secs = seconds_since(living, now_ms);
    if interval_secs < auto.min_execution_interval {
        return TickDecision::TooSoon { interval_secs };
    }

    let reset = interval_secs > auto.longest_idle_interval;
    let running = if reset { 0 } else { living.running_process };
    TickDecision::Launch {
        count: auto.num_process.saturating_sub(running),
        reset,
        interval_secs,
    }
}

/// Give back one worker slot; never goes below zero
pub fn release_worker(living: &mut LivingParams) {
    living.running_process = living.running_process.saturating_sub(1);
}
