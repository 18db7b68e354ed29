//! Auto-command scheduling
//!
//! This module handles:
//! - The per-command launch policy (interval, concurrency cap, staleness)
//! - The once-per-second tick that applies it under the registry lock

mod monitor;
mod policy;

pub use monitor::AutoScheduler;
pub use policy::release_worker;
