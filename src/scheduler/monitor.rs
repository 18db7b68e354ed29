//! Auto-command scheduler
//!
//! Runs once per second in the main process. Each tick takes the registry
//! lock, decides launches for every Auto command and starts the workers
//! while still holding it, so two ticks can never overshoot a cap.

use super::policy::{evaluate, TickDecision};
use crate::command::{CommandKind, Registry};
use crate::worker::{Launcher, WorkerTask};
use anyhow::Result;
use onebot_shared::{limits, now_ms};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, warn};

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Commands launched, one entry per worker
    pub launched: Vec<String>,
    /// Commands whose running count was reset as stale
    pub reset: Vec<String>,
    /// Launches that failed and were rolled back
    pub failed: Vec<String>,
}

/// Launches Auto commands according to their policy
pub struct AutoScheduler {
    registry: Registry,
    launcher: Arc<dyn Launcher>,
}

impl AutoScheduler {
    pub fn new(registry: Registry, launcher: Arc<dyn Launcher>) -> Self {
        Self { registry, launcher }
    }

    /// Evaluate every Auto command once
    pub async fn tick(&self, now_ms: u64) -> Result<TickReport> {
        let launcher = self.launcher.clone();
        self.registry
            .with_lock(move |table| {
                let mut report = TickReport::default();
                for (name, descriptor) in table.iter_mut() {
                    if descriptor.kind != CommandKind::Auto {
                        continue;
                    }
                    let Some(auto) = descriptor.extra_params.auto_params.as_ref() else {
                        continue;
                    };
                    let living = descriptor.living_params.get_or_insert_with(Default::default);

                    let (count, reset, interval_secs) = match evaluate(auto, living, now_ms) {
                        TickDecision::Launch {
                            count,
                            reset,
                            interval_secs,
                        } => (count, reset, interval_secs),
                        TickDecision::Disabled | TickDecision::TooSoon { .. } => continue,
                    };

                    if reset {
                        if living.last_runtime_ms == 0 {
                            debug!("First run of auto command '{}'", name);
                        } else if living.running_process > 0 {
                            warn!(
                                "Auto command '{}' idle for {:.1}s, resetting {} running workers",
                                name, interval_secs, living.running_process
                            );
                        }
                        living.running_process = 0;
                        report.reset.push(name.clone());
                    }

                    for _ in 0..count {
                        living.running_process += 1;
                        living.last_runtime_ms = now_ms;
                        let task = WorkerTask::Auto {
                            cmd_name: name.clone(),
                        };
                        if let Err(e) = launcher.launch(task) {
                            error!("Failed to launch auto command '{}': {:#}", name, e);
                            living.running_process -= 1;
                            report.failed.push(name.clone());
                            break;
                        }
                        debug!(
                            "Launched auto command '{}' ({}/{})",
                            name, living.running_process, auto.num_process
                        );
                        report.launched.push(name.clone());
                    }
                }
                report
            })
            .await
    }

    /// Tick every second until the task is dropped
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_millis(limits::TICK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.tick(now_ms()).await {
                Ok(report) if report.launched.is_empty() && report.failed.is_empty() => {}
                Ok(report) => debug!(
                    "Tick launched {:?}, reset {:?}, failed {:?}",
                    report.launched, report.reset, report.failed
                ),
                Err(e) => error!("Scheduler tick failed: {:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, HEADER};
    use std::time::Duration as StdDuration;

    const T0: u64 = 1_700_000_000_000;

    fn harness(num_process: u32, target: &str) -> Harness {
        Harness::new(&format!(
            r#"{HEADER}
AutoCommands:
  job:
    target: {target}
    params:
      message: done
    extra_params:
      auto_params:
        run: true
        min_execution_interval: 5
        longest_idle_interval: 60
        num_process: {num_process}
        message_type: group
        target_id: 1001
        send: false
"#
        ))
    }

    async fn living(h: &Harness) -> crate::command::LivingParams {
        h.bot
            .registry()
            .get("job")
            .await
            .unwrap()
            .unwrap()
            .living_params
            .unwrap()
    }

    #[tokio::test]
    async fn test_cap_never_exceeded() {
        let h = harness(3, "gated");
        let scheduler = h.scheduler();

        let first = scheduler.tick(T0).await.unwrap();
        assert_eq!(first.launched.len(), 3);

        // Rapid ticks past the interval while all three still run
        for step in 1..=10 {
            let report = scheduler.tick(T0 + 5_000 + step * 1_000).await.unwrap();
            assert!(report.launched.is_empty());
        }
        assert_eq!(living(&h).await.running_process, 3);
        assert_eq!(h.launcher.launched(), 3);

        h.gate.add_permits(3);
        h.launcher.join_all().await;
        assert_eq!(living(&h).await.running_process, 0);
    }

    #[tokio::test]
    async fn test_single_slot_waits_for_interval_and_worker() {
        let h = harness(1, "gated");
        let scheduler = h.scheduler();

        for second in 0..=4 {
            scheduler.tick(T0 + second * 1_000).await.unwrap();
        }
        assert_eq!(h.launcher.launched(), 1);

        // Interval elapsed but the worker is still running
        for second in 5..=8 {
            scheduler.tick(T0 + second * 1_000).await.unwrap();
        }
        assert_eq!(h.launcher.launched(), 1);

        h.gate.add_permits(1);
        h.launcher.join_all().await;
        let report = scheduler.tick(T0 + 9_000).await.unwrap();
        assert_eq!(report.launched, vec!["job".to_string()]);

        h.gate.add_permits(1);
        h.launcher.join_all().await;
    }

    #[tokio::test]
    async fn test_stale_workers_relaunched() {
        let h = harness(2, "gated");
        let scheduler = h.scheduler();

        scheduler.tick(T0).await.unwrap();
        assert_eq!(living(&h).await.running_process, 2);

        // Workers presumed dead after the idle bound
        let report = scheduler.tick(T0 + 61_000).await.unwrap();
        assert_eq!(report.reset, vec!["job".to_string()]);
        assert_eq!(report.launched.len(), 2);
        assert_eq!(h.launcher.launched(), 4);

        h.gate.add_permits(4);
        h.launcher.join_all().await;
        // Late releases of the reset workers floor at zero
        assert_eq!(living(&h).await.running_process, 0);
    }

    #[tokio::test]
    async fn test_completed_run_frees_slot() {
        let h = harness(1, "record");
        let scheduler = h.scheduler();

        scheduler.tick(T0).await.unwrap();
        h.launcher.join_all().await;

        let state = living(&h).await;
        assert_eq!(state.running_process, 0);
        assert_eq!(state.last_runtime_ms, T0);
        assert_eq!(h.recorder.calls(), 1);
        // send is off
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_launch_rolled_back() {
        let h = harness(2, "record");
        h.launcher.fail_launches(true);

        let report = h.scheduler().tick(T0).await.unwrap();
        assert!(report.launched.is_empty());
        assert_eq!(report.failed, vec!["job".to_string()]);
        assert_eq!(living(&h).await.running_process, 0);
    }

    #[tokio::test]
    async fn test_disabled_command_not_launched() {
        let h = harness(1, "record");
        h.bot
            .registry()
            .set_attribute("job", "extra_params.auto_params.run", "false")
            .await
            .unwrap();

        let report = h.scheduler().tick(T0).await.unwrap();
        assert!(report.launched.is_empty());
        assert_eq!(h.launcher.launched(), 0);
    }

    #[tokio::test]
    async fn test_tick_waits_for_registry_lock() {
        let h = harness(1, "record");
        let table = h.bot.registry().shared_table().unwrap();
        let guard = table.acquire().await;

        let scheduler = h.scheduler();
        let pending = tokio::time::timeout(StdDuration::from_millis(50), scheduler.tick(T0)).await;
        assert!(pending.is_err());

        drop(guard);
        scheduler.tick(T0).await.unwrap();
        h.launcher.join_all().await;
        assert_eq!(h.recorder.calls(), 1);
    }
}
