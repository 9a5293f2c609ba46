//! Periodic maintenance loop for the task manager.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::tasks::manager::WeakTaskManager;

pub(crate) struct Reaper {
    manager: WeakTaskManager,
    interval: Duration,
}

impl Reaper {
    pub(crate) fn new(manager: WeakTaskManager, interval: Duration) -> Self {
        Self { manager, interval }
    }

    pub(crate) async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Task reaper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; nothing to reap yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(manager) = self.manager.upgrade() else {
                        tracing::debug!("Task manager dropped, reaper exiting");
                        break;
                    };
                    // A panicking cycle is logged and retried next tick.
                    match std::panic::catch_unwind(AssertUnwindSafe(|| manager.reap())) {
                        Ok(report) if report.reclaimed + report.expired + report.evicted > 0 => {
                            tracing::info!(
                                reclaimed = report.reclaimed,
                                expired = report.expired,
                                evicted = report.evicted,
                                "Reaper cycle complete"
                            );
                        }
                        Ok(_) => {}
                        Err(_) => tracing::error!("Reaper cycle panicked"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Task reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
