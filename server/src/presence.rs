//! Background task demoting idle users to offline.

use std::time::Duration;

use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use protocol::{Operation, Response};

use crate::delivery;
use crate::directory::DirectoryShared;
use crate::server_types::STATUS_UPDATED;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct PresenceMonitor {
    directory: DirectoryShared,
    interval: Duration,
    wait_time: u32,
}

/// Running monitor, stop it with `stop`.
pub struct MonitorHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl PresenceMonitor {
    /// A zero interval or zero wait time is raised to the smallest usable value.
    pub fn new(directory: &DirectoryShared, interval: Duration, wait_time: u32) -> Self {
        if interval < MIN_INTERVAL || wait_time == 0 {
            warn!("Presence monitor given {:?} tick and wait time {}, clamping", interval, wait_time);
        }

        PresenceMonitor {
            directory: directory.clone(),
            interval: interval.max(MIN_INTERVAL),
            wait_time: wait_time.max(1),
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            info!("Presence monitor started, {:?} tick, offline after {} ticks", self.interval, self.wait_time);

            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately

            loop {
                select! {
                    _ = ticker.tick() => self.age_users().await,
                    _ = &mut stop_rx => {
                        debug!("Presence monitor received stop");
                        break;
                    }
                }
            }

            info!("Presence monitor stopped");
        });

        MonitorHandle { stop_tx, join }
    }

    // flip and notify under one guard, so a user can't leave between the two
    async fn age_users(&self) {
        let mut d = self.directory.lock().await;

        for name in d.tick(self.wait_time) {
            info!("User {} is now offline after inactivity", name);
            if let Some(handle) = d.handle(&name) {
                delivery::push(&name, handle, Response::ok(Operation::UpdateStatus, STATUS_UPDATED));
            }
        }
    }
}

impl MonitorHandle {
    pub async fn stop(self) {
        // the task may already be gone, either way wait for it
        let _ = self.stop_tx.send(());
        let _ = self.join.await;
    }
}
