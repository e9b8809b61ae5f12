//! Background expiry sweeper.
//!
//! Each cycle marks grants past their policy's TTL, then works through
//! everything marked: evict the user from the room, and only after the
//! eviction succeeds, delete the grant row. Failed evictions keep their row
//! and are retried next cycle, so a flaky Room Service can never leak a
//! member whose grant lapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use roomgate_storage::GrantStore;

use crate::epoch_now;
use crate::rooms::{Membership, RoomService};

pub struct ExpirySweeper {
    grants: Arc<dyn GrantStore>,
    rooms: Arc<dyn RoomService>,
}

impl ExpirySweeper {
    pub fn new(grants: Arc<dyn GrantStore>, rooms: Arc<dyn RoomService>) -> Self {
        Self { grants, rooms }
    }

    /// Runs sweep cycles until `shutdown` flips. Cycles never overlap: a
    /// slow Room Service skips ticks rather than queueing them.
    pub async fn run(&self, sweep_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = sweep_interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("expiry sweeper stopping");
                    return;
                }
            }

            match self.sweep_once().await {
                Ok(evicted) => {
                    if evicted > 0 {
                        info!(count = evicted, "evicted users with lapsed grants");
                    }
                }
                Err(e) => {
                    error!(error = %e, "sweep cycle failed");
                }
            }
        }
    }

    /// One full cycle: mark newly lapsed grants, then evict and remove every
    /// marked grant, including leftovers from earlier failed cycles. Returns
    /// the number of successful evictions.
    pub async fn sweep_once(&self) -> Result<u32, roomgate_storage::StorageError> {
        let newly_marked = self.grants.sweep_expired(epoch_now()).await?;
        if !newly_marked.is_empty() {
            info!(count = newly_marked.len(), "marked lapsed grants");
        }

        let mut evicted = 0;
        for (user_id, room_id) in self.grants.list_expired().await? {
            match self
                .rooms
                .set_membership(&user_id, &room_id, Membership::Leave)
                .await
            {
                Ok(()) => {
                    self.grants.dismiss(&room_id, &user_id).await?;
                    evicted += 1;
                }
                Err(e) => {
                    // Row stays marked; next cycle retries.
                    warn!(
                        user_id = %user_id,
                        room_id = %room_id,
                        error = %e,
                        "eviction failed, will retry next sweep"
                    );
                }
            }
        }

        Ok(evicted)
    }
}
