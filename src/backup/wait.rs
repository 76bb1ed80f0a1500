//! Snapshot readiness and removal wait loops.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::process::CommandRunner;
use crate::registry::{DiskImageId, SnapshotId, SnapshotRegistry, SnapshotStatus, Vm};

use super::BackupOrchestrator;
use super::types::WaitOutcome;

/// Optional point in time after which a wait gives up.
#[derive(Clone, Copy, Debug)]
pub(super) struct Deadline(Option<Instant>);

impl Deadline {
    pub(super) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.and_then(|limit| Instant::now().checked_add(limit)))
    }

    pub(super) fn expired(self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Sleep before the next poll, cut short so it never runs past the
    /// deadline.
    pub(super) fn nap(self, interval: Duration) -> Duration {
        self.0.map_or(interval, |at| {
            interval.min(at.saturating_duration_since(Instant::now()))
        })
    }
}

/// Reason recorded when a wait ends because the cycle was interrupted.
pub(super) const INTERRUPTED: &str = "interrupted";

impl<G, R> BackupOrchestrator<G, R>
where
    G: SnapshotRegistry,
    R: CommandRunner,
{
    /// Waits until the snapshot reaches `ok`, then returns the image ids of
    /// every disk attached to the VM.
    ///
    /// The VM is fetched again by name first so the poll never works from a
    /// stale handle. A snapshot that disappears, reports `failed`, or cannot
    /// be fetched ends the wait with [`WaitOutcome::Failed`].
    pub async fn wait_for_snapshot_ready(
        &self,
        vm: &Vm,
        snapshot_id: &SnapshotId,
    ) -> WaitOutcome<Vec<DiskImageId>> {
        let refreshed = match self.registry.get_vm(&vm.name).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                error!(vm = %vm.name, snapshot = %snapshot_id, "VM no longer present");
                return WaitOutcome::Failed(format!("VM {} no longer present", vm.name));
            }
            Err(err) => {
                error!(vm = %vm.name, error = %err, "failed to refresh VM");
                return WaitOutcome::Failed(err.to_string());
            }
        };
        debug!(vm = %refreshed.name, snapshot = %snapshot_id, "refreshed VM handle");

        let deadline = Deadline::after(self.settings.wait_timeout);
        loop {
            match self.registry.get_snapshot(&refreshed, snapshot_id).await {
                Ok(Some(snapshot)) => match snapshot.status {
                    SnapshotStatus::Ok => {
                        info!(vm = %refreshed.name, snapshot = %snapshot_id, "snapshot created");
                        break;
                    }
                    SnapshotStatus::Failed => {
                        error!(vm = %refreshed.name, snapshot = %snapshot_id, "snapshot failed");
                        return WaitOutcome::Failed(String::from("snapshot failed"));
                    }
                    other => {
                        debug!(vm = %refreshed.name, snapshot = %snapshot_id, status = %other, "snapshot not ready");
                    }
                },
                Ok(None) => {
                    error!(vm = %refreshed.name, snapshot = %snapshot_id, "snapshot not retrieved");
                    return WaitOutcome::Failed(String::from("snapshot not retrieved"));
                }
                Err(err) => {
                    error!(vm = %refreshed.name, snapshot = %snapshot_id, error = %err, "failed to fetch snapshot");
                    return WaitOutcome::Failed(err.to_string());
                }
            }

            if deadline.expired() {
                warn!(vm = %refreshed.name, snapshot = %snapshot_id, "timed out waiting for snapshot");
                return WaitOutcome::TimedOut;
            }
            if !self.pause(deadline).await {
                warn!(vm = %refreshed.name, snapshot = %snapshot_id, "stopped waiting for snapshot: interrupted");
                return WaitOutcome::Failed(String::from(INTERRUPTED));
            }
        }

        match self.registry.list_disk_images(&refreshed).await {
            Ok(images) => {
                debug!(vm = %refreshed.name, images = images.len(), "recorded disk images");
                WaitOutcome::Done(images)
            }
            Err(err) => {
                error!(vm = %refreshed.name, error = %err, "failed to list disk images");
                WaitOutcome::Failed(err.to_string())
            }
        }
    }

    /// Deletes the snapshot and waits until the registry no longer returns
    /// it. A snapshot that is already gone counts as removed.
    pub async fn teardown_snapshot(&self, vm: &Vm, snapshot_id: &SnapshotId) -> WaitOutcome<()> {
        info!(vm = %vm.name, snapshot = %snapshot_id, "deleting snapshot");
        match self.registry.delete_snapshot(vm, snapshot_id).await {
            Ok(true) => debug!(vm = %vm.name, snapshot = %snapshot_id, "delete requested"),
            Ok(false) => debug!(vm = %vm.name, snapshot = %snapshot_id, "snapshot already absent"),
            Err(err) => {
                error!(vm = %vm.name, snapshot = %snapshot_id, error = %err, "failed to delete snapshot");
                return WaitOutcome::Failed(err.to_string());
            }
        }

        let deadline = Deadline::after(self.settings.wait_timeout);
        loop {
            match self.registry.get_snapshot(vm, snapshot_id).await {
                Ok(None) => {
                    info!(vm = %vm.name, snapshot = %snapshot_id, "snapshot deleted");
                    return WaitOutcome::Done(());
                }
                Ok(Some(snapshot)) => {
                    debug!(vm = %vm.name, snapshot = %snapshot_id, status = %snapshot.status, "snapshot still present");
                }
                Err(err) => {
                    error!(vm = %vm.name, snapshot = %snapshot_id, error = %err, "failed to check snapshot removal");
                    return WaitOutcome::Failed(err.to_string());
                }
            }

            if deadline.expired() {
                warn!(vm = %vm.name, snapshot = %snapshot_id, "timed out waiting for snapshot removal");
                return WaitOutcome::TimedOut;
            }
            if !self.pause(deadline).await {
                warn!(vm = %vm.name, snapshot = %snapshot_id, "stopped waiting for snapshot removal: interrupted");
                return WaitOutcome::Failed(String::from(INTERRUPTED));
            }
        }
    }

    /// Sleeps until the next poll. Returns `false` when the cycle was
    /// interrupted instead.
    async fn pause(&self, deadline: Deadline) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = sleep(deadline.nap(self.settings.poll_interval)) => true,
        }
    }
}
