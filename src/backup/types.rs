//! Per-VM state and cycle results for the backup orchestrator.

use std::time::Duration;

use crate::registry::{DiskImageId, SnapshotId, Vm};

/// Where a VM's backup snapshot is in its lifecycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotPhase {
    /// Creation accepted by the registry; not yet confirmed.
    Requested,
    /// Snapshot reached `ok` and its disk images were recorded.
    Ready,
    /// Snapshot failed or could not be retrieved while waiting.
    Abandoned(String),
    /// Snapshot did not reach `ok` before the wait deadline.
    TimedOut,
    /// Snapshot deleted and confirmed absent.
    Removed,
    /// Deletion was rejected or the snapshot could not be checked.
    RemovalFailed(String),
    /// Snapshot was still present when the deletion deadline passed.
    RemovalTimedOut,
}

/// A VM paired with the snapshot created for it in this cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmSnapshot {
    /// VM owning the snapshot.
    pub vm: Vm,
    /// Snapshot created for this cycle.
    pub snapshot_id: SnapshotId,
    /// Disk images recorded when the snapshot became ready.
    pub images: Vec<DiskImageId>,
    /// Current lifecycle phase.
    pub phase: SnapshotPhase,
}

impl VmSnapshot {
    /// Pairs a VM with a freshly requested snapshot.
    #[must_use]
    pub const fn requested(vm: Vm, snapshot_id: SnapshotId) -> Self {
        Self {
            vm,
            snapshot_id,
            images: Vec::new(),
            phase: SnapshotPhase::Requested,
        }
    }
}

/// Result of a bounded wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome<T> {
    /// The awaited condition was reached.
    Done(T),
    /// The wait ended early; the reason has been logged.
    Failed(String),
    /// The deadline passed first.
    TimedOut,
}

/// How the replication gate ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GateStatus {
    /// Scheduler exited with status zero.
    Succeeded,
    /// Scheduler exited with a non-zero status.
    Failed {
        /// Exit code to propagate.
        exit_code: i32,
    },
    /// Scheduler could not be started.
    NotRun {
        /// Spawn failure description.
        message: String,
    },
}

impl GateStatus {
    /// Process exit code implied by this gate status.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed { exit_code } => *exit_code,
            Self::NotRun { .. } => 1,
        }
    }

    /// Returns `true` when replica cleanup may proceed.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// How replica-side cleanup ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CleanupStatus {
    /// Gate failed, replica left untouched.
    Skipped,
    /// Gate succeeded but no ready snapshot recorded any image.
    NothingToRemove,
    /// Slave volume could not be mounted; nothing was deleted.
    MountFailed,
    /// Sweep ran against the mounted volume.
    Completed {
        /// Number of files removed.
        removed: usize,
    },
    /// Sweep stopped early because the cycle was interrupted.
    Interrupted {
        /// Number of files removed before stopping.
        removed: usize,
    },
}

impl CleanupStatus {
    /// Number of replica files removed.
    #[must_use]
    pub const fn removed(&self) -> usize {
        match self {
            Self::Completed { removed } | Self::Interrupted { removed } => *removed,
            Self::Skipped | Self::NothingToRemove | Self::MountFailed => 0,
        }
    }
}

/// Aggregate result of one backup cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupReport {
    /// Process exit code: zero iff the replication gate succeeded and the
    /// cycle was not interrupted.
    pub exit_code: i32,
    /// Whether the cycle was cut short by cancellation.
    pub interrupted: bool,
    /// Wall-clock duration of the cycle.
    pub elapsed: Duration,
    /// Every snapshot requested in this cycle, in registry order.
    pub snapshots: Vec<VmSnapshot>,
    /// Replication gate result.
    pub gate: GateStatus,
    /// Replica cleanup result.
    pub cleanup: CleanupStatus,
}

impl BackupReport {
    /// Number of replica files removed during cleanup.
    #[must_use]
    pub const fn removed_artifacts(&self) -> usize {
        self.cleanup.removed()
    }
}

/// Renders a duration as `M:SS`.
#[must_use]
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs.div_euclid(60), secs.rem_euclid(60))
}

/// Image ids of ready snapshots, in order, without duplicates.
#[must_use]
pub fn collect_images(snapshots: &[VmSnapshot]) -> Vec<DiskImageId> {
    let mut images: Vec<DiskImageId> = Vec::new();
    for image in snapshots
        .iter()
        .filter(|entry| entry.phase == SnapshotPhase::Ready)
        .flat_map(|entry| entry.images.iter())
    {
        if !images.contains(image) {
            images.push(image.clone());
        }
    }
    images
}
