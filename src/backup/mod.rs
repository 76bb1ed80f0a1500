//! One backup cycle: snapshot, replicate, clean the replica, tear down.
//!
//! [`BackupOrchestrator::run`] snapshots every running VM except the
//! management VM, hands control to the geo-replication scheduler, removes
//! the replica copies of the snapshot images once the scheduler succeeds,
//! and finally deletes every snapshot it created. Failures affecting one VM
//! are logged and never stop the cycle for the others; teardown happens
//! whatever the scheduler reported.
//!
//! Cancelling the orchestrator's [`CancellationToken`] interrupts the cycle
//! at the next safe point: no further snapshots are requested, waits stop,
//! the scheduler is not started, and the replica sweep stops between
//! images. The slave mount is still released and every snapshot created so
//! far still receives its delete request.

mod types;
mod wait;

use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts;
use crate::config::ToolConfig;
use crate::georep::{ReplicationGate, ReplicationRequest};
use crate::mount::{MountCommands, RemoteVolumeMount};
use crate::process::CommandRunner;
use crate::registry::{DiskImageId, Snapshot, SnapshotId, SnapshotRegistry, Vm};

use wait::INTERRUPTED;

pub use types::{
    BackupReport, CleanupStatus, GateStatus, SnapshotPhase, VmSnapshot, WaitOutcome,
    collect_images, format_duration,
};

/// Description attached to every snapshot this tool creates.
pub const SNAPSHOT_DESCRIPTION: &str = "GLUSTER-Geo-rep-snapshot";

/// Errors that abort a backup cycle before any snapshot is taken.
#[derive(Debug, Error)]
pub enum BackupError<RegistryError>
where
    RegistryError: std::error::Error + 'static,
{
    /// Raised when the VM inventory cannot be listed.
    #[error("failed to list VMs: {0}")]
    ListVms(#[source] RegistryError),
}

/// Knobs governing a backup cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrchestratorSettings {
    /// Delay between snapshot status checks.
    pub poll_interval: Duration,
    /// Bound on each snapshot wait; `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
    /// Maximum number of VMs requested from the registry.
    pub vm_page_size: u32,
    /// VM never snapshotted.
    pub management_vm_name: String,
    /// Interpreter running the scheduler script.
    pub georep_interpreter: String,
    /// Scheduler script path.
    pub georep_script: String,
    /// Commands used to mount the slave volume.
    pub mount: MountCommands,
}

impl OrchestratorSettings {
    /// Derives settings from the loaded tool configuration.
    #[must_use]
    pub fn from_tool_config(config: &ToolConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            wait_timeout: config.snapshot_wait_timeout(),
            vm_page_size: config.vm_page_size,
            management_vm_name: config.management_vm_name.clone(),
            georep_interpreter: config.georep_interpreter.clone(),
            georep_script: config.georep_script.clone(),
            mount: MountCommands {
                glusterfs_bin: config.glusterfs_bin.clone(),
                mountpoint_bin: config.mountpoint_bin.clone(),
                umount_bin: config.umount_bin.clone(),
                log_path: config.mount_log_path.clone(),
            },
        }
    }
}

/// Drives a backup cycle against a registry session and a command runner.
#[derive(Debug)]
pub struct BackupOrchestrator<G, R>
where
    G: SnapshotRegistry,
    R: CommandRunner,
{
    registry: G,
    runner: R,
    settings: OrchestratorSettings,
    mount_base_dir: Option<Utf8PathBuf>,
    cancel: CancellationToken,
}

impl<G, R> BackupOrchestrator<G, R>
where
    G: SnapshotRegistry,
    R: CommandRunner,
{
    /// Creates an orchestrator owning the registry session.
    #[must_use]
    pub fn new(registry: G, runner: R, settings: OrchestratorSettings) -> Self {
        Self {
            registry,
            runner,
            settings,
            mount_base_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Interrupts the cycle when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Places slave mount points under `dir` rather than the system
    /// temporary directory.
    #[must_use]
    pub fn with_mount_base_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.mount_base_dir = Some(dir.into());
        self
    }

    /// Borrows the registry session.
    #[must_use]
    pub const fn registry(&self) -> &G {
        &self.registry
    }

    /// Returns the registry session so the caller can disconnect it.
    #[must_use]
    pub fn into_registry(self) -> G {
        self.registry
    }

    /// Lists VMs and keeps those that are up, excluding the management VM.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::ListVms`] when the registry cannot list VMs.
    pub async fn select_eligible_vms(&self) -> Result<Vec<Vm>, BackupError<G::Error>> {
        let vms = self
            .registry
            .list_vms(self.settings.vm_page_size)
            .await
            .map_err(BackupError::ListVms)?;
        let eligible: Vec<Vm> = vms
            .into_iter()
            .filter(|vm| {
                if vm.name == self.settings.management_vm_name {
                    debug!(vm = %vm.name, "skipping management VM");
                    return false;
                }
                if !vm.is_up() {
                    debug!(vm = %vm.name, "skipping VM that is not up");
                    return false;
                }
                true
            })
            .collect();
        info!(count = eligible.len(), "selected VMs for snapshot");
        Ok(eligible)
    }

    /// Requests a snapshot of `vm`. Failures are logged and yield `None`.
    pub async fn request_snapshot(&self, vm: &Vm) -> Option<Snapshot> {
        info!(vm = %vm.name, "creating snapshot");
        match self
            .registry
            .create_snapshot(vm, SNAPSHOT_DESCRIPTION)
            .await
        {
            Ok(snapshot) => {
                debug!(vm = %vm.name, snapshot = %snapshot.id, "snapshot requested");
                Some(snapshot)
            }
            Err(err) => {
                error!(vm = %vm.name, error = %err, "failed to create snapshot");
                None
            }
        }
    }

    /// Runs the geo-replication scheduler and classifies its result.
    pub fn run_replication_gate(&self, request: &ReplicationRequest) -> GateStatus {
        let gate = ReplicationGate::new(
            &self.runner,
            &self.settings.georep_interpreter,
            &self.settings.georep_script,
        );
        match gate.invoke(request) {
            Ok(outcome) if outcome.succeeded() => GateStatus::Succeeded,
            Ok(outcome) => GateStatus::Failed {
                exit_code: outcome.exit_code(),
            },
            Err(err) => {
                error!(error = %err, "failed to start geo-replication scheduler");
                GateStatus::NotRun {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Mounts the slave volume and removes replica files belonging to
    /// `images`. Nothing is deleted unless the mount is confirmed.
    pub fn cleanup_replica_artifacts(
        &self,
        slave: &str,
        slave_volume: &str,
        images: &[DiskImageId],
    ) -> CleanupStatus {
        let mut mounter = RemoteVolumeMount::new(&self.runner, self.settings.mount.clone());
        if let Some(ref dir) = self.mount_base_dir {
            mounter = mounter.with_base_dir(dir.clone());
        }
        let guard = match mounter.acquire(slave, slave_volume) {
            Ok(guard) => guard,
            Err(err) => {
                error!(error = %err, "failed to prepare slave mount");
                return CleanupStatus::MountFailed;
            }
        };
        let Some(mount_root) = guard.path() else {
            warn!(slave, slave_volume, "slave volume not mounted; skipping artifact cleanup");
            return CleanupStatus::MountFailed;
        };
        let mut removed = 0;
        for image in images {
            if self.cancel.is_cancelled() {
                warn!(removed, "replica cleanup interrupted");
                return CleanupStatus::Interrupted { removed };
            }
            removed += artifacts::remove_artifacts(
                std::slice::from_ref(image),
                mount_root.as_std_path(),
            );
        }
        info!(removed, "removed replica snapshot artifacts");
        CleanupStatus::Completed { removed }
    }

    /// Runs one full backup cycle.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::ListVms`] when the VM inventory cannot be
    /// read; no snapshot has been created at that point. Every later
    /// failure is recorded in the returned [`BackupReport`].
    pub async fn run(
        &self,
        request: &ReplicationRequest,
    ) -> Result<BackupReport, BackupError<G::Error>> {
        let started = Instant::now();
        let eligible = self.select_eligible_vms().await?;

        let mut snapshots = Vec::with_capacity(eligible.len());
        for vm in eligible {
            if self.cancel.is_cancelled() {
                warn!(vm = %vm.name, "interrupted; no further snapshots requested");
                break;
            }
            if let Some(snapshot) = self.request_snapshot(&vm).await {
                snapshots.push(VmSnapshot::requested(vm, snapshot.id));
            }
        }

        for entry in &mut snapshots {
            let outcome = self
                .wait_for_snapshot_ready(&entry.vm, &entry.snapshot_id)
                .await;
            entry.phase = match outcome {
                WaitOutcome::Done(images) => {
                    entry.images = images;
                    SnapshotPhase::Ready
                }
                WaitOutcome::Failed(reason) => SnapshotPhase::Abandoned(reason),
                WaitOutcome::TimedOut => SnapshotPhase::TimedOut,
            };
        }

        let gate = if self.cancel.is_cancelled() {
            warn!("interrupted; geo-replication not started");
            GateStatus::NotRun {
                message: String::from(INTERRUPTED),
            }
        } else {
            self.run_replication_gate(request)
        };
        let images = collect_images(&snapshots);
        let cleanup = if !gate.succeeded() {
            warn!(rc = gate.exit_code(), "geo-replication failed; replica left untouched");
            CleanupStatus::Skipped
        } else if images.is_empty() {
            info!("no snapshot images recorded; skipping replica cleanup");
            CleanupStatus::NothingToRemove
        } else {
            self.cleanup_replica_artifacts(&request.slave, &request.slave_volume, &images)
        };

        for entry in &mut snapshots {
            let phase = self.finish_snapshot(&entry.vm, &entry.snapshot_id).await;
            entry.phase = phase;
        }

        let interrupted = self.cancel.is_cancelled();
        let exit_code = if interrupted {
            warn!("backup cycle interrupted");
            gate.exit_code().max(1)
        } else {
            gate.exit_code()
        };
        let elapsed = started.elapsed();
        info!("Duration: {} minutes", format_duration(elapsed));
        Ok(BackupReport {
            exit_code,
            interrupted,
            elapsed,
            snapshots,
            gate,
            cleanup,
        })
    }

    async fn finish_snapshot(&self, vm: &Vm, snapshot_id: &SnapshotId) -> SnapshotPhase {
        match self.teardown_snapshot(vm, snapshot_id).await {
            WaitOutcome::Done(()) => SnapshotPhase::Removed,
            WaitOutcome::Failed(reason) => SnapshotPhase::RemovalFailed(reason),
            WaitOutcome::TimedOut => SnapshotPhase::RemovalTimedOut,
        }
    }
}
