//! Core library for the `geosnap` backup tool.
//!
//! A backup cycle snapshots every running VM known to an oVirt engine, runs
//! the GlusterFS geo-replication scheduler so the replica receives a
//! consistent copy, removes the replica-side snapshot overlays once the
//! scheduler succeeds, and deletes the primary snapshots again. The
//! [`backup::BackupOrchestrator`] drives the cycle over the
//! [`registry::SnapshotRegistry`] trait and a [`process::CommandRunner`];
//! [`shutdown`] lets SIGINT and SIGTERM end a cycle without leaking the
//! slave mount or the snapshots.

pub mod artifacts;
pub mod backup;
pub mod config;
pub mod georep;
pub mod logging;
pub mod mount;
pub mod ovirt;
pub mod process;
pub mod registry;
pub mod shutdown;
pub mod test_support;

pub use backup::{
    BackupError, BackupOrchestrator, BackupReport, CleanupStatus, GateStatus,
    OrchestratorSettings, SNAPSHOT_DESCRIPTION, SnapshotPhase, VmSnapshot, WaitOutcome,
};
pub use config::{ConfigError, EngineCredentials, ToolConfig};
pub use georep::{GateOutcome, ReplicationGate, ReplicationRequest};
pub use mount::{MountCommands, MountError, MountGuard, RemoteVolumeMount};
pub use ovirt::{OvirtError, OvirtRegistry};
pub use process::{CommandOutput, CommandRunner, Invocation, ProcessCommandRunner, ProcessError};
pub use registry::{
    DiskImageId, Snapshot, SnapshotId, SnapshotRegistry, SnapshotStatus, Vm, VmState,
};
