//! Strongly typed view of the virtualization manager's VM and snapshot
//! registry.
//!
//! The orchestrator only ever talks to [`SnapshotRegistry`]; the oVirt REST
//! adapter in [`crate::ovirt`] is one implementation and the fake in
//! [`crate::test_support`] is another.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Future returned by registry operations.
pub type RegistryFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Running state of a VM as reported by the registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VmState {
    /// The VM is powered on.
    Up,
    /// Any other state, kept verbatim for logging.
    Other(String),
}

impl VmState {
    /// Maps the registry's status string.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        if status.eq_ignore_ascii_case("up") {
            Self::Up
        } else {
            Self::Other(status.to_owned())
        }
    }
}

/// A virtual machine known to the registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vm {
    /// Registry identifier used to address sub-resources.
    pub id: String,
    /// Unique name; identity for the backup cycle.
    pub name: String,
    /// Current running state.
    pub state: VmState,
}

impl Vm {
    /// Returns `true` when the VM is powered on.
    #[must_use]
    pub const fn is_up(&self) -> bool {
        matches!(self.state, VmState::Up)
    }
}

/// Opaque identifier assigned to a snapshot by the registry.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SnapshotId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot status transitions reported by the registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotStatus {
    /// Creation or removal in progress.
    Locked,
    /// Snapshot is complete and usable.
    Ok,
    /// Registry gave up on the snapshot.
    Failed,
    /// Unrecognised status string.
    Other(String),
}

impl SnapshotStatus {
    /// Maps the registry's status string.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "locked" => Self::Locked,
            "ok" => Self::Ok,
            "failed" => Self::Failed,
            _ => Self::Other(status.to_owned()),
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => f.write_str("locked"),
            Self::Ok => f.write_str("ok"),
            Self::Failed => f.write_str("failed"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// A snapshot owned by a VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Registry identifier.
    pub id: SnapshotId,
    /// Free-form description; backup snapshots carry a fixed tag.
    pub description: String,
    /// Last observed status.
    pub status: SnapshotStatus,
}

/// Identifier of a disk image (volume) backing one of a VM's disks.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DiskImageId(pub String);

impl DiskImageId {
    /// Borrows the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiskImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operations the backup cycle needs from the virtualization manager.
///
/// A value implementing this trait is the session: it is created by a
/// connect call, passed to the orchestrator, and consumed by
/// [`SnapshotRegistry::disconnect`].
pub trait SnapshotRegistry {
    /// Implementation specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists at most `max` VMs in registry order.
    fn list_vms(&self, max: u32) -> RegistryFuture<'_, Vec<Vm>, Self::Error>;

    /// Fetches the current state of the VM called `name`.
    fn get_vm<'a>(&'a self, name: &'a str) -> RegistryFuture<'a, Option<Vm>, Self::Error>;

    /// Requests a new snapshot of `vm`.
    fn create_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        description: &'a str,
    ) -> RegistryFuture<'a, Snapshot, Self::Error>;

    /// Fetches a snapshot by id; `None` means the snapshot does not exist.
    fn get_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        id: &'a SnapshotId,
    ) -> RegistryFuture<'a, Option<Snapshot>, Self::Error>;

    /// Requests deletion of a snapshot. Returns `Ok(false)` when the
    /// snapshot was already gone.
    fn delete_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        id: &'a SnapshotId,
    ) -> RegistryFuture<'a, bool, Self::Error>;

    /// Lists the image ids of every disk attached to `vm`.
    fn list_disk_images<'a>(
        &'a self,
        vm: &'a Vm,
    ) -> RegistryFuture<'a, Vec<DiskImageId>, Self::Error>;

    /// Ends the session.
    fn disconnect(self) -> RegistryFuture<'static, (), Self::Error>
    where
        Self: Sized;
}
