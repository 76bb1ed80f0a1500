//! Wire representations of oVirt REST API v4 JSON payloads.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{DiskImageId, Snapshot, SnapshotId, SnapshotStatus, Vm, VmState};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct TokenResponse {
    pub(super) access_token: Option<String>,
    pub(super) error: Option<String>,
    pub(super) error_description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct VmList {
    #[serde(default)]
    pub(super) vm: Vec<WireVm>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct WireVm {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) status: Option<String>,
}

impl From<WireVm> for Vm {
    fn from(value: WireVm) -> Self {
        let state = value
            .status
            .as_deref()
            .map_or_else(|| VmState::Other(String::from("unknown")), VmState::from_status);
        Self {
            id: value.id,
            name: value.name,
            state,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub(super) struct SnapshotCreate<'a> {
    pub(super) description: &'a str,
    pub(super) persist_memorystate: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct WireSnapshot {
    pub(super) id: String,
    #[serde(default)]
    pub(super) description: Option<String>,
    #[serde(default)]
    pub(super) snapshot_status: Option<String>,
}

impl From<WireSnapshot> for Snapshot {
    fn from(value: WireSnapshot) -> Self {
        let status = value
            .snapshot_status
            .as_deref()
            .map_or(SnapshotStatus::Locked, SnapshotStatus::from_status);
        Self {
            id: SnapshotId(value.id),
            description: value.description.unwrap_or_default(),
            status,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct DiskAttachmentList {
    #[serde(default)]
    pub(super) disk_attachment: Vec<WireDiskAttachment>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct WireDiskAttachment {
    #[serde(default)]
    pub(super) disk: Option<WireDisk>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct WireDisk {
    pub(super) id: String,
    #[serde(default)]
    pub(super) image_id: Option<String>,
}

impl DiskAttachmentList {
    /// Image ids of attached disks; disks without a usable image id are skipped.
    pub(super) fn image_ids(self) -> Vec<DiskImageId> {
        self.disk_attachment
            .into_iter()
            .filter_map(|attachment| attachment.disk)
            .filter_map(|disk| match disk.image_id {
                Some(image_id) if !image_id.trim().is_empty() => Some(DiskImageId(image_id)),
                _ => {
                    debug!(disk = %disk.id, "disk has no image id; skipping");
                    None
                }
            })
            .collect()
    }
}
