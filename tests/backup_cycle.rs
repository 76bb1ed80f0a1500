//! End-to-end backup cycles against the in-memory registry and a simulated
//! GlusterFS toolchain.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use geosnap::test_support::{FakeRegistry, RegistryCall};
use geosnap::{
    BackupOrchestrator, CleanupStatus, CommandOutput, CommandRunner, GateStatus, Invocation,
    MountCommands, OrchestratorSettings, ProcessError, ReplicationRequest, SnapshotPhase,
    SnapshotRegistry, VmState,
};

const REPLICA_IMAGES: [&str; 3] = ["img-a", "img-shared", "img-b"];

/// Simulates the scheduler and the GlusterFS client.
///
/// Mounting populates the mount point with the replica files of every known
/// image plus one unrelated file; unmounting records what was left and
/// empties the directory again. When an interrupt token is set it is
/// cancelled as soon as the volume is mounted.
#[derive(Debug)]
struct SimulatedCluster {
    gate_code: i32,
    interrupt_on_mount: Option<CancellationToken>,
    programs: RefCell<Vec<String>>,
    left_at_unmount: RefCell<BTreeSet<String>>,
}

impl SimulatedCluster {
    fn new(gate_code: i32) -> Self {
        Self {
            gate_code,
            interrupt_on_mount: None,
            programs: RefCell::new(Vec::new()),
            left_at_unmount: RefCell::new(BTreeSet::new()),
        }
    }

    fn interrupting(token: CancellationToken) -> Self {
        Self {
            interrupt_on_mount: Some(token),
            ..Self::new(0)
        }
    }

    fn programs(&self) -> Vec<String> {
        self.programs.borrow().clone()
    }

    fn populate(dir: &Path) -> std::io::Result<()> {
        for image in REPLICA_IMAGES {
            for suffix in ["img", "lease", "meta"] {
                fs::write(dir.join(format!("{image}.{suffix}")), b"replica")?;
            }
        }
        fs::write(dir.join("keep.img"), b"unrelated")
    }

    fn drain(&self, dir: &Path) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name() {
                self.left_at_unmount
                    .borrow_mut()
                    .insert(name.to_string_lossy().into_owned());
            }
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn exit(code: i32) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: String::new(),
    }
}

fn last_arg(invocation: &Invocation) -> PathBuf {
    invocation
        .args
        .last()
        .map(PathBuf::from)
        .unwrap_or_default()
}

impl CommandRunner for SimulatedCluster {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        self.programs.borrow_mut().push(invocation.program.clone());
        let io_failure = |err: std::io::Error| ProcessError::Spawn {
            program: invocation.program.clone(),
            message: err.to_string(),
        };
        match invocation.program.as_str() {
            "python" => Ok(exit(self.gate_code)),
            "glusterfs" => {
                Self::populate(&last_arg(invocation)).map_err(io_failure)?;
                if let Some(ref token) = self.interrupt_on_mount {
                    token.cancel();
                }
                Ok(exit(0))
            }
            "mountpoint" => Ok(exit(0)),
            "umount" => {
                self.drain(&last_arg(invocation)).map_err(io_failure)?;
                Ok(exit(0))
            }
            other => Err(ProcessError::Spawn {
                program: other.to_owned(),
                message: String::from("unknown program"),
            }),
        }
    }
}

#[fixture]
fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        poll_interval: Duration::from_millis(1),
        wait_timeout: Some(Duration::from_secs(5)),
        vm_page_size: 100,
        management_vm_name: String::from("HostedEngine"),
        georep_interpreter: String::from("python"),
        georep_script: String::from("schedule_georep.py"),
        mount: MountCommands {
            glusterfs_bin: String::from("glusterfs"),
            mountpoint_bin: String::from("mountpoint"),
            umount_bin: String::from("umount"),
            log_path: String::from("/tmp/geosnap-cycle.log"),
        },
    }
}

#[fixture]
fn registry() -> FakeRegistry {
    FakeRegistry::new()
        .with_vm("HostedEngine", VmState::Up)
        .with_vm("web", VmState::Up)
        .with_vm("stopped", VmState::Other(String::from("down")))
        .with_vm("db", VmState::Up)
        .with_disks("web", &["img-a", "img-shared"])
        .with_disks("db", &["img-shared", "img-b"])
        .with_disks("HostedEngine", &["img-engine"])
}

fn request() -> ReplicationRequest {
    ReplicationRequest {
        master_volume: String::from("vmstore"),
        slave: String::from("geoaccount@backup.example"),
        slave_volume: String::from("vmstore-replica"),
        interval_secs: 10,
        timeout_mins: 30,
    }
}

fn mount_base(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir")
}

#[rstest]
#[tokio::test]
async fn successful_cycle_cleans_replica_and_removes_snapshots(
    settings: OrchestratorSettings,
    registry: FakeRegistry,
) {
    let tmp = TempDir::new().expect("tempdir");
    let cluster = SimulatedCluster::new(0);
    let orchestrator = BackupOrchestrator::new(registry.clone(), &cluster, settings)
        .with_mount_base_dir(mount_base(&tmp));

    let report = orchestrator.run(&request()).await.expect("cycle should run");
    orchestrator
        .into_registry()
        .disconnect()
        .await
        .expect("disconnect should succeed");

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.gate, GateStatus::Succeeded);
    assert_eq!(report.cleanup, CleanupStatus::Completed { removed: 9 });
    assert_eq!(report.removed_artifacts(), 9);
    let owners: Vec<&str> = report
        .snapshots
        .iter()
        .map(|entry| entry.vm.name.as_str())
        .collect();
    assert_eq!(owners, ["web", "db"]);
    assert!(
        report
            .snapshots
            .iter()
            .all(|entry| entry.phase == SnapshotPhase::Removed)
    );
    assert_eq!(
        cluster.left_at_unmount.borrow().iter().collect::<Vec<_>>(),
        ["keep.img"]
    );
    assert_eq!(
        cluster.programs(),
        ["python", "glusterfs", "mountpoint", "umount"]
    );
    assert!(registry.live_snapshot_owners().is_empty());
    assert_eq!(registry.count(&RegistryCall::Disconnect), 1);
    assert_eq!(
        registry.count(&RegistryCall::CreateSnapshot(String::from("HostedEngine"))),
        0
    );
    let leftover_dirs = fs::read_dir(tmp.path()).expect("read base").count();
    assert_eq!(leftover_dirs, 0, "mount directory should be removed");
}

#[rstest]
#[tokio::test]
async fn failed_replication_leaves_replica_untouched(
    settings: OrchestratorSettings,
    registry: FakeRegistry,
) {
    let tmp = TempDir::new().expect("tempdir");
    let cluster = SimulatedCluster::new(4);
    let orchestrator = BackupOrchestrator::new(registry.clone(), &cluster, settings)
        .with_mount_base_dir(mount_base(&tmp));

    let report = orchestrator.run(&request()).await.expect("cycle should run");

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.cleanup, CleanupStatus::Skipped);
    assert_eq!(cluster.programs(), ["python"]);
    assert!(registry.live_snapshot_owners().is_empty());
    assert_eq!(registry.count(&RegistryCall::DeleteSnapshot(String::from("web"))), 1);
    assert_eq!(registry.count(&RegistryCall::DeleteSnapshot(String::from("db"))), 1);
}

#[rstest]
#[tokio::test]
async fn one_failing_vm_does_not_affect_the_others(
    settings: OrchestratorSettings,
    registry: FakeRegistry,
) {
    let tmp = TempDir::new().expect("tempdir");
    let registry = registry.fail_create_for("web");
    let cluster = SimulatedCluster::new(0);
    let orchestrator = BackupOrchestrator::new(registry.clone(), &cluster, settings)
        .with_mount_base_dir(mount_base(&tmp));

    let report = orchestrator.run(&request()).await.expect("cycle should run");

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.snapshots.len(), 1);
    assert_eq!(report.snapshots[0].vm.name, "db");
    assert_eq!(report.snapshots[0].phase, SnapshotPhase::Removed);
    assert_eq!(report.removed_artifacts(), 6, "only db images are cleaned");
    assert_eq!(
        cluster.left_at_unmount.borrow().iter().collect::<Vec<_>>(),
        ["img-a.img", "img-a.lease", "img-a.meta", "keep.img"]
    );
    assert!(registry.live_snapshot_owners().is_empty());
}

#[rstest]
#[tokio::test]
async fn interruption_during_cleanup_releases_mount_and_snapshots(
    settings: OrchestratorSettings,
    registry: FakeRegistry,
) {
    let tmp = TempDir::new().expect("tempdir");
    let token = CancellationToken::new();
    let cluster = SimulatedCluster::interrupting(token.clone());
    let orchestrator = BackupOrchestrator::new(registry.clone(), &cluster, settings)
        .with_mount_base_dir(mount_base(&tmp))
        .with_cancellation(token);

    let report = orchestrator.run(&request()).await.expect("cycle should run");

    assert!(report.interrupted);
    assert_eq!(report.exit_code, 1);
    assert_eq!(report.cleanup, CleanupStatus::Interrupted { removed: 0 });
    let umounts = cluster
        .programs()
        .iter()
        .filter(|program| *program == "umount")
        .count();
    assert_eq!(umounts, 1);
    assert_eq!(cluster.left_at_unmount.borrow().len(), 10, "nothing swept after interrupt");
    assert_eq!(fs::read_dir(tmp.path()).expect("read base").count(), 0);
    assert_eq!(registry.count(&RegistryCall::DeleteSnapshot(String::from("web"))), 1);
    assert_eq!(registry.count(&RegistryCall::DeleteSnapshot(String::from("db"))), 1);
    assert!(registry.live_snapshot_owners().is_empty());
}
