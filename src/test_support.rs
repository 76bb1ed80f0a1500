//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::process::{CommandOutput, CommandRunner, Invocation, ProcessError};
use crate::registry::{
    DiskImageId, RegistryFuture, Snapshot, SnapshotId, SnapshotRegistry, SnapshotStatus, Vm,
    VmState,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a space-joined command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: invocation.program.clone(),
            args: invocation.args.clone(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ProcessError::Spawn {
                program: invocation.program.clone(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Registry calls recorded by [`FakeRegistry`], keyed by VM name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegistryCall {
    /// `list_vms`.
    ListVms,
    /// `get_vm`.
    GetVm(String),
    /// `create_snapshot`.
    CreateSnapshot(String),
    /// `get_snapshot`.
    GetSnapshot(String),
    /// `delete_snapshot`.
    DeleteSnapshot(String),
    /// `list_disk_images`.
    ListDiskImages(String),
    /// `disconnect`.
    Disconnect,
}

/// Error returned by [`FakeRegistry`] when a failure was injected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("injected registry failure: {0}")]
pub struct FakeRegistryError(pub String);

#[derive(Debug)]
struct FakeSnapshot {
    vm_name: String,
    statuses: VecDeque<SnapshotStatus>,
    deleted: bool,
    linger_polls: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    vms: Vec<Vm>,
    disks: BTreeMap<String, Vec<DiskImageId>>,
    statuses: BTreeMap<String, Vec<SnapshotStatus>>,
    fail_create: BTreeSet<String>,
    fail_delete: BTreeSet<String>,
    lose_snapshot: BTreeSet<String>,
    linger_after_delete: u32,
    snapshots: BTreeMap<SnapshotId, FakeSnapshot>,
    next_snapshot: u32,
    calls: Vec<RegistryCall>,
}

/// In-memory registry with injectable failures.
///
/// Snapshots report the scripted status sequence for their VM (default
/// `ok`), one entry per fetch, repeating the last entry once exhausted.
#[derive(Clone, Debug, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StdMutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a VM in the given state.
    #[must_use]
    pub fn with_vm(self, name: &str, state: VmState) -> Self {
        {
            let mut guard = self.state();
            let id = format!("vm-{}", guard.vms.len() + 1);
            guard.vms.push(Vm {
                id,
                name: name.to_owned(),
                state,
            });
        }
        self
    }

    /// Sets the disk image ids reported for `vm`.
    #[must_use]
    pub fn with_disks(self, vm: &str, images: &[&str]) -> Self {
        self.state().disks.insert(
            vm.to_owned(),
            images
                .iter()
                .map(|id| DiskImageId((*id).to_owned()))
                .collect(),
        );
        self
    }

    /// Scripts the statuses successive snapshot fetches report for `vm`.
    #[must_use]
    pub fn with_statuses(self, vm: &str, statuses: Vec<SnapshotStatus>) -> Self {
        self.state().statuses.insert(vm.to_owned(), statuses);
        self
    }

    /// Makes snapshot creation fail for `vm`.
    #[must_use]
    pub fn fail_create_for(self, vm: &str) -> Self {
        self.state().fail_create.insert(vm.to_owned());
        self
    }

    /// Makes snapshot deletion fail for `vm`.
    #[must_use]
    pub fn fail_delete_for(self, vm: &str) -> Self {
        self.state().fail_delete.insert(vm.to_owned());
        self
    }

    /// Makes the snapshot of `vm` unretrievable after creation.
    #[must_use]
    pub fn lose_snapshot_for(self, vm: &str) -> Self {
        self.state().lose_snapshot.insert(vm.to_owned());
        self
    }

    /// Keeps deleted snapshots visible for `polls` further fetches.
    #[must_use]
    pub fn linger_after_delete(self, polls: u32) -> Self {
        self.state().linger_after_delete = polls;
        self
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.state().calls.clone()
    }

    /// Counts calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &RegistryCall) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|recorded| *recorded == call)
            .count()
    }

    /// Names of VMs that still own a snapshot that was not deleted.
    #[must_use]
    pub fn live_snapshot_owners(&self) -> Vec<String> {
        self.state()
            .snapshots
            .values()
            .filter(|snapshot| !snapshot.deleted)
            .map(|snapshot| snapshot.vm_name.clone())
            .collect()
    }
}

impl SnapshotRegistry for FakeRegistry {
    type Error = FakeRegistryError;

    fn list_vms(&self, max: u32) -> RegistryFuture<'_, Vec<Vm>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(RegistryCall::ListVms);
            let limit = usize::try_from(max).unwrap_or(usize::MAX);
            Ok(state.vms.iter().take(limit).cloned().collect())
        })
    }

    fn get_vm<'a>(&'a self, name: &'a str) -> RegistryFuture<'a, Option<Vm>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(RegistryCall::GetVm(name.to_owned()));
            Ok(state.vms.iter().find(|vm| vm.name == name).cloned())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        description: &'a str,
    ) -> RegistryFuture<'a, Snapshot, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(RegistryCall::CreateSnapshot(vm.name.clone()));
            if state.fail_create.contains(&vm.name) {
                return Err(FakeRegistryError(format!("create failed for {}", vm.name)));
            }
            state.next_snapshot += 1;
            let id = SnapshotId(format!("snap-{}", state.next_snapshot));
            let statuses = state
                .statuses
                .get(&vm.name)
                .cloned()
                .unwrap_or_else(|| vec![SnapshotStatus::Ok]);
            state.snapshots.insert(
                id.clone(),
                FakeSnapshot {
                    vm_name: vm.name.clone(),
                    statuses: statuses.into(),
                    deleted: false,
                    linger_polls: 0,
                },
            );
            Ok(Snapshot {
                id,
                description: description.to_owned(),
                status: SnapshotStatus::Locked,
            })
        })
    }

    fn get_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        id: &'a SnapshotId,
    ) -> RegistryFuture<'a, Option<Snapshot>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(RegistryCall::GetSnapshot(vm.name.clone()));
            if state.lose_snapshot.contains(&vm.name) {
                return Ok(None);
            }
            let Some(snapshot) = state.snapshots.get_mut(id) else {
                return Ok(None);
            };
            if snapshot.deleted {
                if snapshot.linger_polls == 0 {
                    return Ok(None);
                }
                snapshot.linger_polls -= 1;
                return Ok(Some(Snapshot {
                    id: id.clone(),
                    description: String::new(),
                    status: SnapshotStatus::Locked,
                }));
            }
            let status = if snapshot.statuses.len() > 1 {
                snapshot.statuses.pop_front()
            } else {
                snapshot.statuses.front().cloned()
            }
            .unwrap_or(SnapshotStatus::Ok);
            Ok(Some(Snapshot {
                id: id.clone(),
                description: String::new(),
                status,
            }))
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        vm: &'a Vm,
        id: &'a SnapshotId,
    ) -> RegistryFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(RegistryCall::DeleteSnapshot(vm.name.clone()));
            if state.fail_delete.contains(&vm.name) {
                return Err(FakeRegistryError(format!("delete failed for {}", vm.name)));
            }
            let linger = state.linger_after_delete;
            match state.snapshots.get_mut(id) {
                Some(snapshot) if !snapshot.deleted => {
                    snapshot.deleted = true;
                    snapshot.linger_polls = linger;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn list_disk_images<'a>(
        &'a self,
        vm: &'a Vm,
    ) -> RegistryFuture<'a, Vec<DiskImageId>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(RegistryCall::ListDiskImages(vm.name.clone()));
            Ok(state.disks.get(&vm.name).cloned().unwrap_or_default())
        })
    }

    fn disconnect(self) -> RegistryFuture<'static, (), Self::Error> {
        Box::pin(async move {
            self.state().calls.push(RegistryCall::Disconnect);
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
