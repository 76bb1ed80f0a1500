//! Scoped GlusterFS client mounts of the slave volume.
//!
//! [`RemoteVolumeMount::acquire`] returns a [`MountGuard`]. Dropping the
//! guard unmounts the volume and removes the temporary directory, whether
//! the caller finished normally, returned early with an error, or unwound.
//! SIGINT and SIGTERM do not bypass the guard: the binary turns them into
//! cancellation (see `shutdown`), so the holder returns and the guard drops.

use std::env;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::process::{CommandRunner, Invocation};

/// Binaries and log destination used for the mount.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountCommands {
    /// GlusterFS FUSE client.
    pub glusterfs_bin: String,
    /// Mount point probe.
    pub mountpoint_bin: String,
    /// Unmount binary.
    pub umount_bin: String,
    /// Client log file.
    pub log_path: String,
}

/// Errors that prevent a mount attempt from starting.
#[derive(Debug, Error)]
pub enum MountError {
    /// Raised when the temporary mount directory cannot be created.
    #[error("failed to create mount directory {path}: {source}")]
    TempDir {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when the system temporary directory is not valid UTF-8.
    #[error("temporary directory is not valid UTF-8: {0}")]
    NonUtf8TempDir(String),
}

/// Mounts remote volumes on demand.
#[derive(Debug)]
pub struct RemoteVolumeMount<'r, R: CommandRunner> {
    runner: &'r R,
    commands: MountCommands,
    base_dir: Option<Utf8PathBuf>,
}

impl<'r, R: CommandRunner> RemoteVolumeMount<'r, R> {
    /// Creates a mounter that places mount points under the system
    /// temporary directory.
    #[must_use]
    pub const fn new(runner: &'r R, commands: MountCommands) -> Self {
        Self {
            runner,
            commands,
            base_dir: None,
        }
    }

    /// Places mount points under `dir` instead of the system temporary
    /// directory.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Mounts `volume` served by `host_spec` on a fresh directory.
    ///
    /// `host_spec` may take the `user@host` form; only the host is handed
    /// to the GlusterFS client. A failed mount is logged and yields a guard
    /// whose [`MountGuard::path`] is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] only when the mount directory cannot be
    /// created; command failures never surface as errors.
    pub fn acquire(&self, host_spec: &str, volume: &str) -> Result<MountGuard<'r, R>, MountError> {
        let base = match self.base_dir {
            Some(ref dir) => dir.clone(),
            None => Utf8PathBuf::from_path_buf(env::temp_dir())
                .map_err(|path| MountError::NonUtf8TempDir(path.display().to_string()))?,
        };
        let dir = base.join(format!("geosnap-{}", Uuid::new_v4().simple()));
        Dir::create_ambient_dir_all(&dir, ambient_authority()).map_err(|source| {
            MountError::TempDir {
                path: dir.clone(),
                source,
            }
        })?;

        let mut guard = MountGuard {
            runner: self.runner,
            umount_bin: self.commands.umount_bin.clone(),
            dir,
            mounted: false,
        };

        let host = volfile_server(host_spec);
        let mount = Invocation::new(&self.commands.glusterfs_bin)
            .arg("--volfile-server")
            .arg(host)
            .arg("--volfile-id")
            .arg(volume)
            .arg("-l")
            .arg(&self.commands.log_path)
            .arg(guard.dir.as_str());
        match self.runner.run(&mount) {
            Ok(output) if output.is_success() => {}
            Ok(output) => {
                error!(
                    host,
                    volume,
                    rc = %output.status_text(),
                    stderr = %output.stderr.trim(),
                    "failed to mount slave volume"
                );
                return Ok(guard);
            }
            Err(err) => {
                error!(host, volume, error = %err, "failed to run mount command");
                return Ok(guard);
            }
        }

        let probe = Invocation::new(&self.commands.mountpoint_bin)
            .arg("-q")
            .arg(guard.dir.as_str());
        match self.runner.run(&probe) {
            Ok(output) if output.is_success() => {
                info!(host, volume, path = %guard.dir, "mounted slave volume");
                guard.mounted = true;
            }
            Ok(_) => error!(path = %guard.dir, "mount command succeeded but path is not a mount point"),
            Err(err) => error!(path = %guard.dir, error = %err, "failed to probe mount point"),
        }
        Ok(guard)
    }
}

/// Live mount of a remote volume; released on drop.
#[derive(Debug)]
pub struct MountGuard<'r, R: CommandRunner> {
    runner: &'r R,
    umount_bin: String,
    dir: Utf8PathBuf,
    mounted: bool,
}

impl<R: CommandRunner> MountGuard<'_, R> {
    /// Root of the mounted volume, or `None` when mounting failed.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.mounted.then_some(self.dir.as_path())
    }

    /// Directory created for the mount, whether or not it is mounted.
    #[must_use]
    pub fn mount_dir(&self) -> &Utf8Path {
        &self.dir
    }
}

impl<R: CommandRunner> Drop for MountGuard<'_, R> {
    fn drop(&mut self) {
        let umount = Invocation::new(&self.umount_bin).arg(self.dir.as_str());
        match self.runner.run(&umount) {
            Ok(output) if output.is_success() => debug!(path = %self.dir, "unmounted slave volume"),
            Ok(output) if self.mounted => warn!(
                path = %self.dir,
                rc = %output.status_text(),
                stderr = %output.stderr.trim(),
                "failed to unmount slave volume"
            ),
            Ok(_) => debug!(path = %self.dir, "nothing to unmount"),
            Err(err) => warn!(path = %self.dir, error = %err, "failed to run unmount command"),
        }

        // Non-recursive: a directory that is still mounted must not be emptied.
        if let Err(err) = remove_empty_dir(&self.dir) {
            warn!(path = %self.dir, error = %err, "failed to remove mount directory");
        }
    }
}

fn remove_empty_dir(path: &Utf8Path) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("/"));
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "mount path has no name"))?;
    Dir::open_ambient_dir(parent, ambient_authority())?.remove_dir(name)
}

/// Host part of a `[user@]host` slave specification.
#[must_use]
pub fn volfile_server(host_spec: &str) -> &str {
    host_spec
        .rsplit_once('@')
        .map_or(host_spec, |(_, host)| host)
}
