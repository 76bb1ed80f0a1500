//! Configuration: engine credentials from the `--config` file and tool
//! settings layered via `ortho-config`.

use std::ffi::OsString;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::{OrthoConfig, toml};
use serde::Deserialize;
use thiserror::Error;

/// Section of the credentials file holding the engine settings.
pub const GENERAL_SECTION: &str = "GENERAL";

/// Default scheduler interpreter.
pub const DEFAULT_GEOREP_INTERPRETER: &str = "/usr/bin/python";

/// Default geo-replication scheduler script shipped with GlusterFS.
pub const DEFAULT_GEOREP_SCRIPT: &str = "/usr/share/glusterfs/scripts/schedule_georep.py";

/// Default log file for the temporary GlusterFS client mount.
pub const DEFAULT_MOUNT_LOG_PATH: &str = "/var/log/glusterfs/geosnap-slave-mount.log";

/// Name of the hosted-engine VM, which is never snapshotted.
pub const DEFAULT_MANAGEMENT_VM_NAME: &str = "HostedEngine";

/// Connection settings for the virtualization manager.
#[derive(Clone, Eq, PartialEq)]
pub struct EngineCredentials {
    /// Engine API URL, for example `https://engine/ovirt-engine/api`.
    pub server: String,
    /// User name, for example `admin@internal`.
    pub user_name: String,
    /// Password for `user_name`.
    pub password: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

impl std::fmt::Debug for EngineCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCredentials")
            .field("server", &self.server)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "GENERAL")]
    general: Option<GeneralSection>,
}

#[derive(Debug, Default, Deserialize)]
struct GeneralSection {
    server: Option<String>,
    user_name: Option<String>,
    password: Option<String>,
    insecure: Option<bool>,
}

impl EngineCredentials {
    /// Reads the `[GENERAL]` table of the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read,
    /// [`ConfigError::Parse`] when it is not valid TOML, and
    /// [`ConfigError::MissingField`] when `server`, `user_name`, or
    /// `password` is absent or blank.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = read_file(path)?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Utf8Path, contents: &str) -> Result<Self, ConfigError> {
        let file: CredentialsFile = toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let section = file.general.unwrap_or_default();

        Ok(Self {
            server: require_field(path, section.server, "server")?,
            user_name: require_field(path, section.user_name, "user_name")?,
            password: require_field(path, section.password, "password")?,
            insecure: section.insecure.unwrap_or(true),
        })
    }
}

fn require_field(
    path: &Utf8Path,
    value: Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_owned()),
        _ => Err(ConfigError::MissingField {
            path: path.to_path_buf(),
            key,
        }),
    }
}

fn read_file(path: &Utf8Path) -> Result<String, ConfigError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| ConfigError::Io {
        path: path.to_path_buf(),
        message: String::from("configuration file path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(path, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Tool paths and polling behaviour loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "GEOSNAP")]
pub struct ToolConfig {
    /// Interpreter used to run the geo-replication scheduler.
    #[ortho_config(default = DEFAULT_GEOREP_INTERPRETER.to_owned())]
    pub georep_interpreter: String,
    /// Path to the geo-replication scheduler script.
    #[ortho_config(default = DEFAULT_GEOREP_SCRIPT.to_owned())]
    pub georep_script: String,
    /// GlusterFS FUSE client binary.
    #[ortho_config(default = "glusterfs".to_owned())]
    pub glusterfs_bin: String,
    /// Binary used to confirm the temporary directory is a mount point.
    #[ortho_config(default = "mountpoint".to_owned())]
    pub mountpoint_bin: String,
    /// Binary used to release the mount.
    #[ortho_config(default = "umount".to_owned())]
    pub umount_bin: String,
    /// Log file handed to the GlusterFS client.
    #[ortho_config(default = DEFAULT_MOUNT_LOG_PATH.to_owned())]
    pub mount_log_path: String,
    /// Seconds between snapshot status checks.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Upper bound in seconds on each snapshot wait; unset waits forever.
    pub snapshot_wait_timeout_secs: Option<u64>,
    /// Maximum number of VMs fetched from the registry.
    #[ortho_config(default = 100)]
    pub vm_page_size: u32,
    /// VM excluded from every cycle.
    #[ortho_config(default = DEFAULT_MANAGEMENT_VM_NAME.to_owned())]
    pub management_vm_name: String,
}

impl ToolConfig {
    /// Loads tool settings from defaults, configuration files, and
    /// `GEOSNAP_*` environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Layered`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("geosnap")])
            .map_err(|err| ConfigError::Layered(err.to_string()))
    }

    /// Ensures binary paths are present and the poll interval is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTool`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.georep_interpreter, "georep_interpreter"),
            (&self.georep_script, "georep_script"),
            (&self.glusterfs_bin, "glusterfs_bin"),
            (&self.mountpoint_bin, "mountpoint_bin"),
            (&self.umount_bin, "umount_bin"),
            (&self.mount_log_path, "mount_log_path"),
        ];
        for (value, field) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidTool {
                    field: field.to_owned(),
                });
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidTool {
                field: String::from("poll_interval_secs"),
            });
        }
        if self.vm_page_size == 0 {
            return Err(ConfigError::InvalidTool {
                field: String::from("vm_page_size"),
            });
        }
        Ok(())
    }

    /// Interval between snapshot status checks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Optional bound on each snapshot wait.
    #[must_use]
    pub fn snapshot_wait_timeout(&self) -> Option<Duration> {
        self.snapshot_wait_timeout_secs.map(Duration::from_secs)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when the credentials file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the credentials file is not valid TOML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a required engine setting is missing.
    #[error("missing {key}: add {key} to [GENERAL] in {path}")]
    MissingField {
        /// File that was read.
        path: Utf8PathBuf,
        /// Key that is absent or blank.
        key: &'static str,
    },
    /// Raised when a tool setting is blank or zero.
    #[error("invalid {field}: set GEOSNAP_{env_suffix}", env_suffix = field.to_uppercase())]
    InvalidTool {
        /// Offending field.
        field: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("tool configuration parsing failed: {0}")]
    Layered(String),
}
