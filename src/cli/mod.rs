//! Command-line interface definitions for the `geosnap` binary.
//!
//! Shared by the binary and the build script, which renders the manual page
//! from the same parser.

use clap::Parser;

/// Snapshot running VMs, run a geo-replication schedule, then clean up.
#[derive(Debug, Parser)]
#[command(
    name = "geosnap",
    version,
    about = "Snapshot oVirt VMs around a GlusterFS geo-replication run",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Master (primary) GlusterFS volume.
    #[arg(value_name = "MASTERVOL")]
    pub(crate) mastervol: String,
    /// Slave host, optionally as `user@host`.
    #[arg(value_name = "SLAVE")]
    pub(crate) slave: String,
    /// Slave (replica) GlusterFS volume.
    #[arg(value_name = "SLAVEVOL")]
    pub(crate) slavevol: String,
    /// Seconds between geo-replication status checks.
    #[arg(short = 'i', long, value_name = "SECONDS", default_value_t = 10)]
    pub(crate) interval: u64,
    /// Engine credentials file (TOML with a `[GENERAL]` table).
    #[arg(short = 'c', long, value_name = "PATH", required = true)]
    pub(crate) config: String,
    /// Minutes before the scheduler gives up; zero disables the timeout.
    #[arg(short = 't', long, value_name = "MINUTES", default_value_t = 0)]
    pub(crate) timeout: u64,
}
