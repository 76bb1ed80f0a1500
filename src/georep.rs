//! Hand-off to the GlusterFS geo-replication scheduler.

use tracing::{error, info};

use crate::process::{CommandOutput, CommandRunner, Invocation, ProcessError};

/// Parameters forwarded to the scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicationRequest {
    /// Master (primary) volume name.
    pub master_volume: String,
    /// Slave host, optionally `user@host`.
    pub slave: String,
    /// Slave (replica) volume name.
    pub slave_volume: String,
    /// Seconds between the scheduler's own status checks.
    pub interval_secs: u64,
    /// Minutes before the scheduler gives up; zero disables its timeout.
    pub timeout_mins: u64,
}

/// Outcome of a scheduler run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GateOutcome {
    /// Captured output of the scheduler.
    pub output: CommandOutput,
}

impl GateOutcome {
    /// Returns `true` when the scheduler exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.output.is_success()
    }

    /// Process exit code to report for this outcome: zero on success, the
    /// scheduler's own non-zero code otherwise, or one when it had none.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.output.code {
            Some(0) => 0,
            Some(code) => code,
            None => 1,
        }
    }
}

/// Runs the external scheduler and interprets its exit status.
#[derive(Clone, Debug)]
pub struct ReplicationGate<'r, R: CommandRunner> {
    runner: &'r R,
    interpreter: String,
    script: String,
}

impl<'r, R: CommandRunner> ReplicationGate<'r, R> {
    /// Creates a gate that runs `<interpreter> <script> ...`.
    #[must_use]
    pub fn new(runner: &'r R, interpreter: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            runner,
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    /// Builds the scheduler command line for `request`.
    #[must_use]
    pub fn invocation(&self, request: &ReplicationRequest) -> Invocation {
        Invocation::new(&self.interpreter)
            .arg(&self.script)
            .arg(&request.master_volume)
            .arg(&request.slave)
            .arg(&request.slave_volume)
            .arg("--interval")
            .arg(request.interval_secs.to_string())
            .arg("--timeout")
            .arg(request.timeout_mins.to_string())
    }

    /// Runs the scheduler to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the scheduler cannot be spawned. A
    /// non-zero exit is reported through [`GateOutcome`].
    pub fn invoke(&self, request: &ReplicationRequest) -> Result<GateOutcome, ProcessError> {
        let output = self.runner.run(&self.invocation(request))?;
        if output.is_success() {
            info!(
                master = %request.master_volume,
                slave = %request.slave,
                slave_volume = %request.slave_volume,
                "geo-replication schedule completed"
            );
        } else {
            error!(
                rc = %output.status_text(),
                stdout = ?output.stdout_lines(),
                stderr = %output.stderr_lines().join("."),
                "geo-replication schedule failed"
            );
        }
        Ok(GateOutcome { output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::{fixture, rstest};

    #[fixture]
    fn request() -> ReplicationRequest {
        ReplicationRequest {
            master_volume: String::from("data"),
            slave: String::from("root@replica"),
            slave_volume: String::from("data-rep"),
            interval_secs: 10,
            timeout_mins: 0,
        }
    }

    #[rstest]
    fn invocation_forwards_all_arguments(request: ReplicationRequest) {
        let runner = ScriptedRunner::new();
        let gate = ReplicationGate::new(&runner, "/usr/bin/python", "/opt/schedule_georep.py");

        assert_eq!(
            gate.invocation(&request).command_line(),
            "/usr/bin/python /opt/schedule_georep.py data root@replica data-rep --interval 10 --timeout 0"
        );
    }

    #[rstest]
    #[case(Some(0), true, 0)]
    #[case(Some(2), false, 2)]
    #[case(None, false, 1)]
    fn invoke_interprets_exit_status(
        request: ReplicationRequest,
        #[case] code: Option<i32>,
        #[case] succeeded: bool,
        #[case] exit_code: i32,
    ) {
        let runner = ScriptedRunner::new();
        runner.push_output(code, "checkpoint pending", "faulty session");
        let gate = ReplicationGate::new(&runner, "python", "schedule_georep.py");

        let outcome = gate.invoke(&request).expect("scheduler should run");

        assert_eq!(outcome.succeeded(), succeeded);
        assert_eq!(outcome.exit_code(), exit_code);
        assert_eq!(runner.invocations().len(), 1);
    }

    #[rstest]
    fn invoke_surfaces_spawn_failure(request: ReplicationRequest) {
        let runner = ScriptedRunner::new();
        let gate = ReplicationGate::new(&runner, "python", "schedule_georep.py");

        let err = gate.invoke(&request).expect_err("no scripted response");
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
