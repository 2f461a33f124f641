//! Single plugin execution: spawn, capture output, enforce timeout.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use vigil_types::Timestamp;

use crate::error::{Error, Result};

/// Grace period between SIGTERM and SIGKILL when a check overruns its
/// timeout (§4.1).
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Everything needed to run one check plugin.
#[derive(Debug, Clone)]
pub struct CheckInvocation {
    /// `argv[0]` is the executable; spawned without a shell.
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl CheckInvocation {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = Some(stdin);
        self
    }
}

/// The outcome of one plugin execution. Never an `Err` for a legitimate
/// check failure — spawn/timeout failures are folded into `exit_status =
/// 128` with a diagnostic message in `output`, matching a plugin that
/// itself failed (§4.1: "never throws").
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub exit_status: u32,
    pub output: String,
    pub execution_start: Timestamp,
    pub execution_end: Timestamp,
}

/// Exit status used when the plugin could not be run at all, or was
/// killed after overrunning its timeout.
const EXIT_STATUS_RUNNER_FAILURE: u32 = 128;

/// Runs one check plugin to completion or until `invocation.timeout`
/// elapses, whichever comes first.
///
/// Never returns `Err`: a failure to spawn, write stdin, or read output
/// is folded into a synthetic [`CheckOutcome`] so callers can always feed
/// the result straight into `CheckResult::from_plugin_output`.
pub async fn run(invocation: &CheckInvocation) -> CheckOutcome {
    let execution_start = Timestamp::now();
    match run_inner(invocation).await {
        Ok(mut outcome) => {
            outcome.execution_start = execution_start;
            outcome
        }
        Err(err) => CheckOutcome {
            exit_status: EXIT_STATUS_RUNNER_FAILURE,
            output: format!("UNKNOWN - {err}"),
            execution_start,
            execution_end: Timestamp::now(),
        },
    }
}

async fn run_inner(invocation: &CheckInvocation) -> Result<CheckOutcome> {
    let Some(program) = invocation.argv.first() else {
        return Err(Error::EmptyCommand);
    };

    let mut command = Command::new(program);
    command
        .args(&invocation.argv[1..])
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| Error::Spawn {
        command: invocation.argv.clone(),
        source,
    })?;

    if let Some(payload) = &invocation.stdin {
        let mut stdin = child.stdin.take().expect("stdin was requested as piped");
        stdin
            .write_all(payload)
            .await
            .map_err(Error::StdinWrite)?;
        drop(stdin);
    }

    let outcome = tokio::time::timeout(invocation.timeout, child.wait_with_output()).await;

    match outcome {
        Ok(Ok(output)) => {
            let exit_status = output
                .status
                .code()
                .map_or(EXIT_STATUS_RUNNER_FAILURE, |code| code as u32);
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if text.trim().is_empty() && !output.stderr.is_empty() {
                text = String::from_utf8_lossy(&output.stderr).into_owned();
            }
            Ok(CheckOutcome {
                exit_status,
                output: text,
                execution_start: Timestamp::now(),
                execution_end: Timestamp::now(),
            })
        }
        Ok(Err(source)) => Err(Error::Wait(source)),
        Err(_elapsed) => {
            terminate_then_kill(&mut child).await;
            Ok(CheckOutcome {
                exit_status: EXIT_STATUS_RUNNER_FAILURE,
                output: format!(
                    "UNKNOWN - check timed out after {:.1}s",
                    invocation.timeout.as_secs_f64()
                ),
                execution_start: Timestamp::now(),
                execution_end: Timestamp::now(),
            })
        }
    }
}

#[cfg(unix)]
async fn terminate_then_kill(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
    }
    if tokio::time::timeout(TERMINATE_GRACE, child.wait())
        .await
        .is_err()
    {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn terminate_then_kill(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_is_reported_as_runner_failure() {
        let invocation = CheckInvocation::new(Vec::new(), Duration::from_secs(1));
        let outcome = run(&invocation).await;
        assert_eq!(outcome.exit_status, EXIT_STATUS_RUNNER_FAILURE);
    }

    #[tokio::test]
    async fn unknown_binary_is_reported_as_runner_failure() {
        let invocation = CheckInvocation::new(
            vec!["/no/such/check-plugin-binary".to_string()],
            Duration::from_secs(1),
        );
        let outcome = run(&invocation).await;
        assert_eq!(outcome.exit_status, EXIT_STATUS_RUNNER_FAILURE);
        assert!(outcome.output.contains("UNKNOWN"));
    }

    #[tokio::test]
    async fn successful_run_captures_stdout_and_exit_status() {
        let invocation = CheckInvocation::new(
            vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "echo 'OK - all good|x=1' && exit 0".to_string(),
            ],
            Duration::from_secs(5),
        );
        let outcome = run(&invocation).await;
        assert_eq!(outcome.exit_status, 0);
        assert!(outcome.output.contains("OK - all good"));
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let invocation = CheckInvocation::new(
            vec!["/bin/sleep".to_string(), "10".to_string()],
            Duration::from_millis(200),
        );
        let outcome = run(&invocation).await;
        assert_eq!(outcome.exit_status, EXIT_STATUS_RUNNER_FAILURE);
        assert!(outcome.output.contains("timed out"));
    }

    #[tokio::test]
    async fn stdin_payload_is_delivered() {
        let invocation = CheckInvocation::new(
            vec!["/bin/cat".to_string()],
            Duration::from_secs(5),
        )
        .with_stdin(b"passive result\n".to_vec());
        let outcome = run(&invocation).await;
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(outcome.output.trim(), "passive result");
    }
}
