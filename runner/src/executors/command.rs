use super::ExecutorError;
use std::{
    io::Read,
    process::{Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, instrument, trace, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout and stderr joined, as shown to the user when a tool fails
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            (stdout, "") => stdout.to_owned(),
            ("", stderr) => stderr.to_owned(),
            (stdout, stderr) => format!("{stdout}\n{stderr}"),
        }
    }
}

// Read a pipe to the end on its own thread, otherwise a chatty child blocks on a full pipe
// while we are waiting for it to exit
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Some(mut pipe) = pipe {
            if let Err(error) = pipe.read_to_end(&mut buffer) {
                warn!("Failed to read child output: {error}");
            }
        }

        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// Run a command to completion, killing it once `timeout` is exceeded
#[instrument(skip(command), level = "debug")]
pub fn run(
    tool: &str,
    mut command: Command,
    timeout: Duration,
) -> Result<CommandOutput, ExecutorError> {
    debug!(command = ?command, "Spawning");
    let start = Instant::now();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            tool: tool.to_owned(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = child.wait_timeout(timeout).map_err(|source| ExecutorError::Wait {
        tool: tool.to_owned(),
        source,
    })?;

    let status = match waited {
        Some(status) => status,
        None => {
            // child hasn't exited yet
            if let Err(error) = child.kill().and_then(|()| child.wait().map(|_| ())) {
                warn!("Failed to kill {tool} after timeout: {error}");
            }

            return Err(ExecutorError::Timeout {
                tool: tool.to_owned(),
                timeout,
            });
        }
    };

    let output = CommandOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };

    debug!(
        "Finished in {} ms | status: {}",
        start.elapsed().as_millis(),
        output.status
    );
    trace!("Output: {}", output.stdout);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn captures_both_streams() {
        let output = run(
            "sh",
            shell("echo out; echo err >&2; exit 3"),
            Duration::from_secs(10),
        )
        .unwrap();

        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.combined(), "out\nerr");
    }

    #[test]
    fn large_output_does_not_block() {
        // well beyond a pipe buffer
        let output = run(
            "sh",
            shell("i=0; while [ $i -lt 20000 ]; do echo 123456789; i=$((i+1)); done"),
            Duration::from_secs(30),
        )
        .unwrap();

        assert!(output.status.success());
        assert_eq!(output.stdout.lines().count(), 20000);
    }

    #[test]
    fn slow_commands_are_killed() {
        let error = run("sh", shell("sleep 5"), Duration::from_millis(100)).unwrap_err();

        assert!(matches!(error, ExecutorError::Timeout { .. }));
    }

    #[test]
    fn missing_binaries_fail_to_spawn() {
        let error = run(
            "sacct",
            Command::new("/nonexistent/jobwin/sacct"),
            Duration::from_secs(1),
        )
        .unwrap_err();

        assert!(matches!(error, ExecutorError::Spawn { .. }));
        assert_eq!(error.exit_code(), 1);
    }
}
