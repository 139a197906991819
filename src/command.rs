//! Host commands with a hard deadline.
//!
//! Every probe that shells out goes through [`run_with_timeout`]. A command
//! that does not exit before the deadline is killed and reported as a
//! [`WardenError::HostQueryFailure`], the same as a command that failed to
//! start or exited non-zero.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::{WardenError, WardenResult};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run `program` with `args` and return its stdout as (lossy) UTF-8.
pub fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> WardenResult<String> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        // CREATE_NO_WINDOW: no console flash when launched from the GUI shell.
        command.creation_flags(0x0800_0000);
    }

    let mut child = command
        .spawn()
        .map_err(|e| WardenError::HostQueryFailure(format!("{program}: {e}")))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| WardenError::HostQueryFailure(format!("{program}: stdout not captured")))?;

    // Drain on a separate thread so a chatty child never blocks on a full pipe.
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WardenError::HostQueryFailure(format!(
                    "{program} timed out after {}ms",
                    timeout.as_millis()
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(WardenError::HostQueryFailure(format!("{program}: {e}")));
            }
        }
    };

    let output = reader
        .join()
        .map_err(|_| WardenError::HostQueryFailure(format!("{program}: output reader panicked")))?;

    if !status.success() {
        return Err(WardenError::HostQueryFailure(format!(
            "{program} exited with {status}"
        )));
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = run_with_timeout("sh", &["-c", "echo probe-ok"], Duration::from_secs(5))
            .expect("sh should run");
        assert_eq!(out.trim(), "probe-ok");
    }

    #[test]
    fn kills_commands_past_deadline() {
        let started = Instant::now();
        let result = run_with_timeout("sleep", &["10"], Duration::from_millis(200));

        match result {
            Err(WardenError::HostQueryFailure(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_a_query_failure() {
        let result = run_with_timeout(
            "definitely-not-a-real-binary-xyz",
            &[],
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(WardenError::HostQueryFailure(_))));
    }

    #[test]
    fn non_zero_exit_is_a_query_failure() {
        let result = run_with_timeout("sh", &["-c", "exit 3"], Duration::from_secs(5));
        assert!(matches!(result, Err(WardenError::HostQueryFailure(_))));
    }
}
