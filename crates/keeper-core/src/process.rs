use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use wait_timeout::ChildExt;

/// Runs a command to completion within `timeout`, killing it on expiry.
///
/// The deadline also bounds collecting its output: a grandchild that keeps
/// stdout or stderr open past the deadline fails the run instead of
/// blocking the caller.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let deadline = Instant::now() + timeout;
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed launching {program}"))?;

    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    let waited = child
        .wait_timeout(timeout)
        .with_context(|| format!("failed waiting for {program}"));
    let status = match waited {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!(
                "{program} timed out after {}s; process was killed",
                timeout.as_secs_f64()
            ));
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };

    Ok(Output {
        status,
        stdout: collect(&stdout_rx, deadline, &program, "stdout")?,
        stderr: collect(&stderr_rx, deadline, &program, "stderr")?,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = pipe.read_to_end(&mut buffer);
                let _ = tx.send(buffer);
            });
        }
        None => {
            let _ = tx.send(Vec::new());
        }
    }
    rx
}

fn collect(
    rx: &Receiver<Vec<u8>>,
    deadline: Instant,
    program: &str,
    stream: &str,
) -> Result<Vec<u8>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buffer) => Ok(buffer),
        Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        Err(RecvTimeoutError::Timeout) => Err(anyhow!(
            "{program} exited but its {stream} stayed open past the timeout"
        )),
    }
}
