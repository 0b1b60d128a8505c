use anyhow::{Context, Result, anyhow};
use std::io::{Read, Write};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Spawns `cmd`, feeds `input` on stdin and collects its output, killing it after `timeout`.
pub fn run_with_stdin(mut cmd: Command, input: &[u8], timeout: Option<Duration>) -> Result<Output> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!("spawn {} stdin_bytes={} timeout={:?}", program, input.len(), timeout);

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {program}"))?;

    let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
    let payload = input.to_vec();
    // The child may start writing before it has read everything we send.
    let writer = std::thread::spawn(move || -> std::io::Result<()> {
        let res = stdin.write_all(&payload);
        drop(stdin);
        match res {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    });

    let output = match timeout {
        Some(limit) => wait_with_timeout(&mut child, limit, &program),
        None => {
            let stdout = read_pipe(child.stdout.take());
            let stderr = read_pipe(child.stderr.take());
            let status = child.wait().with_context(|| format!("waiting for {program}"))?;
            Ok(Output {
                status,
                stdout: collect(&stdout, None, "stdout")?,
                stderr: collect(&stderr, None, "stderr")?,
            })
        }
    };

    // The writer only blocks while the child keeps stdin open and unread.
    if writer.is_finished() {
        if let Ok(Err(e)) = writer.join() {
            warn!("writing stdin to {program} failed: {e}");
        }
    }
    output
}

type PipeRx = mpsc::Receiver<Result<Vec<u8>>>;

/// Reads a pipe to EOF on a detached thread. A grandchild that inherited the
/// pipe can hold it open indefinitely, so callers wait on the channel with a bound.
fn read_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> PipeRx {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let res = match pipe {
            Some(mut r) => r.read_to_end(&mut buf).map(|_| buf).with_context(|| "read pipe"),
            None => Ok(buf),
        };
        let _ = tx.send(res);
    });
    rx
}

fn collect(rx: &PipeRx, within: Option<Duration>, name: &str) -> Result<Vec<u8>> {
    match within {
        None => rx
            .recv()
            .map_err(|_| anyhow!("{name} reader thread panicked"))?,
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => Err(anyhow!("{name} still open after {limit:?}")),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{name} reader thread panicked")),
        },
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration, program: &str) -> Result<Output> {
    // Drain pipes while waiting so a chatty child can't block on a full buffer.
    let stdout_rx = read_pipe(child.stdout.take());
    let stderr_rx = read_pipe(child.stderr.take());

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let left = timeout.saturating_sub(start.elapsed());
            let stdout = collect(&stdout_rx, Some(left), "stdout")
                .with_context(|| format!("{program} exceeded timeout ({timeout:?})"))?;
            let left = timeout.saturating_sub(start.elapsed());
            let stderr = collect(&stderr_rx, Some(left), "stderr").unwrap_or_default();
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("{} timed out after {:?}", program, timeout);
            let _ = child.kill();
            child.wait().with_context(|| "wait after kill")?;
            // Children of the killed process may still hold stderr; don't wait for them.
            let stderr = collect(&stderr_rx, Some(Duration::from_millis(100)), "stderr")
                .unwrap_or_default();
            return Err(anyhow!(
                "{} exceeded timeout ({:?}); stderr: {}",
                program,
                timeout,
                String::from_utf8_lossy(&stderr).trim()
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Runs `cmd` and fails with its stderr when it exits non-zero.
pub fn run_checked(cmd: Command, input: &[u8], timeout: Option<Duration>) -> Result<Vec<u8>> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let output = run_with_stdin(cmd, input, timeout)?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    if !output.stderr.is_empty() {
        debug!("{} stderr: {}", program, String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(output.stdout)
}
