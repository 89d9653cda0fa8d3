use std::io;
use std::process::{Output, Stdio};

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

/// Runs `cmd` to completion, feeding `stdin` (if any) and collecting both
/// output streams in full.
pub async fn run_command_drained(
    cmd: &mut Command,
    stdin: Option<Bytes>,
    label: &str,
) -> anyhow::Result<Output> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {label}"))?;

    let stdout_pipe = child.stdout.take().context("missing stdout pipe")?;
    let stderr_pipe = child.stderr.take().context("missing stderr pipe")?;
    let stdout_task = tokio::spawn(drain(stdout_pipe));
    let stderr_task = tokio::spawn(drain(stderr_pipe));

    let mut write_result = Ok(());
    if let Some(payload) = stdin {
        let mut pipe = child.stdin.take().context("missing stdin pipe")?;
        write_result = pipe.write_all(&payload).await;
        if write_result.is_ok() {
            write_result = pipe.shutdown().await;
        }
        drop(pipe);
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("{label} failed"))?;
    let stdout = stdout_task
        .await
        .context("stdout task join")?
        .context("stdout read")?;
    let stderr = stderr_task
        .await
        .context("stderr task join")?
        .context("stderr read")?;

    // A broken pipe on a failed command is reported through its status.
    if status.success() {
        write_result.with_context(|| format!("failed to write stdin of {label}"))?;
    }
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

pub async fn run_command_with_timeout(
    cmd: &mut Command,
    command_timeout: Duration,
    label: &str,
) -> anyhow::Result<Output> {
    match timeout(command_timeout, run_command_drained(cmd, None, label)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("{label} timed out after {}s", command_timeout.as_secs()),
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const TEN_MB: usize = 10 * 1024 * 1024;

    #[tokio::test]
    async fn drains_large_output_on_both_streams() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!(
            "yes out | head -c {TEN_MB}; yes err | head -c {TEN_MB} >&2"
        ));
        let output = run_command_drained(&mut cmd, None, "sh")
            .await
            .expect("output");
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), TEN_MB);
        assert_eq!(output.stderr.len(), TEN_MB);
        assert!(output.stdout.starts_with(b"out\nout\n"));
        assert!(output.stderr.starts_with(b"err\nerr\n"));
    }

    #[tokio::test]
    async fn feeds_stdin_payload() {
        let mut cmd = Command::new("cat");
        let output = run_command_drained(&mut cmd, Some(Bytes::from_static(b"payload")), "cat")
            .await
            .expect("output");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"payload");
    }

    #[tokio::test]
    async fn keeps_exit_code_and_streams() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo partial; echo broken >&2; exit 3");
        let output = run_command_drained(&mut cmd, None, "sh")
            .await
            .expect("output");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"partial\n");
        assert_eq!(output.stderr, b"broken\n");
    }

    #[tokio::test]
    async fn times_out_slow_commands() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command_with_timeout(&mut cmd, Duration::from_millis(100), "sleep")
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("sleep timed out"));
    }
}
