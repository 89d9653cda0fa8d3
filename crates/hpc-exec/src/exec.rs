use hpc_types::ExecutionResult;
use tracing::debug;

use crate::error::{HpcError, RemoteCommandError};
use crate::transport::RemoteSession;

/// Runs one command and insists on exit status zero.
pub async fn execute<S>(session: &S, command: &str) -> Result<ExecutionResult, HpcError>
where
    S: RemoteSession + ?Sized,
{
    debug!(event = "remote.exec", host = session.host(), command, "running remote command");
    let output = session.run_command(command).await?;
    if output.exit_code != 0 {
        return Err(RemoteCommandError {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
        .into());
    }
    Ok(ExecutionResult {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
