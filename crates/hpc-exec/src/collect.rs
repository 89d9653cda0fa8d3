use std::path::Path;

use hpc_types::{ExecutionResult, WorkflowSpec};
use tracing::info;

use crate::error::{HpcError, TransferDirection};
use crate::transport::RemoteSession;
use crate::workspace::RemoteWorkspace;

pub async fn collect_results<S>(
    session: &S,
    workspace: &RemoteWorkspace,
    workflow: &WorkflowSpec,
    local_dir: &Path,
    launch_output: ExecutionResult,
) -> Result<ExecutionResult, HpcError>
where
    S: RemoteSession + ?Sized,
{
    tokio::fs::create_dir_all(local_dir).await.map_err(|err| {
        HpcError::transfer(
            local_dir,
            TransferDirection::Download,
            format!("failed to create local directory: {err}"),
        )
    })?;
    let remote_output = workspace.output_dir(&workflow.output_subdir);
    session.download_dir(&remote_output, local_dir).await?;
    info!(
        event = "run.collect.downloaded",
        remote = %remote_output,
        local = %local_dir.display(),
        "results downloaded"
    );
    Ok(launch_output)
}
