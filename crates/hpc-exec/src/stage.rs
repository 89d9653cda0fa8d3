use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::error::HpcError;
use crate::transport::RemoteSession;
use crate::workspace::RemoteWorkspace;

#[derive(Debug, Clone)]
pub struct StagedArtifacts<'a> {
    pub descriptor: String,
    pub params_json: String,
    pub script: &'a Path,
    pub inputs: &'a [PathBuf],
}

pub async fn stage_artifacts<S>(
    session: &S,
    workspace: &RemoteWorkspace,
    artifacts: &StagedArtifacts<'_>,
) -> Result<(), HpcError>
where
    S: RemoteSession + ?Sized,
{
    session
        .upload_bytes(
            Bytes::from(artifacts.descriptor.clone()),
            &workspace.descriptor_path(),
        )
        .await?;
    session
        .upload_bytes(
            Bytes::from(artifacts.params_json.clone()),
            &workspace.params_path(),
        )
        .await?;
    session
        .upload_file(artifacts.script, &workspace.script_dir)
        .await?;
    for input in artifacts.inputs {
        session.upload_file(input, &workspace.input_dir).await?;
    }
    debug!(
        event = "run.stage.uploaded",
        inputs = artifacts.inputs.len(),
        "artifacts uploaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_id::RunIdentity;
    use crate::test_utils::{Call, MockSession};
    use hpc_types::{RunConfig, WorkflowSpec};
    use std::fs;

    fn workspace() -> RemoteWorkspace {
        let workflow = WorkflowSpec::new("seurat.cwl", "img", "Rscript.R");
        RemoteWorkspace::new(
            "/scratch/jdoe",
            &RunConfig::default(),
            &workflow,
            RunIdentity::generate(),
        )
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, name).expect("write");
        path
    }

    #[tokio::test]
    async fn uploads_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = touch(dir.path(), "Rscript.R");
        let inputs = vec![
            touch(dir.path(), "matrix.mtx.gz"),
            touch(dir.path(), "barcodes.tsv.gz"),
        ];
        let workspace = workspace();
        let session = MockSession::new();
        let artifacts = StagedArtifacts {
            descriptor: "cwlVersion: v1.0\n".to_string(),
            params_json: "{}".to_string(),
            script: &script,
            inputs: &inputs,
        };
        stage_artifacts(&session, &workspace, &artifacts)
            .await
            .expect("staged");

        assert_eq!(
            session.calls(),
            vec![
                Call::UploadBytes {
                    path: workspace.descriptor_path(),
                    contents: "cwlVersion: v1.0\n".to_string(),
                },
                Call::UploadBytes {
                    path: workspace.params_path(),
                    contents: "{}".to_string(),
                },
                Call::UploadFile {
                    local: script.clone(),
                    remote_dir: workspace.script_dir.clone(),
                },
                Call::UploadFile {
                    local: inputs[0].clone(),
                    remote_dir: workspace.input_dir.clone(),
                },
                Call::UploadFile {
                    local: inputs[1].clone(),
                    remote_dir: workspace.input_dir.clone(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_upload_stops_staging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = touch(dir.path(), "Rscript.R");
        let inputs = vec![touch(dir.path(), "a.tsv"), touch(dir.path(), "b.tsv")];
        let session = MockSession::new().fail_upload_of("a.tsv");
        let artifacts = StagedArtifacts {
            descriptor: String::new(),
            params_json: String::new(),
            script: &script,
            inputs: &inputs,
        };
        let err = stage_artifacts(&session, &workspace(), &artifacts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Disk quota exceeded"));
        assert_eq!(session.calls().len(), 4);
    }
}
