use hpc_types::{RemoteEnvironment, RunConfig, WorkflowSpec};
use tracing::info;

use crate::error::HpcError;
use crate::exec::execute;
use crate::run_id::RunIdentity;
use crate::shell::{join_remote, shell_escape};
use crate::transport::RemoteSession;

pub const DESCRIPTOR_FILE: &str = "workflow.cwl";
pub const PARAMS_FILE: &str = "run.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkspace {
    pub scratch_root: String,
    pub run_parent: String,
    pub root: String,
    pub input_dir: String,
    pub script_dir: String,
    pub run_id: RunIdentity,
}

impl RemoteWorkspace {
    pub fn new(
        scratch_root: &str,
        config: &RunConfig,
        workflow: &WorkflowSpec,
        run_id: RunIdentity,
    ) -> Self {
        let run_parent = join_remote(scratch_root, &config.subdirectory);
        let root = join_remote(&run_parent, run_id.as_str());
        Self {
            scratch_root: scratch_root.to_string(),
            input_dir: join_remote(&root, &workflow.input_subdir),
            script_dir: join_remote(&root, &workflow.script_subdir),
            run_parent,
            root,
            run_id,
        }
    }

    pub fn output_dir(&self, output_subdir: &str) -> String {
        join_remote(&self.root, output_subdir)
    }

    pub fn descriptor_path(&self) -> String {
        join_remote(&self.root, DESCRIPTOR_FILE)
    }

    pub fn params_path(&self) -> String {
        join_remote(&self.root, PARAMS_FILE)
    }
}

pub(crate) fn scratch_command(env: &RemoteEnvironment) -> String {
    format!("printf '%s\\n' \"${}\"", env.scratch_var)
}

// The run root gets a plain `mkdir` so an existing directory is an error.
pub(crate) fn mkdir_command(workspace: &RemoteWorkspace) -> String {
    format!(
        "mkdir -p {} && mkdir {} && mkdir {} {}",
        shell_escape(&workspace.run_parent),
        shell_escape(&workspace.root),
        shell_escape(&workspace.input_dir),
        shell_escape(&workspace.script_dir),
    )
}

pub async fn provision<S>(
    session: &S,
    config: &RunConfig,
    workflow: &WorkflowSpec,
    env: &RemoteEnvironment,
    run_id: &RunIdentity,
) -> Result<RemoteWorkspace, HpcError>
where
    S: RemoteSession + ?Sized,
{
    let scratch = execute(session, &scratch_command(env))
        .await
        .map_err(|err| provision_error(format!("failed to read ${}", env.scratch_var), err))?;
    let scratch_root = scratch.stdout.trim();
    if scratch_root.is_empty() {
        return Err(HpcError::Provision {
            reason: format!("${} is not set on {}", env.scratch_var, session.host()),
            source: None,
        });
    }
    if !scratch_root.starts_with('/') || scratch_root.contains('\n') {
        return Err(HpcError::Provision {
            reason: format!(
                "${} is not an absolute path: {scratch_root:?}",
                env.scratch_var
            ),
            source: None,
        });
    }

    let workspace = RemoteWorkspace::new(scratch_root, config, workflow, run_id.clone());
    execute(session, &mkdir_command(&workspace))
        .await
        .map_err(|err| {
            provision_error(format!("failed to create {}", workspace.root), err)
        })?;
    info!(
        event = "run.workspace.ready",
        root = %workspace.root,
        "remote workspace created"
    );
    Ok(workspace)
}

fn provision_error(reason: String, err: HpcError) -> HpcError {
    match err {
        HpcError::RemoteCommand(source) => HpcError::Provision {
            reason,
            source: Some(source),
        },
        other => other,
    }
}
