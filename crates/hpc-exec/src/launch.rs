use hpc_types::{ExecutionResult, RemoteEnvironment, RunConfig, WorkflowSpec};
use tracing::info;

use crate::error::HpcError;
use crate::exec::execute;
use crate::shell::shell_escape;
use crate::transport::RemoteSession;
use crate::workspace::{RemoteWorkspace, DESCRIPTOR_FILE, PARAMS_FILE};

pub fn build_launch_command(
    config: &RunConfig,
    env: &RemoteEnvironment,
    workflow: &WorkflowSpec,
    workspace: &RemoteWorkspace,
) -> String {
    let venv = format!("venv-{}", config.tool_version);
    let mut lines = vec![
        "set -e".to_string(),
        format!("cd {}", shell_escape(&workspace.run_parent)),
    ];
    if !env.modules.is_empty() {
        let modules: Vec<String> = env.modules.iter().map(|m| shell_escape(m)).collect();
        lines.push(format!("module load {}", modules.join(" ")));
    }
    lines.push(format!(
        "[ -d {venv_q} ] || virtualenv {venv_q}",
        venv_q = shell_escape(&venv)
    ));
    lines.push(format!(". {}", shell_escape(&format!("{venv}/bin/activate"))));
    lines.push(format!("pip install {}", shell_escape(&env.engine_package)));
    lines.push(format!("cd {}", shell_escape(workspace.run_id.as_str())));
    lines.push(format!(
        "singularity pull {}",
        shell_escape(&format!("docker://{}", workflow.container_image))
    ));
    lines.push(format!(
        "{}={} {} --batchSystem {} --singularity --retryCount 0 --workDir . --jobStore toil_job_store {} {}",
        env.scheduler_args_var,
        shell_escape(&config.scheduler_args),
        shell_escape(&env.runner),
        shell_escape(&env.batch_system),
        shell_escape(DESCRIPTOR_FILE),
        shell_escape(PARAMS_FILE),
    ));
    lines.join("\n")
}

pub async fn launch<S>(
    session: &S,
    config: &RunConfig,
    env: &RemoteEnvironment,
    workflow: &WorkflowSpec,
    workspace: &RemoteWorkspace,
) -> Result<ExecutionResult, HpcError>
where
    S: RemoteSession + ?Sized,
{
    let command = build_launch_command(config, env, workflow, workspace);
    info!(
        event = "run.launch.submit",
        run_id = %workspace.run_id,
        image = %workflow.container_image,
        "launching workflow"
    );
    execute(session, &command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_id::RunIdentity;
    use crate::test_utils::{output, MockSession};

    fn fixture() -> (RunConfig, RemoteEnvironment, WorkflowSpec, RemoteWorkspace) {
        let config = RunConfig::default();
        let workflow = WorkflowSpec::new(
            "seurat.cwl",
            "crescentdev/crescent-seurat:3.1.4",
            "Rscript.R",
        );
        let workspace = RemoteWorkspace::new(
            "/scratch/jdoe",
            &config,
            &workflow,
            RunIdentity::generate(),
        );
        (config, RemoteEnvironment::default(), workflow, workspace)
    }

    #[test]
    fn command_runs_every_step_in_order() {
        let (config, env, workflow, workspace) = fixture();
        let command = build_launch_command(&config, &env, &workflow, &workspace);
        let lines: Vec<&str> = command.lines().collect();
        assert_eq!(
            lines,
            vec![
                "set -e".to_string(),
                "cd '/scratch/jdoe/crescent-hpc'".to_string(),
                "module load 'python/3.6' 'singularity/3'".to_string(),
                "[ -d 'venv-20200617' ] || virtualenv 'venv-20200617'".to_string(),
                ". 'venv-20200617/bin/activate'".to_string(),
                "pip install 'toil[cwl]==4.0'".to_string(),
                format!("cd '{}'", workspace.run_id),
                "singularity pull 'docker://crescentdev/crescent-seurat:3.1.4'".to_string(),
                "TOIL_SLURM_ARGS='-t 01:00:00' 'toil-cwl-runner' --batchSystem 'slurm' --singularity --retryCount 0 --workDir . --jobStore toil_job_store 'workflow.cwl' 'run.json'".to_string(),
            ]
        );
    }

    #[test]
    fn scheduler_args_stay_quoted() {
        let (mut config, env, workflow, workspace) = fixture();
        config.scheduler_args = "-t 02:00:00 --account='def-lab'; rm -rf ~".to_string();
        let command = build_launch_command(&config, &env, &workflow, &workspace);
        assert!(command.contains(
            "TOIL_SLURM_ARGS='-t 02:00:00 --account='\\''def-lab'\\''; rm -rf ~' "
        ));
    }

    #[test]
    fn no_modules_skips_module_load() {
        let (config, mut env, workflow, workspace) = fixture();
        env.modules.clear();
        let command = build_launch_command(&config, &env, &workflow, &workspace);
        assert!(!command.contains("module load"));
    }

    #[tokio::test]
    async fn launch_failure_is_a_remote_command_error() {
        let (config, env, workflow, workspace) = fixture();
        let session = MockSession::new().respond(
            "toil-cwl-runner",
            output(1, "", "singularity: command not found\n"),
        );
        let err = launch(&session, &config, &env, &workflow, &workspace)
            .await
            .unwrap_err();
        match err {
            HpcError::RemoteCommand(remote) => {
                assert_eq!(remote.exit_code, 1);
                assert_eq!(remote.stderr, "singularity: command not found\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.commands().len(), 1);
    }
}
