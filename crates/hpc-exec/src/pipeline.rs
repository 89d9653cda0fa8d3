use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use hpc_types::{
    params_to_json, ExecutionResult, RemoteEnvironment, RunConfig, RunParams, WorkflowSpec,
};
use tracing::{error, info, warn};

use crate::collect::collect_results;
use crate::credentials::Credentials;
use crate::error::{HpcError, TransferDirection};
use crate::launch::launch;
use crate::run_id::RunIdentity;
use crate::shell::{validate_component, validate_env_name, validate_relative_path, validate_token};
use crate::stage::{stage_artifacts, StagedArtifacts};
use crate::template::render_file;
use crate::transport::{Connector, RemoteSession};
use crate::workspace::provision;

const IMAGE_CHARS: &[char] = &['/', ':', '@'];
const MODULE_CHARS: &[char] = &['/'];
const REQUIREMENT_CHARS: &[char] = &['[', ']', '=', '<', '>', ',', '!', '~'];

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub credentials: Credentials,
    pub workflow: WorkflowSpec,
    pub params: RunParams,
    pub input_files: Vec<PathBuf>,
    pub local_output: PathBuf,
    pub config: RunConfig,
    pub environment: RemoteEnvironment,
}

impl RunRequest {
    pub fn new(credentials: Credentials, workflow: WorkflowSpec) -> Self {
        Self {
            credentials,
            workflow,
            params: RunParams::new(),
            input_files: Vec::new(),
            local_output: PathBuf::from("."),
            config: RunConfig::default(),
            environment: RemoteEnvironment::default(),
        }
    }

    pub fn with_params(mut self, params: RunParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.input_files = inputs;
        self
    }

    pub fn with_local_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_output = dir.into();
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_environment(mut self, environment: RemoteEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Runs before any connection is opened.
    pub fn validate(&self) -> Result<(), HpcError> {
        let config = &self.config;
        let workflow = &self.workflow;
        let env = &self.environment;
        validate_relative_path("subdirectory", &config.subdirectory)?;
        validate_component("tool version", &config.tool_version)?;
        validate_component("script subdirectory", &workflow.script_subdir)?;
        validate_component("input subdirectory", &workflow.input_subdir)?;
        validate_component("output subdirectory", &workflow.output_subdir)?;
        if workflow.input_subdir == workflow.script_subdir {
            return Err(HpcError::invalid(
                "input subdirectory",
                workflow.input_subdir.clone(),
                "must differ from the script subdirectory",
            ));
        }
        validate_token("container image", &workflow.container_image, IMAGE_CHARS)?;
        validate_env_name("scratch variable", &env.scratch_var)?;
        validate_env_name("scheduler args variable", &env.scheduler_args_var)?;
        for module in &env.modules {
            validate_token("module", module, MODULE_CHARS)?;
        }
        validate_token("engine package", &env.engine_package, REQUIREMENT_CHARS)?;
        validate_component("runner", &env.runner)?;
        validate_component("batch system", &env.batch_system)?;
        self.validate_local_files()
    }

    fn validate_local_files(&self) -> Result<(), HpcError> {
        let files = std::iter::once(self.workflow.script_path.as_path())
            .chain(self.input_files.iter().map(PathBuf::as_path));
        for path in files {
            if !path.is_file() {
                return Err(HpcError::transfer(
                    path,
                    TransferDirection::Upload,
                    "local file not found",
                ));
            }
        }
        let mut names = HashSet::new();
        for input in &self.input_files {
            let name = input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !names.insert(name.clone()) {
                return Err(HpcError::invalid(
                    "input file",
                    input.to_string_lossy(),
                    format!("another input is also named {name}"),
                ));
            }
        }
        Ok(())
    }
}

/// The first failure aborts the run and nothing is retried. The session is
/// closed on every path once it has been opened.
pub async fn execute_workflow<C>(
    connector: &C,
    request: &RunRequest,
) -> Result<ExecutionResult, HpcError>
where
    C: Connector,
{
    let started = Instant::now();
    request.validate()?;
    let params_json = params_to_json(&request.params)
        .map_err(|err| HpcError::invalid("params", "", err.to_string()))?;
    let run_id = RunIdentity::generate();
    info!(
        event = "run.start",
        run_id = %run_id,
        cluster = %request.credentials.endpoint,
        user = %request.credentials.username,
        "starting remote run"
    );

    let mut session = run_stage(&run_id, "connect", || {
        connector.open(&request.credentials)
    })
    .await?;
    let result = run_on_session(&session, request, &run_id, params_json).await;
    if let Err(err) = session.close().await {
        warn!(
            event = "run.session.close_failed",
            run_id = %run_id,
            error = %err,
            "failed to close session"
        );
    }

    match &result {
        Ok(_) => info!(
            event = "run.done",
            run_id = %run_id,
            elapsed_ms = started.elapsed().as_millis(),
            "remote run finished"
        ),
        Err(err) => error!(
            event = "run.failed",
            run_id = %run_id,
            stage = %err.stage(),
            elapsed_ms = started.elapsed().as_millis(),
            error = %err,
            "remote run failed"
        ),
    }
    result
}

async fn run_on_session<S>(
    session: &S,
    request: &RunRequest,
    run_id: &RunIdentity,
    params_json: String,
) -> Result<ExecutionResult, HpcError>
where
    S: RemoteSession + ?Sized,
{
    let workspace = run_stage(run_id, "provision", || {
        provision(
            session,
            &request.config,
            &request.workflow,
            &request.environment,
            run_id,
        )
    })
    .await?;

    let descriptor = run_stage(run_id, "render", || async {
        render_file(&request.workflow.template_path, &workspace.root).map_err(HpcError::from)
    })
    .await?;

    let artifacts = StagedArtifacts {
        descriptor,
        params_json,
        script: &request.workflow.script_path,
        inputs: &request.input_files,
    };
    run_stage(run_id, "stage", || {
        stage_artifacts(session, &workspace, &artifacts)
    })
    .await?;

    let launched = run_stage(run_id, "launch", || {
        launch(
            session,
            &request.config,
            &request.environment,
            &request.workflow,
            &workspace,
        )
    })
    .await?;

    run_stage(run_id, "collect", || {
        collect_results(
            session,
            &workspace,
            &request.workflow,
            &request.local_output,
            launched,
        )
    })
    .await
}

async fn run_stage<T, F, Fut>(run_id: &RunIdentity, step: &'static str, f: F) -> Result<T, HpcError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, HpcError>>,
{
    info!(
        event = "run.step.start",
        run_id = %run_id,
        step,
        "run step start"
    );
    let start = Instant::now();
    match f().await {
        Ok(value) => {
            info!(
                event = "run.step.done",
                run_id = %run_id,
                step,
                elapsed_ms = start.elapsed().as_millis(),
                "run step done"
            );
            Ok(value)
        }
        Err(err) => {
            warn!(
                event = "run.step.failed",
                run_id = %run_id,
                step,
                elapsed_ms = start.elapsed().as_millis(),
                error = %err,
                "run step failed"
            );
            Err(err)
        }
    }
}
