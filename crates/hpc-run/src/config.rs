use anyhow::Context;
use hpc_exec::{Auth, Credentials, KeyMaterial, RunRequest, SshConnector};
use hpc_types::config::RunFile;
use hpc_types::{ParamValue, WorkflowSpec};
use std::path::{Path, PathBuf};
use system_utils::path::expand_tilde;

use crate::cli::Args;
use crate::Failure;

const DEFAULT_KNOWN_HOSTS: &str = "~/.ssh/known_hosts";

pub(crate) fn load_run_file(path: &Path) -> anyhow::Result<RunFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let file: RunFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(file)
}

#[derive(Debug)]
pub(crate) struct Resolved {
    pub(crate) request: RunRequest,
    pub(crate) connector: SshConnector,
}

pub(crate) async fn resolve(args: &Args, file: RunFile) -> Result<Resolved, Failure> {
    let username = args
        .username
        .clone()
        .or(file.username)
        .context("no username; set `username` in the config or pass --username")?;
    let auth = if let Some(path) = &args.identity_file {
        Auth::Key(KeyMaterial::load(expand_tilde(path)).await?)
    } else if let Some(password) = &args.password {
        Auth::Password(password.clone())
    } else if let Some(path) = &file.identity_file {
        Auth::Key(KeyMaterial::load(expand_tilde(path)).await?)
    } else {
        return Err(anyhow::anyhow!(
            "no credentials; set `identity_file` in the config, or pass --identity-file or --password"
        )
        .into());
    };
    let credentials = Credentials::new(args.cluster.unwrap_or(file.cluster), username, auth)?;

    let wf = file.workflow;
    let mut workflow = WorkflowSpec::new(
        expand_tilde(&wf.template),
        wf.container_image,
        expand_tilde(&wf.script),
    );
    if let Some(value) = wf.script_subdir {
        workflow.script_subdir = value;
    }
    if let Some(value) = wf.input_subdir {
        workflow.input_subdir = value;
    }
    if let Some(value) = wf.output_subdir {
        workflow.output_subdir = value;
    }
    let inputs: Vec<PathBuf> = wf
        .inputs
        .iter()
        .chain(args.inputs.iter())
        .map(|path| expand_tilde(path))
        .collect();

    let mut params = file.params;
    for (key, value) in &args.params {
        params.insert(key.clone(), ParamValue::infer(value));
    }

    let known_hosts = args
        .known_hosts
        .as_deref()
        .or(file.known_hosts.as_deref())
        .unwrap_or(DEFAULT_KNOWN_HOSTS);
    let mut connector = SshConnector::new(expand_tilde(known_hosts));
    if let Some(raw) = &file.connect_timeout {
        let timeout = humantime::parse_duration(raw)
            .with_context(|| format!("invalid connect_timeout '{raw}'"))?;
        connector = connector.with_connect_timeout(timeout);
    }
    let ssh_args = match &args.ssh_args {
        Some(raw) => shell_words::split(raw)
            .with_context(|| format!("failed to parse --ssh-args '{raw}'"))?,
        None => file.ssh_args.unwrap_or_default(),
    };
    connector = connector.with_ssh_args(ssh_args);

    let request = RunRequest::new(credentials, workflow)
        .with_params(params)
        .with_inputs(inputs)
        .with_local_output(args.output.clone())
        .with_config(file.run)
        .with_environment(file.environment);
    Ok(Resolved { request, connector })
}
