use clap::Parser;
use hpc_types::ClusterEndpoint;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hpc-run",
    version,
    about = "Run a containerized workflow on a Compute Canada cluster"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "run.toml")]
    pub(crate) config: PathBuf,
    /// Overrides `cluster` from the config file.
    #[arg(long)]
    pub(crate) cluster: Option<ClusterEndpoint>,
    #[arg(long)]
    pub(crate) username: Option<String>,
    #[arg(long)]
    pub(crate) identity_file: Option<String>,
    #[arg(long, env = "HPC_RUN_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    #[arg(long)]
    pub(crate) known_hosts: Option<String>,
    /// Extra ssh arguments, split like a shell would, e.g. "-p 2222".
    #[arg(long)]
    pub(crate) ssh_args: Option<String>,
    #[arg(long, default_value = ".")]
    pub(crate) output: PathBuf,
    #[arg(long = "input")]
    pub(crate) inputs: Vec<String>,
    #[arg(long = "param", value_parser = parse_param)]
    pub(crate) params: Vec<(String, String)>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
