use serde::Deserialize;

use crate::{ClusterEndpoint, RemoteEnvironment, RunConfig, RunParams};

#[derive(Debug, Deserialize)]
pub struct RunFile {
    pub cluster: ClusterEndpoint,
    pub username: Option<String>,
    pub identity_file: Option<String>,
    pub known_hosts: Option<String>,
    /// humantime duration, e.g. "15s".
    pub connect_timeout: Option<String>,
    pub ssh_args: Option<Vec<String>>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub environment: RemoteEnvironment,
    pub workflow: WorkflowFile,
    #[serde(default)]
    pub params: RunParams,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    pub template: String,
    pub container_image: String,
    pub script: String,
    pub script_subdir: Option<String>,
    pub input_subdir: Option<String>,
    pub output_subdir: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
}
