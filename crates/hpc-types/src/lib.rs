use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub mod config;

pub const DEFAULT_TOOL_VERSION: &str = "20200617";
pub const DEFAULT_SUBDIRECTORY: &str = "crescent-hpc";
pub const DEFAULT_SCHEDULER_ARGS: &str = "-t 01:00:00";
pub const DEFAULT_SCRIPT_SUBDIR: &str = "pipeline";
pub const DEFAULT_INPUT_SUBDIR: &str = "input";
pub const DEFAULT_OUTPUT_SUBDIR: &str = "SEURAT";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClusterEndpoint {
    Beluga,
    Cedar,
    Graham,
    Niagara,
}

impl ClusterEndpoint {
    pub const ALL: [ClusterEndpoint; 4] = [
        ClusterEndpoint::Beluga,
        ClusterEndpoint::Cedar,
        ClusterEndpoint::Graham,
        ClusterEndpoint::Niagara,
    ];

    pub fn hostname(self) -> &'static str {
        match self {
            ClusterEndpoint::Beluga => "beluga.computecanada.ca",
            ClusterEndpoint::Cedar => "cedar.computecanada.ca",
            ClusterEndpoint::Graham => "graham.computecanada.ca",
            ClusterEndpoint::Niagara => "niagara.computecanada.ca",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ClusterEndpoint::Beluga => "beluga",
            ClusterEndpoint::Cedar => "cedar",
            ClusterEndpoint::Graham => "graham",
            ClusterEndpoint::Niagara => "niagara",
        }
    }
}

impl fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCluster(pub String);

impl fmt::Display for UnknownCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<&str> = ClusterEndpoint::ALL.iter().map(|c| c.name()).collect();
        write!(
            f,
            "unknown cluster '{}'; expected one of: {}",
            self.0,
            known.join(", ")
        )
    }
}

impl std::error::Error for UnknownCluster {}

impl FromStr for ClusterEndpoint {
    type Err = UnknownCluster;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        ClusterEndpoint::ALL
            .into_iter()
            .find(|cluster| cluster.name() == wanted || cluster.hostname() == wanted)
            .ok_or_else(|| UnknownCluster(value.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub tool_version: String,
    pub subdirectory: String,
    pub scheduler_args: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tool_version: DEFAULT_TOOL_VERSION.to_string(),
            subdirectory: DEFAULT_SUBDIRECTORY.to_string(),
            scheduler_args: DEFAULT_SCHEDULER_ARGS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteEnvironment {
    pub scratch_var: String,
    pub modules: Vec<String>,
    pub engine_package: String,
    pub runner: String,
    pub batch_system: String,
    pub scheduler_args_var: String,
}

impl Default for RemoteEnvironment {
    fn default() -> Self {
        Self {
            scratch_var: "SCRATCH".to_string(),
            modules: vec!["python/3.6".to_string(), "singularity/3".to_string()],
            engine_package: "toil[cwl]==4.0".to_string(),
            runner: "toil-cwl-runner".to_string(),
            batch_system: "slurm".to_string(),
            scheduler_args_var: "TOIL_SLURM_ARGS".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSpec {
    pub template_path: PathBuf,
    pub container_image: String,
    pub script_path: PathBuf,
    pub script_subdir: String,
    pub input_subdir: String,
    pub output_subdir: String,
}

impl WorkflowSpec {
    pub fn new(
        template_path: impl Into<PathBuf>,
        container_image: impl Into<String>,
        script_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            container_image: container_image.into(),
            script_path: script_path.into(),
            script_subdir: DEFAULT_SCRIPT_SUBDIR.to_string(),
            input_subdir: DEFAULT_INPUT_SUBDIR.to_string(),
            output_subdir: DEFAULT_OUTPUT_SUBDIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    pub fn infer(raw: &str) -> Self {
        match raw {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(value) = raw.parse::<i64>() {
            return ParamValue::Integer(value);
        }
        let numeric = !raw.is_empty()
            && raw
                .chars()
                .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E'));
        if numeric {
            if let Ok(value) = raw.parse::<f64>() {
                if value.is_finite() {
                    return ParamValue::Float(value);
                }
            }
        }
        ParamValue::String(raw.to_string())
    }
}

pub type RunParams = BTreeMap<String, ParamValue>;

pub fn params_to_json(params: &RunParams) -> serde_json::Result<String> {
    serde_json::to_string_pretty(params)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cluster_names_and_hostnames() {
        assert_eq!(
            "Niagara".parse::<ClusterEndpoint>(),
            Ok(ClusterEndpoint::Niagara)
        );
        assert_eq!(
            "graham.computecanada.ca".parse::<ClusterEndpoint>(),
            Ok(ClusterEndpoint::Graham)
        );
        let err = "nigara".parse::<ClusterEndpoint>().unwrap_err();
        assert!(err.to_string().contains("beluga, cedar, graham, niagara"));
    }

    #[test]
    fn cluster_serializes_lowercase() {
        let value = serde_json::to_string(&ClusterEndpoint::Cedar).expect("json");
        assert_eq!(value, "\"cedar\"");
    }

    #[test]
    fn defaults_are_fresh_values() {
        let mut first = RunConfig::default();
        first.scheduler_args.push_str(" -p debug");
        assert_eq!(RunConfig::default().scheduler_args, DEFAULT_SCHEDULER_ARGS);
    }

    #[test]
    fn infers_scalar_params() {
        assert_eq!(ParamValue::infer("10"), ParamValue::Integer(10));
        assert_eq!(ParamValue::infer("0.5"), ParamValue::Float(0.5));
        assert_eq!(ParamValue::infer("true"), ParamValue::Bool(true));
        assert_eq!(
            ParamValue::infer("0,0.2"),
            ParamValue::String("0,0.2".to_string())
        );
        assert_eq!(ParamValue::infer("inf"), ParamValue::String("inf".to_string()));
        assert_eq!(ParamValue::infer("n"), ParamValue::String("n".to_string()));
    }

    #[test]
    fn params_serialize_as_flat_json_object() {
        let mut params = RunParams::new();
        params.insert("resolution".to_string(), ParamValue::Integer(1));
        params.insert(
            "sc_input_type".to_string(),
            ParamValue::String("MTX".to_string()),
        );
        let json = params_to_json(&params).expect("json");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed["resolution"], 1);
        assert_eq!(parsed["sc_input_type"], "MTX");
    }
}
