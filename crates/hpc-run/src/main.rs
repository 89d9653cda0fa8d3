mod cli;
mod config;
mod logging;

use crate::cli::Args;
use crate::config::{load_run_file, resolve};
use crate::logging::init_tracing;
use clap::Parser;
use hpc_exec::{execute_workflow, HpcError, RunStage};
use hpc_types::ExecutionResult;
use std::io::Write;
use std::process::ExitCode;
use tracing::info;

const EXIT_INPUT: u8 = 2;

#[derive(Debug)]
pub(crate) enum Failure {
    /// Bad flags or config file, before anything touches the network.
    Config(anyhow::Error),
    Run(HpcError),
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Config(err)
    }
}

impl From<HpcError> for Failure {
    fn from(err: HpcError) -> Self {
        Failure::Run(err)
    }
}

fn exit_code(stage: RunStage) -> u8 {
    match stage {
        RunStage::Input => EXIT_INPUT,
        RunStage::Credentials => 3,
        RunStage::Connect => 4,
        RunStage::Provision => 5,
        RunStage::Stage => 6,
        RunStage::Launch => 7,
        RunStage::Collect => 8,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match init_tracing(args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("hpc-run: {err:#}");
            return ExitCode::from(EXIT_INPUT);
        }
    };

    match run(&args).await {
        Ok(result) => {
            emit(&result.stdout, &result.stderr);
            ExitCode::SUCCESS
        }
        Err(Failure::Config(err)) => {
            eprintln!("hpc-run: {err:#}");
            ExitCode::from(EXIT_INPUT)
        }
        Err(Failure::Run(err)) => {
            if let Some(remote) = err.remote_output() {
                emit(&remote.stdout, &remote.stderr);
            }
            eprintln!("hpc-run: {} failed: {err}", err.stage());
            ExitCode::from(exit_code(err.stage()))
        }
    }
}

async fn run(args: &Args) -> Result<ExecutionResult, Failure> {
    let file = load_run_file(&args.config)?;
    info!(
        event = "config.loaded",
        path = %args.config.display(),
        cluster = %file.cluster,
        "loaded run config"
    );
    let resolved = resolve(args, file).await?;
    Ok(execute_workflow(&resolved.connector, &resolved.request).await?)
}

fn emit(stdout: &str, stderr: &str) {
    let _ = std::io::stdout().lock().write_all(stdout.as_bytes());
    let _ = std::io::stderr().lock().write_all(stderr.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpc_exec::TransferDirection;

    #[test]
    fn every_stage_has_a_distinct_exit_code() {
        let stages = [
            RunStage::Input,
            RunStage::Credentials,
            RunStage::Connect,
            RunStage::Provision,
            RunStage::Stage,
            RunStage::Launch,
            RunStage::Collect,
        ];
        let mut codes: Vec<u8> = stages.iter().map(|stage| exit_code(*stage)).collect();
        codes.sort_unstable();
        assert_eq!(codes, vec![2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn download_failures_map_to_collect_code() {
        let err = HpcError::Transfer {
            path: "/scratch/jdoe/crescent-hpc/run-x/SEURAT".into(),
            direction: TransferDirection::Download,
            message: "No such file or directory".to_string(),
        };
        assert_eq!(exit_code(err.stage()), 8);
    }
}
