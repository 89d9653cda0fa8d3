use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote command exited with status {exit_code}{}", stream_suffix(.stderr))]
pub struct RemoteCommandError {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

fn stream_suffix(stream: &str) -> String {
    let trimmed = stream.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => f.write_str("upload"),
            TransferDirection::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read workflow template {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("workflow template has no {{{placeholder}}} placeholder")]
    MissingPlaceholder { placeholder: &'static str },
    #[error("unknown placeholder {{{name}}} at byte {offset}")]
    UnknownPlaceholder { name: String, offset: usize },
    #[error("malformed template at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum HpcError {
    #[error("invalid {field} '{value}': {reason}")]
    InvalidInput {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("unusable key material {}: {reason}", path.display())]
    KeyMaterial { path: PathBuf, reason: String },
    #[error("failed to connect to {host}: {message}")]
    Connection { host: String, message: String },
    #[error(transparent)]
    RemoteCommand(#[from] RemoteCommandError),
    #[error("failed to provision remote workspace: {reason}")]
    Provision {
        reason: String,
        #[source]
        source: Option<RemoteCommandError>,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{direction} of {} failed: {message}", path.display())]
    Transfer {
        path: PathBuf,
        direction: TransferDirection,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Input,
    Credentials,
    Connect,
    Provision,
    Stage,
    Launch,
    Collect,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Input => "input",
            RunStage::Credentials => "credentials",
            RunStage::Connect => "connect",
            RunStage::Provision => "provision",
            RunStage::Stage => "stage",
            RunStage::Launch => "launch",
            RunStage::Collect => "collect",
        };
        f.write_str(name)
    }
}

impl HpcError {
    pub fn stage(&self) -> RunStage {
        match self {
            HpcError::InvalidInput { .. } => RunStage::Input,
            HpcError::KeyMaterial { .. } => RunStage::Credentials,
            HpcError::Connection { .. } => RunStage::Connect,
            HpcError::Provision { .. } => RunStage::Provision,
            HpcError::Template(_) => RunStage::Stage,
            HpcError::Transfer {
                direction: TransferDirection::Upload,
                ..
            } => RunStage::Stage,
            HpcError::Transfer {
                direction: TransferDirection::Download,
                ..
            } => RunStage::Collect,
            // Provisioning wraps its own command failures, so a bare one
            // can only come from the launch command.
            HpcError::RemoteCommand(_) => RunStage::Launch,
        }
    }

    pub fn remote_output(&self) -> Option<&RemoteCommandError> {
        match self {
            HpcError::RemoteCommand(err) => Some(err),
            HpcError::Provision { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn invalid(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        HpcError::InvalidInput {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transfer(
        path: impl Into<PathBuf>,
        direction: TransferDirection,
        message: impl Into<String>,
    ) -> Self {
        HpcError::Transfer {
            path: path.into(),
            direction,
            message: message.into(),
        }
    }
}
