mod ssh;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::credentials::Credentials;
use crate::error::HpcError;

pub use ssh::{SshConnector, SshSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `-1` when the command was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    /// Runs `command` through the remote shell. Both streams are read to
    /// the end before the exit status is returned.
    async fn run_command(&self, command: &str) -> Result<CommandOutput, HpcError>;

    /// Writes `contents` to `remote_path` without a local temp file.
    async fn upload_bytes(&self, contents: Bytes, remote_path: &str) -> Result<(), HpcError>;

    /// Copies a local file into `remote_dir`, keeping its file name.
    async fn upload_file(&self, local: &Path, remote_dir: &str) -> Result<(), HpcError>;

    /// Recursively copies `remote_dir` into `local`.
    async fn download_dir(&self, remote_dir: &str, local: &Path) -> Result<(), HpcError>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), HpcError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    async fn open(&self, credentials: &Credentials) -> Result<Self::Session, HpcError>;
}
