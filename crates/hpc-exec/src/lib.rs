pub mod collect;
pub mod credentials;
pub mod error;
pub mod exec;
pub mod launch;
pub mod pipeline;
pub mod run_id;
mod shell;
pub mod stage;
pub mod template;
pub mod transport;
pub mod workspace;

#[cfg(test)]
mod test_utils;

pub use credentials::{Auth, Credentials, KeyMaterial};
pub use error::{HpcError, RemoteCommandError, RunStage, TemplateError, TransferDirection};
pub use pipeline::{execute_workflow, RunRequest};
pub use run_id::RunIdentity;
pub use transport::{CommandOutput, Connector, RemoteSession, SshConnector, SshSession};
pub use workspace::RemoteWorkspace;
