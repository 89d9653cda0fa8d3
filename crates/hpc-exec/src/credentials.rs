use std::fmt;
use std::path::{Path, PathBuf};

use hpc_types::ClusterEndpoint;
use system_utils::process::run_command_with_timeout;
use tokio::process::Command;
use tokio::time::Duration;

use crate::error::HpcError;

const KEYGEN_PROGRAM: &str = "ssh-keygen";
const KEYGEN_TIMEOUT: Duration = Duration::from_secs(10);

/// A private key that `ssh-keygen` could open without a passphrase.
///
/// Checked in [`KeyMaterial::load`], so a bad key fails before any network
/// activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    path: PathBuf,
}

impl KeyMaterial {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HpcError> {
        Self::load_with(path.as_ref(), KEYGEN_PROGRAM).await
    }

    pub(crate) async fn load_with(path: &Path, keygen: &str) -> Result<Self, HpcError> {
        let key_error = |reason: String| HpcError::KeyMaterial {
            path: path.to_path_buf(),
            reason,
        };
        let metadata =
            std::fs::metadata(path).map_err(|err| key_error(format!("failed to read: {err}")))?;
        if !metadata.is_file() {
            return Err(key_error("not a regular file".to_string()));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(key_error(format!(
                    "permissions {:o} are too open; ssh requires 0600",
                    mode & 0o777
                )));
            }
        }

        let mut cmd = Command::new(keygen);
        cmd.arg("-y").arg("-P").arg("").arg("-f").arg(path);
        let output = run_command_with_timeout(&mut cmd, KEYGEN_TIMEOUT, keygen)
            .await
            .map_err(|err| key_error(format!("{err:#}")))?;
        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr);
            return Err(key_error(keygen_failure_reason(&detail)));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn keygen_failure_reason(detail: &str) -> String {
    let lowered = detail.to_lowercase();
    if lowered.contains("passphrase") {
        return "passphrase-protected keys cannot be used non-interactively".to_string();
    }
    let detail = detail.trim();
    if detail.is_empty() {
        "not a usable private key".to_string()
    } else {
        format!("not a usable private key: {detail}")
    }
}

#[derive(Clone)]
pub enum Auth {
    Key(KeyMaterial),
    Password(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Key(key) => f.debug_tuple("Key").field(&key.path).finish(),
            Auth::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub endpoint: ClusterEndpoint,
    pub username: String,
    pub auth: Auth,
}

impl Credentials {
    pub fn new(
        endpoint: ClusterEndpoint,
        username: impl Into<String>,
        auth: Auth,
    ) -> Result<Self, HpcError> {
        let username = username.into();
        let valid = !username.is_empty()
            && !username.starts_with('-')
            && username
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
        if !valid {
            return Err(HpcError::invalid(
                "username",
                username,
                "expected letters, digits, '.', '_' or '-'",
            ));
        }
        if let Auth::Password(password) = &auth {
            if password.is_empty() {
                return Err(HpcError::invalid("password", "", "must not be empty"));
            }
        }
        Ok(Self {
            endpoint,
            username,
            auth,
        })
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.endpoint.hostname())
    }
}
