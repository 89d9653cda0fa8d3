use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use system_utils::process::{run_command_drained, run_command_with_timeout};
use system_utils::ssh::apply_askpass_env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info};

use super::{CommandOutput, Connector, RemoteSession};
use crate::credentials::{Auth, Credentials};
use crate::error::{HpcError, TransferDirection};
use crate::shell::shell_escape;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const CONTROL_SOCKET_GRACE: Duration = Duration::from_secs(5);
const CONTROL_SOCKET_WAIT_INTERVAL: Duration = Duration::from_millis(50);
const CONTROL_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const MASTER_LOG_LIMIT: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct SshConnector {
    known_hosts: PathBuf,
    control_dir: PathBuf,
    connect_timeout: Duration,
    ssh_args: Vec<String>,
    ssh_program: String,
    scp_program: String,
}

impl SshConnector {
    pub fn new(known_hosts: impl Into<PathBuf>) -> Self {
        Self {
            known_hosts: known_hosts.into(),
            control_dir: std::env::temp_dir(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ssh_args: Vec::new(),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ssh_args(mut self, args: Vec<String>) -> Self {
        self.ssh_args = args;
        self
    }

    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    pub fn with_programs(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.scp_program = scp.into();
        self
    }

    fn master_command(
        &self,
        credentials: &Credentials,
        known_hosts: &Path,
        control_path: &Path,
    ) -> Result<Command, HpcError> {
        let host = credentials.endpoint.hostname();
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-M")
            .arg("-N")
            .arg("-T")
            .arg("-S")
            .arg(control_path)
            .arg("-o")
            .arg("ControlPersist=no");
        apply_host_key_options(&mut cmd, known_hosts);
        cmd.arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("ServerAliveInterval=30")
            .arg("-o")
            .arg("ServerAliveCountMax=3");
        match &credentials.auth {
            Auth::Key(key) => {
                cmd.arg("-i")
                    .arg(key.path())
                    .arg("-o")
                    .arg("IdentitiesOnly=yes")
                    .arg("-o")
                    .arg("PreferredAuthentications=publickey")
                    .arg("-o")
                    .arg("BatchMode=yes");
            }
            Auth::Password(password) => {
                configure_askpass(&mut cmd, password)
                    .map_err(|err| connection_error(host, format!("{err:#}")))?;
                cmd.arg("-o")
                    .arg("PreferredAuthentications=password,keyboard-interactive")
                    .arg("-o")
                    .arg("PubkeyAuthentication=no")
                    .arg("-o")
                    .arg("NumberOfPasswordPrompts=1");
            }
        }
        cmd.args(&self.ssh_args);
        cmd.arg(credentials.destination());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn open(&self, credentials: &Credentials) -> Result<SshSession, HpcError> {
        let host = credentials.endpoint.hostname();
        let known_hosts = std::fs::canonicalize(&self.known_hosts)
            .ok()
            .filter(|path| path.is_file())
            .ok_or_else(|| {
                connection_error(
                    host,
                    format!(
                        "known hosts file {} not found; refusing to connect without a trust store",
                        self.known_hosts.display()
                    ),
                )
            })?;
        std::fs::create_dir_all(&self.control_dir).map_err(|err| {
            connection_error(
                host,
                format!("failed to create {}: {err}", self.control_dir.display()),
            )
        })?;
        let control_path = control_path_for(&self.control_dir);
        let mut cmd = self.master_command(credentials, &known_hosts, &control_path)?;

        info!(
            event = "ssh.master.start",
            host,
            user = %credentials.username,
            known_hosts = %known_hosts.display(),
            "opening ssh control master"
        );
        let mut child = cmd.spawn().map_err(|err| {
            connection_error(host, format!("failed to spawn {}: {err}", self.ssh_program))
        })?;
        let mut master_log = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_master_log(stderr)));

        let deadline = self.connect_timeout + CONTROL_SOCKET_GRACE;
        if let Err(reason) = wait_for_control_socket(&mut child, &control_path, deadline).await {
            let _ = child.kill().await;
            let detail = match master_log.take() {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            let _ = std::fs::remove_file(&control_path);
            let has_password = matches!(credentials.auth, Auth::Password(_));
            return Err(connection_error(
                host,
                format_master_failure(&reason, &detail, has_password),
            ));
        }
        info!(event = "ssh.master.ready", host, "ssh control master ready");

        Ok(SshSession {
            host: host.to_string(),
            destination: credentials.destination(),
            control_path,
            known_hosts,
            ssh_program: self.ssh_program.clone(),
            scp_program: self.scp_program.clone(),
            master: Some(child),
            master_log,
        })
    }
}

pub struct SshSession {
    host: String,
    destination: String,
    control_path: PathBuf,
    known_hosts: PathBuf,
    ssh_program: String,
    scp_program: String,
    master: Option<Child>,
    master_log: Option<JoinHandle<String>>,
}

impl SshSession {
    fn client_ssh(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-T")
            .arg("-S")
            .arg(&self.control_path)
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg("BatchMode=yes");
        apply_host_key_options(&mut cmd, &self.known_hosts);
        cmd.arg(&self.destination);
        cmd
    }

    fn client_scp(&self) -> Command {
        let mut cmd = Command::new(&self.scp_program);
        cmd.arg("-q")
            .arg("-o")
            .arg(format!("ControlPath=\"{}\"", self.control_path.display()))
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg("BatchMode=yes");
        apply_host_key_options(&mut cmd, &self.known_hosts);
        cmd
    }

    // Without the socket, ssh would quietly dial a second connection.
    fn ensure_master(&self) -> Result<(), HpcError> {
        if self.master.is_some() && self.control_path.exists() {
            return Ok(());
        }
        Err(connection_error(
            &self.host,
            format!(
                "control connection lost ({} is gone); refusing to reconnect mid-run",
                self.control_path.display()
            ),
        ))
    }

    fn remote_target(&self, path: &str) -> String {
        format!("{}:{}", self.destination, path)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, HpcError> {
        self.ensure_master()?;
        let mut cmd = self.client_ssh();
        cmd.arg(command);
        let output = run_command_drained(&mut cmd, None, "ssh command")
            .await
            .map_err(|err| connection_error(&self.host, format!("{err:#}")))?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload_bytes(&self, contents: Bytes, remote_path: &str) -> Result<(), HpcError> {
        self.ensure_master()?;
        let mut cmd = self.client_ssh();
        cmd.arg(format!("cat > {}", shell_escape(remote_path)));
        let size = contents.len();
        let output = run_command_drained(&mut cmd, Some(contents), "ssh upload")
            .await
            .map_err(|err| {
                HpcError::transfer(remote_path, TransferDirection::Upload, format!("{err:#}"))
            })?;
        if !output.status.success() {
            return Err(HpcError::transfer(
                remote_path,
                TransferDirection::Upload,
                failure_detail("ssh upload", &output),
            ));
        }
        debug!(event = "ssh.upload.bytes", remote_path, size, "uploaded payload");
        Ok(())
    }

    async fn upload_file(&self, local: &Path, remote_dir: &str) -> Result<(), HpcError> {
        self.ensure_master()?;
        let mut cmd = self.client_scp();
        let target = format!("{}/", remote_dir.trim_end_matches('/'));
        cmd.arg("--").arg(local).arg(self.remote_target(&target));
        let output = run_command_drained(&mut cmd, None, "scp upload")
            .await
            .map_err(|err| HpcError::transfer(local, TransferDirection::Upload, format!("{err:#}")))?;
        if !output.status.success() {
            return Err(HpcError::transfer(
                local,
                TransferDirection::Upload,
                failure_detail("scp", &output),
            ));
        }
        debug!(event = "ssh.upload.file", local = %local.display(), remote_dir, "uploaded file");
        Ok(())
    }

    async fn download_dir(&self, remote_dir: &str, local: &Path) -> Result<(), HpcError> {
        self.ensure_master()?;
        let mut cmd = self.client_scp();
        cmd.arg("-r")
            .arg("--")
            .arg(self.remote_target(remote_dir))
            .arg(local);
        let output = run_command_drained(&mut cmd, None, "scp download")
            .await
            .map_err(|err| {
                HpcError::transfer(remote_dir, TransferDirection::Download, format!("{err:#}"))
            })?;
        if !output.status.success() {
            return Err(HpcError::transfer(
                remote_dir,
                TransferDirection::Download,
                failure_detail("scp", &output),
            ));
        }
        debug!(event = "ssh.download.dir", remote_dir, local = %local.display(), "downloaded directory");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), HpcError> {
        let Some(mut master) = self.master.take() else {
            return Ok(());
        };
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-S")
            .arg(&self.control_path)
            .arg("-O")
            .arg("exit")
            .arg(&self.destination);
        let exit_result = run_command_with_timeout(&mut cmd, CONTROL_COMMAND_TIMEOUT, "ssh -O exit").await;
        match master.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                let _ = master.kill().await;
            }
        }
        if let Some(handle) = self.master_log.take() {
            handle.abort();
        }
        let _ = std::fs::remove_file(&self.control_path);
        info!(event = "ssh.master.closed", host = %self.host, "ssh control master closed");
        match exit_result {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(connection_error(
                &self.host,
                failure_detail("ssh -O exit", &output),
            )),
            Err(err) => Err(connection_error(&self.host, format!("{err:#}"))),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(master) = self.master.as_mut() {
            let _ = master.start_kill();
            let _ = std::fs::remove_file(&self.control_path);
        }
        if let Some(handle) = self.master_log.take() {
            handle.abort();
        }
    }
}

fn apply_host_key_options(cmd: &mut Command, known_hosts: &Path) {
    cmd.arg("-o").arg("StrictHostKeyChecking=yes");
    cmd.arg("-o")
        .arg(format!("UserKnownHostsFile=\"{}\"", known_hosts.display()));
    cmd.arg("-o").arg("GlobalKnownHostsFile=/dev/null");
}

fn configure_askpass(cmd: &mut Command, password: &str) -> anyhow::Result<()> {
    info!(
        event = "ssh.auth.askpass",
        "using SSH_ASKPASS for password auth"
    );
    apply_askpass_env(cmd, password)
}

async fn wait_for_control_socket(
    child: &mut Child,
    control_path: &Path,
    deadline: Duration,
) -> Result<(), String> {
    let start = Instant::now();
    loop {
        if control_path.exists() {
            return Ok(());
        }
        match child.try_wait() {
            Ok(Some(status)) => return Err(format!("ssh exited with {status}")),
            Ok(None) => {}
            Err(err) => return Err(format!("failed to poll ssh: {err}")),
        }
        if start.elapsed() >= deadline {
            return Err(format!(
                "control socket not ready after {}ms",
                deadline.as_millis()
            ));
        }
        tokio::time::sleep(CONTROL_SOCKET_WAIT_INTERVAL).await;
    }
}

async fn collect_master_log(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(event = "ssh.master.stderr", line = %line);
        if collected.len() < MASTER_LOG_LIMIT {
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    collected
}

fn control_path_for(control_dir: &Path) -> PathBuf {
    let id = uuid::Uuid::new_v4().simple().to_string();
    control_dir.join(format!("hpc-run-{}.sock", &id[..12]))
}

fn connection_error(host: &str, message: impl Into<String>) -> HpcError {
    HpcError::Connection {
        host: host.to_string(),
        message: message.into(),
    }
}

fn failure_detail(label: &str, output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = format!("{}{}", stdout, stderr).trim().to_string();
    if detail.is_empty() {
        format!("{label} exited with {}", output.status)
    } else {
        detail
    }
}

fn format_master_failure(reason: &str, detail: &str, has_password: bool) -> String {
    let detail = detail.trim();
    let mut message = if detail.is_empty() {
        reason.to_string()
    } else {
        format!("{reason}: {detail}")
    };
    if let Some(hint) = ssh_failure_hint(detail, has_password) {
        message.push('\n');
        message.push_str(hint);
    }
    message
}

fn ssh_failure_hint(detail: &str, has_password: bool) -> Option<&'static str> {
    let detail = detail.to_lowercase();
    if detail.contains("host key verification failed")
        || detail.contains("remote host identification has changed")
        || detail.contains("no matching host key")
    {
        return Some(
            "the cluster's host key is missing from or does not match the known hosts file; add the published key for this cluster to it.",
        );
    }
    if detail.contains("keyboard-interactive")
        || detail.contains("verification code")
        || detail.contains("two-factor")
    {
        return Some(
            "ssh requires keyboard-interactive/2FA; SSH_ASKPASS cannot handle it. Use SSH key auth instead.",
        );
    }
    if detail.contains("permission denied")
        || detail.contains("authentication failed")
        || detail.contains("no supported authentication methods available")
        || detail.contains("too many authentication failures")
    {
        if has_password {
            return Some("ssh password auth failed. Check the password or use an identity file.");
        }
        return Some(
            "ssh key authentication failed. Check the identity file and that its public key is installed on the cluster.",
        );
    }
    None
}
