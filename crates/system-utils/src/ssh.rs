use anyhow::Context;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::path::home_dir;

pub const PASSWORD_VAR: &str = "HPC_RUN_SSH_PASS";
const HELPER_DIR: &str = ".hpc-run";
const HELPER_NAME: &str = "ssh-askpass.sh";
const HELPER_SCRIPT: &str = "#!/bin/sh\nprintf '%s' \"$HPC_RUN_SSH_PASS\"\n";

pub fn install_askpass_script(dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(HELPER_NAME);
    let current = std::fs::read(&path).ok();
    if current.as_deref() != Some(HELPER_SCRIPT.as_bytes()) {
        std::fs::write(&path, HELPER_SCRIPT)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to chmod {}", path.display()))?;
    }
    Ok(path)
}

pub fn askpass_vars(script: &Path, password: &str) -> Vec<(&'static str, OsString)> {
    vec![
        (PASSWORD_VAR, OsString::from(password)),
        ("SSH_ASKPASS", script.as_os_str().to_os_string()),
        ("SSH_ASKPASS_REQUIRE", OsString::from("force")),
        // Older clients only consult SSH_ASKPASS when DISPLAY is set.
        ("DISPLAY", OsString::from("1")),
    ]
}

pub fn apply_askpass_env(cmd: &mut Command, password: &str) -> anyhow::Result<()> {
    let home = home_dir().context("failed to resolve HOME for askpass")?;
    let script = install_askpass_script(&home.join(HELPER_DIR))?;
    for (key, value) in askpass_vars(&script, password) {
        cmd.env(key, value);
    }
    Ok(())
}
