use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::info;

use crate::InstallError;

/// What the detached helper does once this process has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    pub extracted_root: PathBuf,
    pub install_dir: PathBuf,
    /// Removed by the helper after the copy.
    pub session_dir: PathBuf,
    pub relaunch: Relaunch,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relaunch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Relaunch {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[cfg(not(windows))]
pub fn restart_script(plan: &RestartPlan) -> String {
    let mut relaunch = vec![sh_quote(&plan.relaunch.program.to_string_lossy())];
    relaunch.extend(
        plan.relaunch
            .args
            .iter()
            .map(|arg| sh_quote(&arg.to_string_lossy())),
    );

    format!(
        "#!/bin/sh\nsleep {delay}\ncp -R {source}/. {target}/ || exit 1\nrm -rf {session}\n{relaunch} >/dev/null 2>&1 &\nrm -f \"$0\"\n",
        delay = plan.delay.as_secs().max(1),
        source = sh_quote(&plan.extracted_root.to_string_lossy()),
        target = sh_quote(&plan.install_dir.to_string_lossy()),
        session = sh_quote(&plan.session_dir.to_string_lossy()),
        relaunch = relaunch.join(" "),
    )
}

/// `timeout` refuses redirected stdin and the helper runs with a null stdin,
/// so the wait is done with one ping per second.
#[cfg(windows)]
pub fn restart_script(plan: &RestartPlan) -> String {
    let mut relaunch = vec![format!("\"{}\"", plan.relaunch.program.display())];
    relaunch.extend(
        plan.relaunch
            .args
            .iter()
            .map(|arg| format!("\"{}\"", arg.to_string_lossy())),
    );

    format!(
        "@echo off\r\nping -n {pings} 127.0.0.1 > nul\r\nxcopy \"{source}\\*\" \"{target}\\\" /E /I /Y /Q > nul\r\nif errorlevel 1 exit /b 1\r\nrmdir /S /Q \"{session}\"\r\nstart \"\" {relaunch}\r\ndel \"%~f0\"\r\n",
        pings = plan.delay.as_secs().max(1) + 1,
        source = plan.extracted_root.display(),
        target = plan.install_dir.display(),
        session = plan.session_dir.display(),
        relaunch = relaunch.join(" "),
    )
}

#[cfg(not(windows))]
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn script_path_for(session_dir: &Path) -> PathBuf {
    let extension = if cfg!(windows) { "restart.bat" } else { "restart.sh" };
    session_dir.with_extension(extension)
}

/// Writes the helper script next to the session directory and starts it
/// detached from this process.
pub fn spawn_restart_helper(plan: &RestartPlan) -> Result<PathBuf, InstallError> {
    let handoff_err = |message: String| InstallError::Handoff { message };
    let script_path = script_path_for(&plan.session_dir);
    fs::write(&script_path, restart_script(plan)).map_err(|err| {
        handoff_err(format!("failed to write {}: {err}", script_path.display()))
    })?;

    let mut command = if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(&script_path);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg(&script_path);
        command
    };
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| handoff_err(format!("failed to start restart helper: {err}")))?;

    info!(script = %script_path.display(), "restart helper scheduled");
    Ok(script_path)
}
