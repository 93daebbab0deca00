//! Supervised invocation of external command-line tools.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::error::AnalysisError;

/// Captured result of a finished tool run
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` to completion with a hard timeout.
///
/// A missing binary maps to `ToolNotFound`; an expired timeout kills the
/// child (via `kill_on_drop`) and maps to `Timeout`. A non-zero exit is NOT an
/// error here, callers decide what the status means.
pub async fn run_tool<I, S>(
    tool: &'static str,
    program: &str,
    args: I,
    timeout: Duration,
) -> Result<ToolOutput, AnalysisError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => AnalysisError::ToolNotFound {
                tool,
                path: program.to_string(),
            },
            _ => AnalysisError::Io(e),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(tool, timeout_secs = timeout.as_secs(), "Tool timed out, killing");
            return Err(AnalysisError::Timeout {
                tool,
                secs: timeout.as_secs(),
            });
        }
    };

    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Writes an executable shell script standing in for an external tool.
#[cfg(all(test, unix))]
pub(crate) fn write_fake_tool(dir: &std::path::Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}
