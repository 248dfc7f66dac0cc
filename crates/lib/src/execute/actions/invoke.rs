//! Subprocess invocation.
//!
//! Every external command an entry runs goes through an [`Invoker`], which
//! receives the full environment explicitly. The production
//! [`ProcessInvoker`] clears the inherited environment before applying it.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use crate::execute::types::ExecuteError;

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

impl Invocation {
  /// The command line as a single display string.
  pub fn display(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutput {
  /// Exit code; `None` when terminated by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl InvocationOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// Runs external commands on behalf of the engine.
pub trait Invoker: Send + Sync + 'static {
  fn invoke(&self, invocation: Invocation) -> impl Future<Output = Result<InvocationOutput, ExecuteError>> + Send;
}

/// Runs commands as child processes with an isolated environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInvoker;

impl Invoker for ProcessInvoker {
  async fn invoke(&self, invocation: Invocation) -> Result<InvocationOutput, ExecuteError> {
    debug!(cmd = %invocation.display(), cwd = ?invocation.cwd, "spawning process");

    let output = Command::new(&invocation.program)
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .env_clear()
      .envs(&invocation.env)
      .kill_on_drop(false)
      .output()
      .await
      .map_err(|source| ExecuteError::Spawn {
        program: invocation.program.clone(),
        source,
      })?;

    let result = InvocationOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.stderr.is_empty() {
      debug!(stderr = %result.stderr.trim_end(), "command stderr");
    }
    if !result.stdout.is_empty() {
      debug!(stdout = %result.stdout.trim_end(), "command stdout");
    }

    Ok(result)
  }
}

/// Run an invocation and turn a non-zero exit into `CmdFailed`.
pub async fn run_checked(invoker: &impl Invoker, invocation: Invocation) -> Result<InvocationOutput, ExecuteError> {
  let cmd = invocation.display();
  let output = invoker.invoke(invocation).await?;
  if output.success() {
    return Ok(output);
  }
  Err(ExecuteError::CmdFailed {
    cmd,
    code: output.code,
    stdout: output.stdout,
    stderr: output.stderr,
  })
}

/// The shell program and the arguments preceding the script.
///
/// Defaults to `/bin/sh` on Unix and PowerShell on Windows rather than the
/// user's login shell, whose profile would leak into the build environment.
pub fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn sh(script: &str, env: &[(&str, &str)], cwd: PathBuf) -> Invocation {
    Invocation {
      program: "/bin/sh".to_string(),
      args: vec!["-c".to_string(), script.to_string()],
      env: env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
      cwd,
    }
  }

  #[tokio::test]
  async fn captures_output_and_code() {
    let dir = TempDir::new().unwrap();
    let out = ProcessInvoker
      .invoke(sh("echo hello; echo oops >&2; exit 3", &[], dir.path().to_path_buf()))
      .await
      .unwrap();
    assert_eq!(out.code, Some(3));
    assert_eq!(out.stdout.trim(), "hello");
    assert_eq!(out.stderr.trim(), "oops");
  }

  #[tokio::test]
  async fn environment_is_exactly_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let out = ProcessInvoker
      .invoke(sh(
        "echo \"$CELLAR_TEST_VAR:${HOME:-unset}\"",
        &[("CELLAR_TEST_VAR", "isolated")],
        dir.path().to_path_buf(),
      ))
      .await
      .unwrap();
    assert_eq!(out.stdout.trim(), "isolated:unset");
  }

  #[tokio::test]
  async fn runs_in_cwd() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker"), "").unwrap();
    let out = ProcessInvoker
      .invoke(sh("ls", &[], dir.path().to_path_buf()))
      .await
      .unwrap();
    assert!(out.stdout.contains("marker"));
  }

  #[tokio::test]
  async fn run_checked_reports_failure_with_output() {
    let dir = TempDir::new().unwrap();
    let err = run_checked(&ProcessInvoker, sh("echo building; exit 1", &[], dir.path().to_path_buf()))
      .await
      .unwrap_err();
    match err {
      ExecuteError::CmdFailed { code, stdout, .. } => {
        assert_eq!(code, Some(1));
        assert_eq!(stdout.trim(), "building");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn missing_program_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let invocation = Invocation {
      program: "/nonexistent/cellar-tool".to_string(),
      args: vec![],
      env: BTreeMap::new(),
      cwd: dir.path().to_path_buf(),
    };
    assert!(matches!(
      ProcessInvoker.invoke(invocation).await,
      Err(ExecuteError::Spawn { .. })
    ));
  }

  #[test]
  fn shell_override_args() {
    assert_eq!(get_shell(Some("/bin/bash")).1, vec!["-c".to_string()]);
    assert_eq!(get_shell(Some("pwsh")).1[1], "-Command");
    assert_eq!(get_shell(None).0, "/bin/sh");
  }
}
