use std::{
  fs::File,
  path::{Path, PathBuf},
  process::Stdio,
  sync::OnceLock,
};

mod output;

use indexmap::IndexMap;
pub use output::*;
use tokio::process::{Child, Command};

/// Commands are run directly, and cannot include shell operators like
/// `&&`/`||` or redirection. Used where a manifest-level command is known
/// to be a single argv, not a shell fragment.
pub async fn run_standard_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let lexed = if let Some(lexed) = shlex::split(command)
    && !lexed.is_empty()
  {
    lexed
  } else {
    return CommandOutput::from_err(
      std::io::Error::other("command lexed into empty args"),
      None,
    );
  };

  let mut cmd = Command::new(&lexed[0]);

  cmd
    .args(&lexed[1..])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e, None),
    }
  }

  CommandOutput::from(cmd.output().await, None)
}

fn shell() -> &'static str {
  static DEFAULT_SHELL: OnceLock<String> = OnceLock::new();
  DEFAULT_SHELL.get_or_init(|| {
    if PathBuf::from("/bin/bash").exists()
      || PathBuf::from("/usr/bin/bash").exists()
    {
      String::from("bash")
    } else {
      String::from("sh")
    }
  })
}

/// Commands are wrapped in 'sh -c', and can include '&&'.
pub async fn run_shell_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let mut cmd = Command::new(shell());

  cmd
    .args(["-c", command])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e, None),
    }
  }

  CommandOutput::from(cmd.output().await, None)
}

/// Spawns `start_cmd` as a long-running, non-blocking child, redirecting
/// its stdout/stderr to `stdout_path`/`stderr_path` under the service's
/// basedir. `envs` replaces the child's environment wholesale (the caller
/// has already merged inherited/master/manifest precedence) rather than
/// layering on top of this process's own environment. Returns the spawned
/// [`Child`] so the caller can read its pid and reap it on shutdown; the
/// executor never awaits this child directly.
pub fn spawn_long_running(
  command: &str,
  path: impl Into<Option<&Path>>,
  stdout_path: &Path,
  stderr_path: &Path,
  envs: &IndexMap<String, String>,
) -> anyhow::Result<Child> {
  let stdout = File::create(stdout_path)?;
  let stderr = File::create(stderr_path)?;

  let mut cmd = Command::new(shell());
  cmd
    .args(["-c", command])
    .kill_on_drop(false)
    .stdin(Stdio::null())
    .stdout(Stdio::from(stdout))
    .stderr(Stdio::from(stderr))
    .env_clear()
    .envs(envs);

  if let Some(path) = path.into() {
    cmd.current_dir(path.canonicalize()?);
  }

  Ok(cmd.spawn()?)
}

/// Sends `SIGTERM` to `pid`. Used as the executor's fallback when a
/// service's `stop_cmd` is absent or the process outlives it.
pub fn terminate(pid: u32) -> std::io::Result<()> {
  let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
  if ret == 0 {
    Ok(())
  } else {
    Err(std::io::Error::last_os_error())
  }
}

/// `true` if a process with `pid` is still alive (signal 0 probe).
pub fn is_alive(pid: u32) -> bool {
  unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
