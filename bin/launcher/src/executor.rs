//! Work Executor (C6): drives one rank's [`ActiveWork`] through the
//! per-distribution lifecycle state machine under collective barriers.
//! See `spec.md` §4.5 for the transition diagram this mirrors exactly.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use cluster_client::entities::manifest::ServiceConfig;
use cluster_client::entities::plan::{Distribution, ServiceKind};
use collective::{GroupHandle, Transport};
use indexmap::IndexMap;
use tokio::process::Child;
use tracing::{info, warn};

use crate::service::{build_resolver, merged_environment};

pub const FORCE_STOP_SENTINEL: &str = "force_stop";
pub const FORCE_CONTINUE_SENTINEL: &str = "force_continue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
  New,
  Joined,
  PreRunning,
  Running,
  Stopping,
  Retired,
}

/// Why a rank advanced a piece of work to `STOPPING` (§7, "Lifetime" row:
/// this is a normal termination path, not an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  AgeLimit,
  Sentinel,
  Signal,
}

pub enum StopDecision {
  Continue,
  Stop(StopReason),
}

/// Per-rank runtime record for one `Distribution` this rank participates
/// in. `child` is `None` until `RUNNING` is reached and `None` again once
/// the process is reaped on the way to `RETIRED`.
pub struct ActiveWork {
  pub kind: ServiceKind,
  pub name: String,
  pub group: GroupHandle,
  pub state: WorkState,
  pub start_time: Option<Instant>,
  pub age_limit: Duration,
  pub control_dir: PathBuf,
  pub config: ServiceConfig,
  pub masterhostname: String,
  pub master_env: IndexMap<String, String>,
  pub child: Option<Child>,
  pub fatal: bool,
}

impl ActiveWork {
  fn sentinel(&self, name: &str) -> PathBuf {
    self.control_dir.join(name)
  }
}

/// Forms the subgroup for `distribution` and, if this rank is a member,
/// returns a fresh `NEW`-state `ActiveWork`. Ranks excluded from the
/// subgroup get `None` back and never enter the machine for it.
pub async fn join<T: Transport>(
  transport: &T,
  distribution: &Distribution,
  ranks: Vec<usize>,
  control_root: &std::path::Path,
  masterhostname: &str,
  master_env: IndexMap<String, String>,
  age_limit: Duration,
) -> anyhow::Result<Option<ActiveWork>> {
  let Some(group) = transport.subgroup(ranks).await? else {
    return Ok(None);
  };

  transport.barrier(&group, "joined").await?;

  let control_dir = control_root.join(&distribution.config.name);
  std::fs::create_dir_all(&control_dir)?;

  Ok(Some(ActiveWork {
    kind: distribution.kind.clone(),
    name: distribution.config.name.clone(),
    group,
    state: WorkState::Joined,
    start_time: None,
    age_limit,
    control_dir,
    config: distribution.config.clone(),
    masterhostname: masterhostname.to_string(),
    master_env,
    child: None,
    fatal: false,
  }))
}

/// Drives `work` from `JOINED` through `PRE_RUNNING` to `RUNNING`:
/// barrier, optional `pre_start_cmd`, barrier, spawn `start_cmd`.
pub async fn drive_to_running<T: Transport>(
  transport: &T,
  work: &mut ActiveWork,
  node: &cluster_client::entities::node::NodeDescriptor,
) -> anyhow::Result<()> {
  transport.barrier(&work.group, "pre-start").await?;
  work.state = WorkState::PreRunning;

  let resolver = build_resolver(node, &work.masterhostname);

  if let Some(pre_start) = work.config.pre_start_cmd(&resolver)? {
    let out = command::run_standard_command(
      &pre_start,
      Some(work.control_dir.as_path()),
    )
    .await;
    if !out.success() {
      warn!(
        service = %work.name,
        stderr = %out.stderr,
        "pre_start_cmd exited non-zero"
      );
    }
  }

  transport.barrier(&work.group, "start").await?;

  let start_cmd = work.config.start_cmd(&resolver)?;
  let env = merged_environment(&work.config.env(&resolver)?, &work.master_env);

  let stdout_path = work.control_dir.join("stdout.log");
  let stderr_path = work.control_dir.join("stderr.log");
  match command::spawn_long_running(
    &start_cmd,
    Some(work.control_dir.as_path()),
    &stdout_path,
    &stderr_path,
    &env,
  ) {
    Ok(child) => {
      work.child = Some(child);
      work.start_time = Some(Instant::now());
      work.state = WorkState::Running;
      info!(service = %work.name, "service started");
    }
    Err(e) => {
      warn!(service = %work.name, error = %e, "start_cmd failed to launch");
      work.fatal = true;
      work.state = WorkState::Stopping;
    }
  }

  Ok(())
}

/// Evaluates the three stop conditions (§4.5). `now`/`signal_received`
/// are passed in explicitly (rather than read from the clock/signal
/// handler here) so tests can drive the age-limit path without sleeping.
pub fn work_wait(
  work: &ActiveWork,
  now: Instant,
  signal_received: bool,
) -> StopDecision {
  if work.sentinel(FORCE_STOP_SENTINEL).exists() {
    return StopDecision::Stop(StopReason::Sentinel);
  }
  if signal_received {
    return StopDecision::Stop(StopReason::Signal);
  }

  let age_expired = work
    .start_time
    .map(|start| now.duration_since(start) > work.age_limit)
    .unwrap_or(false);

  if age_expired {
    if work.sentinel(FORCE_CONTINUE_SENTINEL).exists() {
      return StopDecision::Continue;
    }
    return StopDecision::Stop(StopReason::AgeLimit);
  }

  StopDecision::Continue
}

/// `true` once a distribution has fully retired; stopping it again must
/// be a no-op (testable property 7).
fn already_retired(work: &ActiveWork) -> bool {
  work.state == WorkState::Retired
}

/// Drives `work` from wherever it is to `RETIRED`: barrier, `stop_cmd`
/// (falling back to `SIGTERM` if the process outlives it), barrier.
/// Calling this on an already-retired `work` is a no-op — no exception,
/// no duplicate barrier.
pub async fn stop<T: Transport>(
  transport: &T,
  work: &mut ActiveWork,
  node: &cluster_client::entities::node::NodeDescriptor,
) -> anyhow::Result<()> {
  if already_retired(work) {
    return Ok(());
  }

  work.state = WorkState::Stopping;
  transport.barrier(&work.group, "stop").await?;

  let resolver = build_resolver(node, &work.masterhostname);
  let stop_cmd = work.config.stop_cmd(&resolver)?;
  let out =
    command::run_shell_command(&stop_cmd, Some(work.control_dir.as_path()))
      .await;
  if !out.success() {
    warn!(service = %work.name, stderr = %out.stderr, "stop_cmd exited non-zero");
  }

  if let Some(child) = &work.child
    && let Some(pid) = child.id()
    && command::is_alive(pid)
  {
    let _ = command::terminate(pid);
  }
  work.child = None;

  work.state = WorkState::Retired;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use cluster_client::entities::manifest::RunsOn;
  use indexmap::IndexMap as Map;
  use tempfile::tempdir;

  fn bare_work(control_dir: PathBuf, age_limit: Duration) -> ActiveWork {
    ActiveWork {
      kind: ServiceKind::Generic("test".into()),
      name: "test".to_string(),
      group: GroupHandle::world(1),
      state: WorkState::Running,
      start_time: Some(Instant::now()),
      age_limit,
      control_dir,
      config: ServiceConfig::new(
        "test".into(),
        RunsOn::All,
        None,
        "true".into(),
        "true".into(),
        Map::new(),
      ),
      masterhostname: "rank0".to_string(),
      master_env: Map::new(),
      child: None,
      fatal: false,
    }
  }

  #[test]
  fn force_stop_overrides_everything() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(FORCE_STOP_SENTINEL), "").unwrap();
    let work = bare_work(dir.path().to_path_buf(), Duration::from_secs(3600));
    matches!(
      work_wait(&work, Instant::now(), false),
      StopDecision::Stop(StopReason::Sentinel)
    );
  }

  #[test]
  fn age_expiry_triggers_stop() {
    let dir = tempdir().unwrap();
    let mut work =
      bare_work(dir.path().to_path_buf(), Duration::from_millis(1));
    work.start_time = Some(Instant::now() - Duration::from_secs(10));
    match work_wait(&work, Instant::now(), false) {
      StopDecision::Stop(StopReason::AgeLimit) => {}
      _ => panic!("expected age limit stop"),
    }
  }

  #[test]
  fn force_continue_overrides_age_but_not_sentinel() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(FORCE_CONTINUE_SENTINEL), "").unwrap();
    let mut work =
      bare_work(dir.path().to_path_buf(), Duration::from_millis(1));
    work.start_time = Some(Instant::now() - Duration::from_secs(10));
    match work_wait(&work, Instant::now(), false) {
      StopDecision::Continue => {}
      _ => panic!("force_continue should have overridden the age limit"),
    }
  }

  #[test]
  fn signal_triggers_stop_regardless_of_age() {
    let dir = tempdir().unwrap();
    let work = bare_work(dir.path().to_path_buf(), Duration::from_secs(3600));
    match work_wait(&work, Instant::now(), true) {
      StopDecision::Stop(StopReason::Signal) => {}
      _ => panic!("expected signal stop"),
    }
  }

  #[test]
  fn retired_work_is_already_retired() {
    let dir = tempdir().unwrap();
    let mut work = bare_work(dir.path().to_path_buf(), Duration::from_secs(3600));
    assert!(!already_retired(&work));
    work.state = WorkState::Retired;
    assert!(already_retired(&work));
  }
}
