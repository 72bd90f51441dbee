use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::template::TemplateResolver;

/// Which rank subset a `ServiceConfig` runs on, parsed case-insensitively
/// from the unit manifest's `[Unit]` `RunsOn` key (`master|slave|all`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunsOn {
  CoordinatorOnly,
  WorkersOnly,
  All,
}

impl RunsOn {
  pub fn parse(s: &str, manifest_path: &str) -> Result<Self, ManifestError> {
    match s.to_ascii_lowercase().as_str() {
      "master" => Ok(RunsOn::CoordinatorOnly),
      "slave" => Ok(RunsOn::WorkersOnly),
      "all" => Ok(RunsOn::All),
      other => Err(ManifestError::InvalidRunsOn {
        path: manifest_path.to_string(),
        value: other.to_string(),
      }),
    }
  }

  /// Given the coordinator rank and the full rank range, return the ranks
  /// this service runs on. `world_size == 1` collapses `WorkersOnly` to
  /// `[coordinator_rank]` (the coordinator is also the only worker).
  pub fn ranks(&self, coordinator_rank: usize, world_size: usize) -> Vec<usize> {
    let all: Vec<usize> = (0..world_size).collect();
    match self {
      RunsOn::CoordinatorOnly => vec![coordinator_rank],
      RunsOn::WorkersOnly => {
        if world_size == 1 {
          vec![coordinator_rank]
        } else {
          all.into_iter().filter(|r| *r != coordinator_rank).collect()
        }
      }
      RunsOn::All => all,
    }
  }
}

/// Computes `<workdir>/hod/<user>.<fqdn>.<pid>`, dot-joined exactly as the
/// original implementation does (not path-joined).
pub fn compute_basedir(
  workdir: &Path,
  user: &str,
  fqdn: &str,
  pid: u32,
) -> PathBuf {
  workdir.join("hod").join(format!("{user}.{fqdn}.{pid}"))
}

pub fn compute_configdir(basedir: &Path) -> PathBuf {
  basedir.join("conf")
}

/// The bundle manifest: `[Meta]` + `[Config]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreServiceConfig {
  pub version: String,
  pub basedir: PathBuf,
  pub configdir: PathBuf,
  pub config_files: Vec<PathBuf>,
  pub service_files: Vec<PathBuf>,
  pub directories: Vec<PathBuf>,
  pub modules: Vec<String>,
  pub master_env: Vec<String>,
}

/// One unit manifest (`[Unit]` + `[Service]` + `[Environment]`).
///
/// Fields other than `name` and `runs_on` are templated strings; they are
/// shipped unresolved in the `Plan` and only resolved per-rank via
/// [`ServiceConfig::start_cmd`] et al., because `basedir`/`hostname`/`pid`
/// differ per rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
  pub name: String,
  pub runs_on: RunsOn,
  pre_start_cmd: Option<String>,
  start_cmd: String,
  stop_cmd: String,
  /// Insertion order preserved: this is the order the underlying service
  /// expects its environment to be assembled in.
  env: IndexMap<String, String>,
}

impl ServiceConfig {
  pub fn new(
    name: String,
    runs_on: RunsOn,
    pre_start_cmd: Option<String>,
    start_cmd: String,
    stop_cmd: String,
    env: IndexMap<String, String>,
  ) -> Self {
    Self {
      name,
      runs_on,
      pre_start_cmd,
      start_cmd,
      stop_cmd,
      env,
    }
  }

  pub fn pre_start_cmd(
    &self,
    resolver: &TemplateResolver,
  ) -> Result<Option<String>, crate::error::TemplateError> {
    self
      .pre_start_cmd
      .as_deref()
      .map(|s| resolver.resolve(s))
      .transpose()
  }

  pub fn start_cmd(
    &self,
    resolver: &TemplateResolver,
  ) -> Result<String, crate::error::TemplateError> {
    resolver.resolve(&self.start_cmd)
  }

  pub fn stop_cmd(
    &self,
    resolver: &TemplateResolver,
  ) -> Result<String, crate::error::TemplateError> {
    resolver.resolve(&self.stop_cmd)
  }

  /// Resolves every `[Environment]` entry against `resolver`, preserving
  /// manifest order.
  pub fn env(
    &self,
    resolver: &TemplateResolver,
  ) -> Result<IndexMap<String, String>, crate::error::TemplateError> {
    self
      .env
      .iter()
      .map(|(k, v)| resolver.resolve(v).map(|v| (k.clone(), v)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn runs_on_master_is_coordinator_only() {
    let r = RunsOn::parse("Master", "x").unwrap();
    assert_eq!(r.ranks(0, 4), vec![0]);
  }

  #[test]
  fn runs_on_slave_excludes_coordinator() {
    let r = RunsOn::parse("SLAVE", "x").unwrap();
    assert_eq!(r.ranks(0, 4), vec![1, 2, 3]);
  }

  #[test]
  fn runs_on_slave_collapses_to_coordinator_when_world_size_one() {
    let r = RunsOn::parse("slave", "x").unwrap();
    assert_eq!(r.ranks(0, 1), vec![0]);
  }

  #[test]
  fn runs_on_all_is_every_rank() {
    let r = RunsOn::parse("all", "x").unwrap();
    assert_eq!(r.ranks(0, 3), vec![0, 1, 2]);
  }

  #[test]
  fn runs_on_rejects_unknown_value() {
    assert!(RunsOn::parse("bogus", "x").is_err());
  }

  #[test]
  fn basedir_is_dot_joined_not_path_joined() {
    let dir = compute_basedir(
      Path::new("/scratch"),
      "alice",
      "node7.cluster.local",
      4242,
    );
    assert_eq!(
      dir,
      PathBuf::from("/scratch/hod/alice.node7.cluster.local.4242")
    );
  }
}
