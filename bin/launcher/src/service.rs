//! Per-rank command resolution for one [`Distribution`]: builds the
//! template dictionary a rank resolves its `ServiceConfig` against, and
//! merges the service's child-process environment.

use cluster_client::TemplateResolver;
use cluster_client::entities::node::NodeDescriptor;
use indexmap::IndexMap;
use tracing::warn;
use validations::{StringValidator, StringValidatorMatches};

use crate::config::launcher_config;
use crate::state::{basedir, configdir, whoami_user};

/// Builds the value dictionary a single rank resolves a `ServiceConfig`'s
/// templated fields against (§4.3). `masterhostname` is supplied by the
/// caller because it is a planning-time fact (the coordinator's fqdn),
/// not something this rank can discover locally.
pub fn build_resolver(
  node: &NodeDescriptor,
  masterhostname: &str,
) -> TemplateResolver {
  let basedir = basedir().display().to_string();
  let configdir = configdir().display().to_string();
  let workdir = launcher_config().workdir.display().to_string();
  let hostaddress = node
    .interfaces
    .first()
    .map(|i| i.ipv4.to_string())
    .unwrap_or_else(|| "0.0.0.0".to_string());

  TemplateResolver::new()
    .with("hostname", node.fqdn.clone())
    .with("hostaddress", hostaddress)
    .with("basedir", basedir)
    .with("configdir", configdir)
    .with("workdir", workdir)
    .with("user", whoami_user())
    .with("pid", node.pid.to_string())
    .with("masterhostname", masterhostname.to_string())
    .with_os_environment()
}

/// Merges a service's child-process environment per §6: `master_env`
/// (captured on the coordinator at planning time) is overlaid on the
/// process's inherited environment, then the manifest's `[Environment]`
/// entries are overlaid last, winning every tie.
pub fn merged_environment(
  manifest_env: &IndexMap<String, String>,
  master_env: &IndexMap<String, String>,
) -> IndexMap<String, String> {
  let mut merged: IndexMap<String, String> =
    std::env::vars().collect();
  for (k, v) in master_env {
    merged.insert(k.clone(), v.clone());
  }
  for (k, v) in manifest_env {
    merged.insert(k.clone(), v.clone());
  }
  merged
}

/// Captures the named `master_env` variables from this process's own
/// environment. Called on the coordinator at planning time; the captured
/// values travel inside the broadcast `Plan` and are injected verbatim
/// into every worker's environment before any `start_cmd` runs.
pub fn capture_master_env(names: &[String]) -> IndexMap<String, String> {
  names
    .iter()
    .filter(|name| {
      let valid = StringValidator::default()
        .min_length(1)
        .matches(StringValidatorMatches::VariableName)
        .validate(name)
        .is_ok();
      if !valid {
        warn!(name, "master_env name is not a valid variable name, dropping");
      }
      valid
    })
    .filter_map(|name| {
      std::env::var(name).ok().map(|v| (name.clone(), v))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manifest_wins_over_master_env_on_collision() {
    let mut manifest_env = IndexMap::new();
    manifest_env.insert("JAVA_HOME".to_string(), "/manifest/java".to_string());
    let mut master_env = IndexMap::new();
    master_env.insert("JAVA_HOME".to_string(), "/master/java".to_string());

    let merged = merged_environment(&manifest_env, &master_env);
    assert_eq!(merged.get("JAVA_HOME").unwrap(), "/manifest/java");
  }

  #[test]
  fn master_env_wins_over_inherited_when_manifest_silent() {
    // SAFETY: test-local env var, no concurrent access to this key.
    unsafe { std::env::set_var("LAUNCHER_TEST_VAR", "inherited") };
    let manifest_env = IndexMap::new();
    let mut master_env = IndexMap::new();
    master_env
      .insert("LAUNCHER_TEST_VAR".to_string(), "from-master".to_string());

    let merged = merged_environment(&manifest_env, &master_env);
    assert_eq!(merged.get("LAUNCHER_TEST_VAR").unwrap(), "from-master");
    unsafe { std::env::remove_var("LAUNCHER_TEST_VAR") };
  }
}
