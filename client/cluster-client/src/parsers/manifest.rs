use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::entities::manifest::{
  compute_basedir, compute_configdir, PreServiceConfig, RunsOn, ServiceConfig,
};
use crate::error::ManifestError;
use crate::parsers::ini;

fn split_csv(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// Loads the bundle manifest (`[Meta]` + `[Config]`), component C3's first
/// half. `basedir`/`configdir` are derived from the runtime identity
/// (`workdir`, `user`, `fqdn`, `pid`) rather than read from the file, since
/// the manifest is shared across every rank but the directory is per-job.
pub fn load_pre_service_config(
  text: &str,
  path: &str,
  workdir: &Path,
  user: &str,
  fqdn: &str,
  pid: u32,
) -> Result<PreServiceConfig, ManifestError> {
  let doc = ini::parse(text, path)?;

  let meta = doc.require_section("Meta", path)?;
  let version = ini::IniDocument::require_key(meta, "Meta", "version", path)?;

  let config = doc.require_section("Config", path)?;
  let modules_raw = ini::IniDocument::require_key(config, "Config", "modules", path)?;
  let modules = split_csv(&modules_raw);

  // `[Config]`'s `services`/`configs` keys populate `service_files`/
  // `config_files` respectively — the field names describe what the
  // paths are, the manifest keys name the unit kind they declare.
  let service_files_raw = ini::IniDocument::require_key(config, "Config", "services", path)?;
  let service_files = split_csv(&service_files_raw).into_iter().map(PathBuf::from).collect();
  let config_files_raw = ini::IniDocument::require_key(config, "Config", "configs", path)?;
  let config_files = split_csv(&config_files_raw).into_iter().map(PathBuf::from).collect();
  let directories_raw = ini::IniDocument::require_key(config, "Config", "directories", path)?;
  let directories = split_csv(&directories_raw).into_iter().map(PathBuf::from).collect();
  let master_env_raw = ini::IniDocument::require_key(config, "Config", "master_env", path)?;
  let master_env = split_csv(&master_env_raw);

  let basedir = compute_basedir(workdir, user, fqdn, pid);
  let configdir = compute_configdir(&basedir);

  Ok(PreServiceConfig {
    version,
    basedir,
    configdir,
    config_files,
    service_files,
    directories,
    modules,
    master_env,
  })
}

/// Loads one unit manifest (`[Unit]` + `[Service]` + `[Environment]`),
/// component C3's second half. `[Environment]` is optional; `pre_start_cmd`
/// is optional (some services, e.g. `LocalClient`, have nothing to do
/// before `start_cmd`).
pub fn load_service_config(
  text: &str,
  path: &str,
) -> Result<ServiceConfig, ManifestError> {
  let doc = ini::parse(text, path)?;

  let unit = doc.require_section("Unit", path)?;
  let name = ini::IniDocument::require_key(unit, "Unit", "Name", path)?;
  let runs_on_raw = ini::IniDocument::require_key(unit, "Unit", "RunsOn", path)?;
  let runs_on = RunsOn::parse(&runs_on_raw, path)?;

  let service = doc.require_section("Service", path)?;
  let pre_start_cmd = service.get("ExecStartPre").cloned();
  let start_cmd = ini::IniDocument::require_key(service, "Service", "ExecStart", path)?;
  let stop_cmd = ini::IniDocument::require_key(service, "Service", "ExecStop", path)?;

  let env: IndexMap<String, String> = doc
    .section("Environment")
    .cloned()
    .unwrap_or_default();

  Ok(ServiceConfig::new(
    name,
    runs_on,
    pre_start_cmd,
    start_cmd,
    stop_cmd,
    env,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loads_pre_service_config_and_derives_basedir() {
    let text = "\
[Meta]
version = 1.0

[Config]
modules = hdfs, yarn
master_env = JAVA_HOME, PATH
services = hdfs.manifest, yarn.manifest
configs = core-site.xml
directories = /var/log/hod
";
    let cfg = load_pre_service_config(
      text,
      "bundle.manifest",
      Path::new("/scratch"),
      "alice",
      "node0.cluster",
      999,
    )
    .unwrap();
    assert_eq!(cfg.version, "1.0");
    assert_eq!(cfg.modules, vec!["hdfs", "yarn"]);
    assert_eq!(cfg.master_env, vec!["JAVA_HOME", "PATH"]);
    assert_eq!(
      cfg.basedir,
      PathBuf::from("/scratch/hod/alice.node0.cluster.999")
    );
    assert_eq!(cfg.configdir, cfg.basedir.join("conf"));
  }

  #[test]
  fn missing_modules_key_is_an_error() {
    let text = "[Meta]\nversion = 1\n\n[Config]\n";
    let err = load_pre_service_config(
      text,
      "bundle.manifest",
      Path::new("/scratch"),
      "alice",
      "node0",
      1,
    );
    assert!(err.is_err());
  }

  #[test]
  fn loads_service_config_with_environment() {
    let text = "\
[Unit]
Name = hdfs-namenode
RunsOn = master

[Service]
ExecStartPre = mkdir -p $basedir/hdfs
ExecStart = $hadoop_home/bin/hdfs namenode
ExecStop = kill $pid

[Environment]
HADOOP_HOME = /opt/hadoop
HADOOP_CONF_DIR = $configdir
";
    let cfg = load_service_config(text, "hdfs.manifest").unwrap();
    assert_eq!(cfg.name, "hdfs-namenode");
    assert_eq!(cfg.runs_on, RunsOn::CoordinatorOnly);
    let resolver = crate::template::TemplateResolver::new()
      .with("basedir", "/scratch/hod/x")
      .with("hadoop_home", "/opt/hadoop")
      .with("pid", "42")
      .with("configdir", "/scratch/hod/x/conf");
    assert_eq!(
      cfg.pre_start_cmd(&resolver).unwrap().unwrap(),
      "mkdir -p /scratch/hod/x/hdfs"
    );
    assert_eq!(
      cfg.start_cmd(&resolver).unwrap(),
      "/opt/hadoop/bin/hdfs namenode"
    );
    let env = cfg.env(&resolver).unwrap();
    assert_eq!(
      env.get("HADOOP_CONF_DIR").unwrap(),
      "/scratch/hod/x/conf"
    );
  }

  #[test]
  fn service_config_without_environment_section_is_ok() {
    let text = "\
[Unit]
Name = client
RunsOn = all

[Service]
ExecStart = /bin/true
ExecStop = /bin/true
";
    let cfg = load_service_config(text, "client.manifest").unwrap();
    let resolver = crate::template::TemplateResolver::new();
    assert!(cfg.pre_start_cmd(&resolver).unwrap().is_none());
    assert_eq!(cfg.runs_on, RunsOn::All);
  }

  #[test]
  fn invalid_runs_on_is_rejected() {
    let text = "\
[Unit]
Name = x
RunsOn = everywhere

[Service]
ExecStart = /bin/true
ExecStop = /bin/true
";
    assert!(load_service_config(text, "x.manifest").is_err());
  }
}
