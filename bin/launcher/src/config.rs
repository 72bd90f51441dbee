use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use clap::Parser;
use cluster_client::entities::logger::{LogConfig, LogLevel, StdioLogMode};
use serde::Deserialize;

/// Command-line surface. Anything left `None` here falls back to the
/// matching `LAUNCHER_*` environment variable, then to a hardcoded
/// default; CLI wins ties.
#[derive(Debug, Parser)]
#[command(version, about = "Distributed service-lifecycle launcher")]
pub struct CliArgs {
  /// Path to the bundle (preservice) manifest.
  #[arg(long)]
  pub manifest: Option<PathBuf>,

  /// Path to a unit manifest. Repeatable; one per service.
  #[arg(long = "unit")]
  pub units: Vec<PathBuf>,

  /// Scratch root `basedir` is computed under.
  #[arg(long)]
  pub workdir: Option<PathBuf>,

  /// This process's rank within the job. Usually set by the batch-job
  /// wrapper rather than typed by hand.
  #[arg(long)]
  pub world_rank: Option<usize>,

  /// Total number of ranks in the job.
  #[arg(long)]
  pub world_size: Option<usize>,

  /// `host:port` the coordinator's collective-transport hub listens on
  /// and every other rank dials.
  #[arg(long)]
  pub coordinator_addr: Option<String>,

  #[arg(long)]
  pub hdfs: Option<bool>,
  #[arg(long)]
  pub mapred: Option<bool>,
  #[arg(long)]
  pub hbase: Option<bool>,
  #[arg(long)]
  pub yarn: Option<bool>,

  /// User work-script run by the LocalClient distribution.
  #[arg(long)]
  pub work_script: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Env {
  pub launcher_manifest: Option<PathBuf>,
  pub launcher_units: Option<Vec<PathBuf>>,
  pub launcher_workdir: Option<PathBuf>,
  pub launcher_world_rank: Option<usize>,
  pub launcher_world_size: Option<usize>,
  pub launcher_coordinator_addr: Option<String>,
  pub launcher_hdfs: Option<bool>,
  pub launcher_mapred: Option<bool>,
  pub launcher_hbase: Option<bool>,
  pub launcher_yarn: Option<bool>,
  pub launcher_work_script: Option<PathBuf>,
  pub launcher_age_limit_secs: Option<u64>,
  pub launcher_poll_interval_secs: Option<u64>,
  pub launcher_logging_level: Option<LogLevel>,
  pub launcher_logging_stdio: Option<StdioLogMode>,
  pub launcher_logging_pretty: Option<bool>,
}

/// Default service lifetime budget (§4.5): 71 hours.
const DEFAULT_AGE_LIMIT_SECS: u64 = 71 * 60 * 60;
/// Default supervisor poll interval (§4.5).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct LauncherConfig {
  pub manifest: PathBuf,
  pub units: Vec<PathBuf>,
  pub workdir: PathBuf,
  pub world_rank: usize,
  pub world_size: usize,
  pub coordinator_addr: String,
  pub hdfs: bool,
  pub mapred: bool,
  pub hbase: bool,
  pub yarn: bool,
  pub work_script: Option<PathBuf>,
  pub age_limit: Duration,
  pub poll_interval: Duration,
  pub logging: LogConfig,
}

pub fn launcher_args() -> &'static CliArgs {
  static LAUNCHER_ARGS: OnceLock<CliArgs> = OnceLock::new();
  LAUNCHER_ARGS.get_or_init(CliArgs::parse)
}

pub fn launcher_config() -> &'static LauncherConfig {
  static LAUNCHER_CONFIG: OnceLock<LauncherConfig> = OnceLock::new();
  LAUNCHER_CONFIG.get_or_init(|| {
    let env: Env =
      envy::from_env().expect("failed to parse launcher environment");
    let args = launcher_args();

    LauncherConfig {
      manifest: args
        .manifest
        .clone()
        .or(env.launcher_manifest)
        .expect("no bundle manifest given (--manifest / LAUNCHER_MANIFEST)"),
      units: if args.units.is_empty() {
        env.launcher_units.unwrap_or_default()
      } else {
        args.units.clone()
      },
      workdir: args
        .workdir
        .clone()
        .or(env.launcher_workdir)
        .unwrap_or_else(std::env::temp_dir),
      world_rank: args
        .world_rank
        .or(env.launcher_world_rank)
        .expect("no world rank given (--world-rank / LAUNCHER_WORLD_RANK)"),
      world_size: args
        .world_size
        .or(env.launcher_world_size)
        .expect("no world size given (--world-size / LAUNCHER_WORLD_SIZE)"),
      coordinator_addr: args
        .coordinator_addr
        .clone()
        .or(env.launcher_coordinator_addr)
        .expect(
          "no coordinator address given (--coordinator-addr / LAUNCHER_COORDINATOR_ADDR)",
        ),
      hdfs: args.hdfs.or(env.launcher_hdfs).unwrap_or(true),
      mapred: args.mapred.or(env.launcher_mapred).unwrap_or(true),
      hbase: args.hbase.or(env.launcher_hbase).unwrap_or(false),
      yarn: args.yarn.or(env.launcher_yarn).unwrap_or(false),
      work_script: args.work_script.clone().or(env.launcher_work_script),
      age_limit: Duration::from_secs(
        env.launcher_age_limit_secs.unwrap_or(DEFAULT_AGE_LIMIT_SECS),
      ),
      poll_interval: Duration::from_secs(
        env
          .launcher_poll_interval_secs
          .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
      ),
      logging: LogConfig {
        level: env.launcher_logging_level.unwrap_or_default(),
        stdio: env.launcher_logging_stdio.unwrap_or_default(),
        pretty: env.launcher_logging_pretty.unwrap_or_default(),
        ..Default::default()
      },
    }
  })
}
