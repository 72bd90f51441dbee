use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cluster_client::entities::node::NodeTable;
use cluster_client::entities::plan::Plan;
use cluster_client::parsers::{load_pre_service_config, load_service_config};
use collective::{TcpTransport, Transport, TransportExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Everything the coordinator decides at planning time and the only
/// payload broadcast down the wire before every rank starts executing.
#[derive(Debug, Serialize, Deserialize)]
struct BroadcastPlan {
  plan: Plan,
  master_env: IndexMap<String, String>,
}

#[macro_use]
extern crate tracing;

mod config;
mod executor;
mod planner;
mod probe;
mod service;
mod state;
mod supervisor;

use config::launcher_config;
use planner::PlannerOptions;
use state::{basedir, configdir};

/// Top-level per-rank run: discover, plan (coordinator only), broadcast,
/// execute, supervise. Returns `Err` for any uncaught planner or
/// transport failure, which `main` turns into a non-zero exit code.
async fn app() -> anyhow::Result<()> {
  let config = launcher_config();
  logger::init(&config.logging)?;

  std::fs::create_dir_all(basedir())?;
  std::fs::create_dir_all(configdir())?;

  info!(
    world_rank = config.world_rank,
    world_size = config.world_size,
    "launcher starting"
  );

  let transport = if config.world_rank == 0 {
    TcpTransport::bind(&config.coordinator_addr, config.world_size).await?
  } else {
    TcpTransport::connect(
      &config.coordinator_addr,
      config.world_rank,
      config.world_size,
    )
    .await?
  };

  let local = probe::probe();
  let world = transport.world_group();
  let node_table: NodeTable = transport.all_to_all(&world, &local).await?;
  info!(nodes = node_table.len(), "node table exchange complete");

  let coordinator_payload = if config.world_rank == 0 {
    let bundle_text = std::fs::read_to_string(&config.manifest)?;
    let pre = load_pre_service_config(
      &bundle_text,
      &config.manifest.display().to_string(),
      &config.workdir,
      &state::whoami_user(),
      &node_table[0].fqdn,
      std::process::id(),
    )?;

    let mut services = Vec::with_capacity(config.units.len());
    for unit_path in &config.units {
      let text = std::fs::read_to_string(unit_path)?;
      services.push(load_service_config(&text, &unit_path.display().to_string())?);
    }

    let options = PlannerOptions {
      hdfs: config.hdfs,
      mapred: config.mapred,
      hbase: config.hbase,
      yarn: config.yarn,
      work_script: config.work_script.clone(),
    };
    let plan = planner::plan(&services, &node_table, &options)?;
    info!(
      distributions = plan.distributions.len(),
      modules = ?pre.modules,
      "plan computed, broadcasting"
    );
    let master_env = service::capture_master_env(&pre.master_env);
    Some(BroadcastPlan { plan, master_env })
  } else {
    None
  };
  let BroadcastPlan { plan, master_env } = transport
    .broadcast(&world, 0, coordinator_payload.as_ref())
    .await?;

  let masterhostname = node_table[0].fqdn.clone();
  let control_root = basedir().join("control");
  std::fs::create_dir_all(&control_root)?;

  for distribution in &plan.distributions {
    // Every world rank must call subgroup(), including ranks excluded
    // from it — the hub only resolves a subgroup once every rank has
    // submitted the request (lib/collective/src/hub.rs). Skipping the
    // call for non-members deadlocks every member's join forever.
    let joined = executor::join(
      &transport,
      distribution,
      distribution.ranks.clone(),
      &control_root,
      &masterhostname,
      master_env.clone(),
      config.age_limit,
    )
    .await?;

    if let Some(mut work) = joined {
      executor::drive_to_running(&transport, &mut work, &local).await?;
      state::active_work().lock().await.push(work);
    }
  }

  // A concurrent listener flips this when SIGTERM arrives; the supervisor
  // loop reads it once per poll (§4.5 stop condition 3) rather than
  // racing the whole run against the signal.
  let term_signal = Arc::new(AtomicBool::new(false));
  let listener_flag = term_signal.clone();
  tokio::spawn(async move {
    if let Ok(mut term) = tokio::signal::unix::signal(
      tokio::signal::unix::SignalKind::terminate(),
    ) {
      term.recv().await;
      info!("termination signal received, draining active work");
      listener_flag.store(true, Ordering::Relaxed);
    }
  });

  supervisor::run(&transport, &local, &term_signal).await?;

  info!(world_rank = config.world_rank, "all active work retired, exiting cleanly");
  Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
  dotenvy::dotenv().ok();

  match app().await {
    Ok(()) => std::process::ExitCode::SUCCESS,
    Err(e) => {
      error!("launcher exited with error: {e:#}");
      std::process::ExitCode::FAILURE
    }
  }
}
