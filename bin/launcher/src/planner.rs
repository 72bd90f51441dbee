//! Distribution Planner (C5): runs once, on the coordinator, after the
//! initial `all_to_all` has replicated the `NodeTable`. Maps the parsed
//! unit manifests and feature toggles to an ordered [`Plan`] of
//! [`Distribution`]s, broadcast verbatim to every rank afterward.

use std::path::PathBuf;

use cluster_client::entities::manifest::{RunsOn, ServiceConfig};
use cluster_client::entities::node::NodeTable;
use cluster_client::entities::plan::{
  Distribution, ParamKind, ParamValue, Plan, ServiceKind,
};
use indexmap::IndexMap;
use tracing::warn;
use validations::{StringValidator, StringValidatorMatches};

#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
  pub hdfs: bool,
  pub mapred: bool,
  pub hbase: bool,
  pub yarn: bool,
  pub work_script: Option<PathBuf>,
}

fn param(
  kind: ParamKind,
  canonical_string: impl Into<String>,
  provenance_note: impl Into<String>,
) -> ParamValue {
  ParamValue {
    kind,
    canonical_string: canonical_string.into(),
    provenance_note: provenance_note.into(),
  }
}

/// Builds the ordered [`Plan`] per §4.4's algorithm. `services` are the
/// parsed unit manifests, unresolved; `nodes` is the replicated
/// `NodeTable` from the initial `all_to_all`.
pub fn plan(
  services: &[ServiceConfig],
  nodes: &NodeTable,
  options: &PlannerOptions,
) -> anyhow::Result<Plan> {
  anyhow::ensure!(!nodes.is_empty(), "node table is empty, cannot plan");
  for service in services {
    StringValidator::default()
      .min_length(1)
      .max_length(253)
      .matches(StringValidatorMatches::ServiceName)
      .validate(&service.name)
      .map_err(|e| anyhow::anyhow!("invalid service name {:?}: {e:#}", service.name))?;
  }
  let coordinator_rank = 0;
  let world_size = nodes.len();
  // network index: always 0 after C1's preference sort (§9 open question —
  // interface_reaching is otherwise unused past probe time).
  let network_index = 0;
  let rank0_host = &nodes[coordinator_rank].fqdn;

  let mut distributions: Vec<Distribution> = Vec::new();

  let find_unit = |kind: &ServiceKind| -> Option<&ServiceConfig> {
    services.iter().find(|s| &ServiceKind::parse(&s.name) == kind)
  };

  let depends_on_present = |kind: &ServiceKind, emitted: &[Distribution]| {
    kind
      .implicit_dependencies()
      .into_iter()
      .filter(|dep| emitted.iter().any(|d| &d.kind == dep))
      .collect::<Vec<_>>()
  };

  if options.hdfs {
    let config = find_unit(&ServiceKind::Hdfs).cloned().ok_or_else(|| {
      anyhow::anyhow!("hdfs enabled but no matching unit manifest was loaded")
    })?;
    let mut shared_params = IndexMap::new();
    shared_params.insert(
      "fs.default.name".to_string(),
      param(
        ParamKind::HostDerived,
        format!("hdfs://{rank0_host}:8020"),
        "coordinator's fqdn, HDFS distribution",
      ),
    );
    distributions.push(Distribution {
      kind: ServiceKind::Hdfs,
      depends_on: depends_on_present(&ServiceKind::Hdfs, &distributions),
      ranks: config.runs_on.ranks(coordinator_rank, world_size),
      config,
      network_index,
      shared_params,
      other_work: IndexMap::new(),
    });
  }

  if options.hbase {
    for d in &mut distributions {
      d.other_work.insert("Hbase".to_string(), true);
    }
    let config = find_unit(&ServiceKind::Hbase).cloned().ok_or_else(|| {
      anyhow::anyhow!("hbase enabled but no matching unit manifest was loaded")
    })?;
    let shared_params = inherited_hdfs_params(&distributions);
    distributions.push(Distribution {
      kind: ServiceKind::Hbase,
      depends_on: depends_on_present(&ServiceKind::Hbase, &distributions),
      ranks: config.runs_on.ranks(coordinator_rank, world_size),
      config,
      network_index,
      shared_params,
      other_work: IndexMap::new(),
    });
  }

  if options.mapred {
    if options.yarn {
      // YARN supersedes the classic JobTracker; MAPRED is only emitted
      // when YARN is off (§4.4 step 4).
    } else if !distributions.iter().any(|d| d.kind == ServiceKind::Hdfs) {
      warn!(
        "mapred enabled but its prerequisite HDFS distribution is absent, skipping"
      );
    } else {
      let config =
        find_unit(&ServiceKind::Mapred).cloned().ok_or_else(|| {
          anyhow::anyhow!(
            "mapred enabled but no matching unit manifest was loaded"
          )
        })?;
      let mut shared_params = inherited_hdfs_params(&distributions);
      shared_params.insert(
        "mapred.job.tracker".to_string(),
        param(
          ParamKind::HostDerived,
          format!("{rank0_host}:9000"),
          "coordinator's fqdn, MAPRED distribution",
        ),
      );
      distributions.push(Distribution {
        kind: ServiceKind::Mapred,
        depends_on: depends_on_present(&ServiceKind::Mapred, &distributions),
        ranks: config.runs_on.ranks(coordinator_rank, world_size),
        config,
        network_index,
        shared_params,
        other_work: IndexMap::new(),
      });
    }
  }

  if options.yarn {
    if !distributions.iter().any(|d| d.kind == ServiceKind::Hdfs) {
      warn!("yarn enabled but its prerequisite HDFS distribution is absent");
    }
    let config = find_unit(&ServiceKind::Yarn).cloned().ok_or_else(|| {
      anyhow::anyhow!("yarn enabled but no matching unit manifest was loaded")
    })?;
    let shared_params = inherited_hdfs_params(&distributions);
    distributions.push(Distribution {
      kind: ServiceKind::Yarn,
      depends_on: depends_on_present(&ServiceKind::Yarn, &distributions),
      ranks: config.runs_on.ranks(coordinator_rank, world_size),
      config,
      network_index,
      shared_params,
      other_work: IndexMap::new(),
    });
  }

  // Both client distributions are pinned to rank 0 regardless of
  // `runs_on`, per §4.4 step 6.
  distributions.push(Distribution {
    kind: ServiceKind::LocalClient,
    depends_on: depends_on_present(&ServiceKind::LocalClient, &distributions),
    ranks: RunsOn::CoordinatorOnly.ranks(coordinator_rank, world_size),
    config: local_client_config(options.work_script.as_deref()),
    network_index,
    shared_params: IndexMap::new(),
    other_work: IndexMap::new(),
  });
  distributions.push(Distribution {
    kind: ServiceKind::RemoteClient,
    depends_on: depends_on_present(
      &ServiceKind::RemoteClient,
      &distributions,
    ),
    ranks: RunsOn::CoordinatorOnly.ranks(coordinator_rank, world_size),
    config: remote_client_config(),
    network_index,
    shared_params: IndexMap::new(),
    other_work: IndexMap::new(),
  });

  let distributions = Plan::topologically_sorted(distributions)?;
  Ok(Plan { distributions })
}

fn inherited_hdfs_params(
  distributions: &[Distribution],
) -> IndexMap<String, ParamValue> {
  distributions
    .iter()
    .find(|d| d.kind == ServiceKind::Hdfs)
    .map(|d| d.shared_params.clone())
    .unwrap_or_default()
}

fn local_client_config(work_script: Option<&std::path::Path>) -> ServiceConfig {
  // tmux is tried first, falling back to screen (§4.5 supplement) — both
  // pre_start_cmd/start_cmd/stop_cmd now run under a shell, so `||` and
  // redirection are safe here.
  let start_cmd = match work_script {
    Some(p) => format!(
      "tmux new-session -d -s launcher-work 'source $basedir/env.sh; {}' || screen -dmS launcher-work sh -c 'source $basedir/env.sh; {}'",
      p.display(),
      p.display()
    ),
    None => "true".to_string(),
  };
  ServiceConfig::new(
    "local-client".to_string(),
    RunsOn::CoordinatorOnly,
    None,
    start_cmd,
    "tmux kill-session -t launcher-work 2>/dev/null || screen -S launcher-work -X quit".to_string(),
    IndexMap::new(),
  )
}

fn remote_client_config() -> ServiceConfig {
  ServiceConfig::new(
    "remote-client".to_string(),
    RunsOn::CoordinatorOnly,
    None,
    "launcher-sshd --basedir $basedir --pidfile $basedir/sshd.pid".to_string(),
    "launcher-sshd --stop --pidfile $basedir/sshd.pid".to_string(),
    IndexMap::new(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use cluster_client::entities::node::NodeDescriptor;
  use std::collections::BTreeMap;

  fn node(fqdn: &str) -> NodeDescriptor {
    NodeDescriptor {
      fqdn: fqdn.to_string(),
      pid: 100,
      cpu_affinity: vec![0],
      memory_map: BTreeMap::new(),
      topology: vec![0],
      interfaces: vec![],
    }
  }

  fn unit(name: &str) -> ServiceConfig {
    ServiceConfig::new(
      name.to_string(),
      RunsOn::All,
      None,
      "start".to_string(),
      "stop".to_string(),
      IndexMap::new(),
    )
  }

  #[test]
  fn scenario_a_single_rank_hdfs_only() {
    let nodes = vec![node("node0")];
    let services = vec![unit("hdfs")];
    let options = PlannerOptions { hdfs: true, ..Default::default() };
    let p = plan(&services, &nodes, &options).unwrap();
    assert!(p.distributions.iter().any(|d| d.kind == ServiceKind::Hdfs));
    assert!(
      p.distributions.iter().any(|d| d.kind == ServiceKind::LocalClient)
    );
    assert!(
      p.distributions.iter().any(|d| d.kind == ServiceKind::RemoteClient)
    );
  }

  #[test]
  fn scenario_b_three_ranks_hdfs_and_mapred() {
    let nodes = vec![node("node0"), node("node1"), node("node2")];
    let services = vec![unit("hdfs"), unit("mapred")];
    let options =
      PlannerOptions { hdfs: true, mapred: true, ..Default::default() };
    let p = plan(&services, &nodes, &options).unwrap();

    let hdfs_pos =
      p.distributions.iter().position(|d| d.kind == ServiceKind::Hdfs).unwrap();
    let mapred = p
      .distributions
      .iter()
      .find(|d| d.kind == ServiceKind::Mapred)
      .unwrap();
    let mapred_pos =
      p.distributions.iter().position(|d| d.kind == ServiceKind::Mapred).unwrap();
    assert!(hdfs_pos < mapred_pos);
    assert_eq!(
      mapred.shared_params.get("fs.default.name").unwrap().canonical_string,
      "hdfs://node0:8020"
    );
    assert_eq!(
      mapred.shared_params.get("mapred.job.tracker").unwrap().canonical_string,
      "node0:9000"
    );
  }

  #[test]
  fn scenario_c_hbase_flips_other_work_on_hdfs() {
    let nodes = vec![node("n0"), node("n1"), node("n2"), node("n3")];
    let services = vec![unit("hdfs"), unit("hbase"), unit("mapred")];
    let options = PlannerOptions {
      hdfs: true,
      hbase: true,
      mapred: true,
      ..Default::default()
    };
    let p = plan(&services, &nodes, &options).unwrap();

    let hdfs = p.distributions.iter().find(|d| d.kind == ServiceKind::Hdfs).unwrap();
    assert_eq!(hdfs.other_work.get("Hbase"), Some(&true));

    let hbase_pos =
      p.distributions.iter().position(|d| d.kind == ServiceKind::Hbase).unwrap();
    let mapred_pos =
      p.distributions.iter().position(|d| d.kind == ServiceKind::Mapred).unwrap();
    assert!(hbase_pos < mapred_pos);
  }

  #[test]
  fn mapred_without_hdfs_is_skipped_not_fatal() {
    let nodes = vec![node("n0")];
    let services = vec![unit("mapred")];
    let options = PlannerOptions { mapred: true, ..Default::default() };
    let p = plan(&services, &nodes, &options).unwrap();
    assert!(!p.distributions.iter().any(|d| d.kind == ServiceKind::Mapred));
  }

  #[test]
  fn missing_unit_manifest_for_enabled_service_is_an_error() {
    let nodes = vec![node("n0")];
    let services: Vec<ServiceConfig> = vec![];
    let options = PlannerOptions { hdfs: true, ..Default::default() };
    assert!(plan(&services, &nodes, &options).is_err());
  }
}
