use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entities::manifest::ServiceConfig;

/// The well-known service kinds the bundle manifest's `[Config]` `modules`
/// list may name, plus the two synthetic client kinds and an escape hatch
/// for anything else a unit manifest declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
  Hdfs,
  Mapred,
  Hbase,
  Yarn,
  LocalClient,
  RemoteClient,
  Generic(String),
}

impl ServiceKind {
  pub fn parse(name: &str) -> Self {
    match name.to_ascii_lowercase().as_str() {
      "hdfs" => ServiceKind::Hdfs,
      "mapred" | "mapreduce" => ServiceKind::Mapred,
      "hbase" => ServiceKind::Hbase,
      "yarn" => ServiceKind::Yarn,
      "localclient" | "local_client" => ServiceKind::LocalClient,
      "remoteclient" | "remote_client" => ServiceKind::RemoteClient,
      other => ServiceKind::Generic(other.to_string()),
    }
  }

  /// The services each kind implicitly depends on (e.g. `Mapred`/`Hbase`/
  /// `Yarn` all need `Hdfs` up first). `Generic` services carry no implicit
  /// dependency; they only depend on what the bundle manifest orders ahead
  /// of them.
  pub fn implicit_dependencies(&self) -> Vec<ServiceKind> {
    match self {
      ServiceKind::Mapred | ServiceKind::Hbase | ServiceKind::Yarn => {
        vec![ServiceKind::Hdfs]
      }
      ServiceKind::LocalClient | ServiceKind::RemoteClient => {
        vec![ServiceKind::Hdfs]
      }
      _ => vec![],
    }
  }
}

/// A resolved parameter value surfaced to operators/tests: the canonical
/// string a template placeholder resolved to, tagged with its kind and a
/// short note on where the value came from (for the plan's audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamValue {
  pub kind: ParamKind,
  pub canonical_string: String,
  pub provenance_note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
  Literal,
  HostDerived,
  RankDerived,
  Inherited,
}

/// One service's resolved placement plus its explicit dependency edges,
/// the unit the Distribution Planner (C5) emits for each module named by
/// the bundle manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
  pub kind: ServiceKind,
  pub config: ServiceConfig,
  pub depends_on: Vec<ServiceKind>,
  pub network_index: usize,
  /// World ranks this distribution's subgroup is formed from, computed
  /// once at plan time from `config.runs_on`. Every rank still calls
  /// `subgroup()` with this list, members and non-members alike.
  pub ranks: Vec<usize>,
  /// Values reflecting only upstream distributions already emitted at the
  /// time this one was planned (no forward references).
  pub shared_params: IndexMap<String, ParamValue>,
  /// `other_work.<ServiceName> = true` records that a peer service is
  /// co-active on the same ranks, set on already-emitted distributions by
  /// a later one (e.g. HBase flips this on HDFS once it joins the plan).
  pub other_work: IndexMap<String, bool>,
}

/// The complete, ordered plan the coordinator broadcasts to every rank.
/// `distributions` is already topologically sorted by `depends_on` so the
/// executor can walk it start-to-finish without re-deriving order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
  pub distributions: Vec<Distribution>,
}

impl Plan {
  /// Stable topological sort over `depends_on` edges (Kahn's algorithm),
  /// falling back to manifest order among services with no ordering
  /// constraint between them.
  pub fn topologically_sorted(
    mut distributions: Vec<Distribution>,
  ) -> anyhow::Result<Vec<Distribution>> {
    let mut sorted = Vec::with_capacity(distributions.len());
    let mut remaining = distributions.clone();
    distributions.clear();

    while !remaining.is_empty() {
      let placed_kinds: std::collections::HashSet<&ServiceKind> =
        sorted.iter().map(|d: &Distribution| &d.kind).collect();

      let ready_index = remaining.iter().position(|d| {
        d.depends_on.iter().all(|dep| placed_kinds.contains(dep))
      });

      match ready_index {
        Some(idx) => sorted.push(remaining.remove(idx)),
        None => {
          anyhow::bail!(
            "distribution plan has a dependency cycle among: {:?}",
            remaining.iter().map(|d| &d.kind).collect::<Vec<_>>()
          );
        }
      }
    }

    Ok(sorted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::manifest::RunsOn;
  use indexmap::IndexMap;

  fn dist(name: &str, kind: ServiceKind, depends_on: Vec<ServiceKind>) -> Distribution {
    Distribution {
      kind,
      config: ServiceConfig::new(
        name.to_string(),
        RunsOn::All,
        None,
        "start".to_string(),
        "stop".to_string(),
        IndexMap::new(),
      ),
      depends_on,
      network_index: 0,
      ranks: vec![0],
      shared_params: IndexMap::new(),
      other_work: IndexMap::new(),
    }
  }

  #[test]
  fn hdfs_orders_before_its_dependents() {
    let input = vec![
      dist("yarn", ServiceKind::Yarn, vec![ServiceKind::Hdfs]),
      dist("hdfs", ServiceKind::Hdfs, vec![]),
      dist("mapred", ServiceKind::Mapred, vec![ServiceKind::Hdfs]),
    ];
    let sorted = Plan::topologically_sorted(input).unwrap();
    let hdfs_pos = sorted.iter().position(|d| d.kind == ServiceKind::Hdfs).unwrap();
    let yarn_pos = sorted.iter().position(|d| d.kind == ServiceKind::Yarn).unwrap();
    let mapred_pos =
      sorted.iter().position(|d| d.kind == ServiceKind::Mapred).unwrap();
    assert!(hdfs_pos < yarn_pos);
    assert!(hdfs_pos < mapred_pos);
  }

  #[test]
  fn cycle_is_rejected() {
    let input = vec![
      dist("a", ServiceKind::Generic("a".into()), vec![ServiceKind::Generic("b".into())]),
      dist("b", ServiceKind::Generic("b".into()), vec![ServiceKind::Generic("a".into())]),
    ];
    assert!(Plan::topologically_sorted(input).is_err());
  }

  #[test]
  fn service_kind_parse_is_case_insensitive() {
    assert_eq!(ServiceKind::parse("HDFS"), ServiceKind::Hdfs);
    assert_eq!(ServiceKind::parse("YARN"), ServiceKind::Yarn);
    assert_eq!(
      ServiceKind::parse("custom-thing"),
      ServiceKind::Generic("custom-thing".to_string())
    );
  }
}
