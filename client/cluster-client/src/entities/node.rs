use std::collections::BTreeMap;

use ipnetwork::Ipv4Network;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One local network interface, as published by the Node Probe (C1).
///
/// Field order matches `spec.md`'s `(hostname, ipv4, devname, prefix_bits)`
/// tuple.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Interface {
  pub hostname: String,
  pub ipv4: std::net::Ipv4Addr,
  pub devname: String,
  pub prefix_bits: u8,
}

impl Interface {
  pub fn network(&self) -> anyhow::Result<Ipv4Network> {
    Ok(Ipv4Network::new(self.ipv4, self.prefix_bits)?)
  }
}

/// Per-rank snapshot collected once at startup by the Node Probe (C1) and
/// replicated to every rank via the Collective Transport's `all_to_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
  pub fqdn: String,
  pub pid: u32,
  /// Core indices currently usable by this process (its CPU affinity mask),
  /// not merely the configured core count.
  pub cpu_affinity: Vec<usize>,
  /// Byte quantities keyed by the lowercase `/proc/meminfo` label
  /// (e.g. "memtotal", "memfree").
  pub memory_map: BTreeMap<String, u64>,
  /// Opaque topology coordinates; `[0]` unless the host exposes something
  /// richer (defaults to plain, flat topology).
  pub topology: Vec<u32>,
  /// Pre-sorted by preference; see [`sort_interfaces_by_preference`].
  pub interfaces: Vec<Interface>,
}

impl NodeDescriptor {
  pub fn core_count(&self) -> usize {
    self.cpu_affinity.len()
  }

  /// Highest-preference local interface whose `ip/prefix` CIDR contains
  /// `ip`. Used to decide which interface to bind the coordinator's
  /// collective-transport listener to.
  pub fn interface_reaching(
    &self,
    ip: std::net::Ipv4Addr,
  ) -> Option<&Interface> {
    self.interfaces.iter().find(|intf| {
      intf
        .network()
        .map(|net| net.contains(ip))
        .unwrap_or(false)
    })
  }
}

/// Replicated across every rank after the initial `all_to_all` exchange.
/// Invariant: every rank holds an element-wise-equal table
/// (`len(table) == world_size`).
pub type NodeTable = Vec<NodeDescriptor>;

fn ib_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^ib\d+$").expect("valid regex"))
}

fn vlan_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^.*\.\d+$").expect("valid regex"))
}

fn loopback_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^lo\d*$").expect("valid regex"))
}

/// Apply the interface-preference ordering invariant from `spec.md` §3:
///
/// 1. any device matching `ib\d+` first
/// 2. then non-VLAN, non-loopback devices
/// 3. then remaining non-loopback devices
/// 4. then everything else
///
/// Within each tier, interfaces are ordered alphabetically by hostname
/// (callers are expected to pass interfaces already carrying that ordering,
/// which this function preserves via a stable sort).
pub fn sort_interfaces_by_preference(
  mut interfaces: Vec<Interface>,
) -> Vec<Interface> {
  interfaces.sort_by(|a, b| a.hostname.cmp(&b.hostname));

  let mut ordered = Vec::with_capacity(interfaces.len());
  let mut push_tier = |pred: &dyn Fn(&Interface) -> bool,
                        ordered: &mut Vec<Interface>| {
    for intf in &interfaces {
      if pred(intf) && !ordered.contains(intf) {
        ordered.push(intf.clone());
      }
    }
  };

  push_tier(&|i| ib_regex().is_match(&i.devname), &mut ordered);
  push_tier(
    &|i| {
      !vlan_regex().is_match(&i.devname)
        && !loopback_regex().is_match(&i.devname)
    },
    &mut ordered,
  );
  push_tier(&|i| !loopback_regex().is_match(&i.devname), &mut ordered);
  push_tier(&|_| true, &mut ordered);

  ordered
}

#[cfg(test)]
mod tests {
  use super::*;

  fn intf(hostname: &str, devname: &str) -> Interface {
    Interface {
      hostname: hostname.to_string(),
      ipv4: "10.0.0.1".parse().unwrap(),
      devname: devname.to_string(),
      prefix_bits: 24,
    }
  }

  #[test]
  fn ib_device_comes_first() {
    let input = vec![intf("b-host", "eth0"), intf("a-host", "ib0")];
    let sorted = sort_interfaces_by_preference(input);
    assert_eq!(sorted[0].devname, "ib0");
    assert_eq!(sorted[1].devname, "eth0");
  }

  #[test]
  fn vlan_ranks_below_plain_nonloopback() {
    let input =
      vec![intf("a-host", "eth0.100"), intf("a-host", "eth1")];
    let sorted = sort_interfaces_by_preference(input);
    assert_eq!(sorted[0].devname, "eth1");
    assert_eq!(sorted[1].devname, "eth0.100");
  }

  #[test]
  fn loopback_ranks_last() {
    let input = vec![intf("a-host", "lo"), intf("a-host", "eth0")];
    let sorted = sort_interfaces_by_preference(input);
    assert_eq!(sorted[0].devname, "eth0");
    assert_eq!(sorted[1].devname, "lo");
  }

  #[test]
  fn ordering_is_deterministic_across_repeated_calls() {
    let input = vec![
      intf("c-host", "eth1"),
      intf("a-host", "ib1"),
      intf("b-host", "lo"),
    ];
    let first = sort_interfaces_by_preference(input.clone());
    let second = sort_interfaces_by_preference(input);
    assert_eq!(first, second);
  }

  #[test]
  fn interface_reaching_finds_containing_cidr() {
    let node = NodeDescriptor {
      fqdn: "n0".into(),
      pid: 1,
      cpu_affinity: vec![0],
      memory_map: Default::default(),
      topology: vec![0],
      interfaces: vec![Interface {
        hostname: "n0".into(),
        ipv4: "192.168.1.5".parse().unwrap(),
        devname: "eth0".into(),
        prefix_bits: 24,
      }],
    };
    let found =
      node.interface_reaching("192.168.1.200".parse().unwrap());
    assert!(found.is_some());
    let missed =
      node.interface_reaching("10.0.0.1".parse().unwrap());
    assert!(missed.is_none());
  }
}
