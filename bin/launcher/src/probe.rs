//! Node Probe (C1): enumerates local attributes once at startup and
//! publishes them as a [`NodeDescriptor`]. Individual interrogation
//! failures (a bad `/proc/meminfo` line, an interface ipnetwork reports
//! but that has no usable address) are logged and skipped — the
//! descriptor is published with whatever was obtained, never fatal.

use std::collections::BTreeMap;
use std::mem::MaybeUninit;

use cluster_client::entities::node::{
  Interface, NodeDescriptor, sort_interfaces_by_preference,
};
use sysinfo::Networks;
use tracing::warn;

use crate::state::local_fqdn;

/// Probes this host and returns its descriptor. Pure with respect to the
/// local machine, repeatable.
pub fn probe() -> NodeDescriptor {
  NodeDescriptor {
    fqdn: local_fqdn(),
    pid: std::process::id(),
    cpu_affinity: cpu_affinity(),
    memory_map: memory_map(),
    topology: vec![0],
    interfaces: interfaces(),
  }
}

fn cpu_affinity() -> Vec<usize> {
  unsafe {
    let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
    libc::CPU_ZERO(&mut set);
    let ret = libc::sched_getaffinity(
      0,
      std::mem::size_of::<libc::cpu_set_t>(),
      &mut set,
    );
    if ret != 0 {
      warn!(
        error = %std::io::Error::last_os_error(),
        "sched_getaffinity failed, publishing empty cpu_affinity"
      );
      return Vec::new();
    }
    (0..libc::CPU_SETSIZE as usize)
      .filter(|&i| libc::CPU_ISSET(i, &set))
      .collect()
  }
}

/// Parses `/proc/meminfo`-equivalent byte quantities. Lines that don't
/// parse cleanly are logged and skipped; the kB → byte conversion assumes
/// the canonical `Label:  <n> kB` shape `/proc/meminfo` always uses.
fn memory_map() -> BTreeMap<String, u64> {
  let text = match std::fs::read_to_string("/proc/meminfo") {
    Ok(t) => t,
    Err(e) => {
      warn!(error = %e, "failed to read /proc/meminfo, publishing empty memory_map");
      return BTreeMap::new();
    }
  };

  let mut map = BTreeMap::new();
  for line in text.lines() {
    match parse_meminfo_line(line) {
      Some((label, bytes)) => {
        map.insert(label, bytes);
      }
      None => warn!(line, "could not parse /proc/meminfo line, skipping"),
    }
  }
  map
}

fn parse_meminfo_line(line: &str) -> Option<(String, u64)> {
  let (label, rest) = line.split_once(':')?;
  let mut fields = rest.split_whitespace();
  let value: u64 = fields.next()?.parse().ok()?;
  let unit = fields.next().unwrap_or("kB");
  let bytes = match unit.to_ascii_lowercase().as_str() {
    "kb" => value.saturating_mul(1024),
    "mb" => value.saturating_mul(1024 * 1024),
    "b" | "" => value,
    _ => value.saturating_mul(1024),
  };
  Some((label.to_ascii_lowercase(), bytes))
}

fn interfaces() -> Vec<Interface> {
  let fqdn = local_fqdn();
  let networks = Networks::new_with_refreshed_list();
  let mut raw = Vec::new();

  for (devname, data) in &networks {
    for ip_network in data.ip_networks() {
      let std::net::IpAddr::V4(ipv4) = ip_network.addr else {
        continue;
      };
      raw.push(Interface {
        hostname: fqdn.clone(),
        ipv4,
        devname: devname.clone(),
        prefix_bits: ip_network.prefix,
      });
    }
  }

  sort_interfaces_by_preference(raw)
}
