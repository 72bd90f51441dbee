//! Collective Transport (C2): abstract group-communication primitives —
//! barrier, broadcast-from-root, all-to-all exchange, subgroup formation —
//! implemented over a TCP hub-and-spoke topology. Rank 0 runs the only
//! listener (the "hub"); every other rank makes one outbound connection to
//! it at startup. All ops are relayed through the hub rather than routed
//! peer-to-peer, so the wire protocol stays a single request/response
//! shape regardless of group size.

mod error;
mod group;
mod hub;
mod leaf;
mod tcp;
mod wire;

pub use error::CollectiveError;
pub use group::GroupHandle;
pub use tcp::TcpTransport;
pub use wire::{GroupId, WORLD};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Group-communication primitives every rank-process collective op goes
/// through. All ops that touch a group validate the caller is a member
/// before talking to the transport; callers excluded from a subgroup never
/// get a [`GroupHandle`] to call these with in the first place.
pub trait Transport: Send + Sync {
  fn world_size(&self) -> usize;
  fn world_rank(&self) -> usize;
  fn world_group(&self) -> GroupHandle;

  fn barrier(
    &self,
    group: &GroupHandle,
    tag: &str,
  ) -> impl Future<Output = Result<(), CollectiveError>> + Send;

  fn broadcast_bytes(
    &self,
    group: &GroupHandle,
    root: usize,
    value: Option<Vec<u8>>,
  ) -> impl Future<Output = Result<Vec<u8>, CollectiveError>> + Send;

  fn all_to_all_bytes(
    &self,
    group: &GroupHandle,
    value: Vec<u8>,
  ) -> impl Future<Output = Result<Vec<Vec<u8>>, CollectiveError>> + Send;

  /// `ranks` need not be sorted or deduplicated; the transport normalizes
  /// it before collectively resolving a `GroupId`, so every member ends up
  /// with a `GroupHandle` whose rank order matches across the group.
  fn subgroup(
    &self,
    ranks: Vec<usize>,
  ) -> impl Future<Output = Result<Option<GroupHandle>, CollectiveError>> + Send;

  fn disconnect(
    &self,
    group: GroupHandle,
  ) -> impl Future<Output = Result<(), CollectiveError>> + Send;
}

/// Typed convenience wrappers over the raw byte-oriented [`Transport`]
/// methods, serializing with `serde_json` (matching every other wire
/// format this crate family uses).
pub trait TransportExt: Transport {
  fn broadcast<T: Serialize + DeserializeOwned + Send>(
    &self,
    group: &GroupHandle,
    root: usize,
    value: Option<&T>,
  ) -> impl Future<Output = Result<T, CollectiveError>> + Send {
    async move {
      let bytes = match value {
        Some(v) => Some(serde_json::to_vec(v)?),
        None => None,
      };
      let out = self.broadcast_bytes(group, root, bytes).await?;
      Ok(serde_json::from_slice(&out)?)
    }
  }

  fn all_to_all<T: Serialize + DeserializeOwned + Send>(
    &self,
    group: &GroupHandle,
    value: &T,
  ) -> impl Future<Output = Result<Vec<T>, CollectiveError>> + Send {
    async move {
      let bytes = serde_json::to_vec(value)?;
      let out = self.all_to_all_bytes(group, bytes).await?;
      out
        .into_iter()
        .map(|b| Ok(serde_json::from_slice(&b)?))
        .collect()
    }
  }
}

impl<T: Transport + ?Sized> TransportExt for T {}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::TcpListener as StdTcpListener;

  #[test]
  fn world_group_spans_every_rank() {
    let group = GroupHandle::world(4);
    assert_eq!(group.ranks(), &[0, 1, 2, 3]);
    assert!(group.contains(2));
    assert!(!group.contains(4));
  }

  fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
      .unwrap()
      .local_addr()
      .unwrap()
      .port()
  }

  #[tokio::test]
  async fn three_ranks_barrier_then_broadcast_then_all_to_all() {
    let port = free_port();
    let addr = format!("127.0.0.1:{port}");
    let world_size = 3;

    let hub_addr = addr.clone();
    let hub_task =
      tokio::spawn(
        async move { TcpTransport::bind(&hub_addr, world_size).await },
      );
    // give the listener a moment to bind before leaves dial in
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let leaf1_addr = addr.clone();
    let leaf1_task = tokio::spawn(async move {
      TcpTransport::connect(&leaf1_addr, 1, world_size).await
    });
    let leaf2_addr = addr.clone();
    let leaf2_task = tokio::spawn(async move {
      TcpTransport::connect(&leaf2_addr, 2, world_size).await
    });

    let rank0 = hub_task.await.unwrap().unwrap();
    let rank1 = leaf1_task.await.unwrap().unwrap();
    let rank2 = leaf2_task.await.unwrap().unwrap();

    let world0 = rank0.world_group();
    let world1 = rank1.world_group();
    let world2 = rank2.world_group();

    let (r0, r1, r2) = tokio::join!(
      rank0.barrier(&world0, "startup"),
      rank1.barrier(&world1, "startup"),
      rank2.barrier(&world2, "startup"),
    );
    r0.unwrap();
    r1.unwrap();
    r2.unwrap();

    let (b0, b1, b2) = tokio::join!(
      rank0.broadcast::<String>(&world0, 0, Some(&"plan-v1".to_string())),
      rank1.broadcast::<String>(&world1, 0, None),
      rank2.broadcast::<String>(&world2, 0, None),
    );
    assert_eq!(b0.unwrap(), "plan-v1");
    assert_eq!(b1.unwrap(), "plan-v1");
    assert_eq!(b2.unwrap(), "plan-v1");

    let (a0, a1, a2) = tokio::join!(
      rank0.all_to_all(&world0, &"from-0".to_string()),
      rank1.all_to_all(&world1, &"from-1".to_string()),
      rank2.all_to_all(&world2, &"from-2".to_string()),
    );
    let a0 = a0.unwrap();
    assert_eq!(a0, vec!["from-0", "from-1", "from-2"]);
    assert_eq!(a1.unwrap(), a0);
    assert_eq!(a2.unwrap(), a0);
  }

  #[tokio::test]
  async fn subgroup_excludes_non_members() {
    let port = free_port();
    let addr = format!("127.0.0.1:{port}");
    let world_size = 3;

    let hub_addr = addr.clone();
    let hub_task =
      tokio::spawn(
        async move { TcpTransport::bind(&hub_addr, world_size).await },
      );
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let leaf1_addr = addr.clone();
    let leaf1_task = tokio::spawn(async move {
      TcpTransport::connect(&leaf1_addr, 1, world_size).await
    });
    let leaf2_addr = addr.clone();
    let leaf2_task = tokio::spawn(async move {
      TcpTransport::connect(&leaf2_addr, 2, world_size).await
    });

    let rank0 = hub_task.await.unwrap().unwrap();
    let rank1 = leaf1_task.await.unwrap().unwrap();
    let rank2 = leaf2_task.await.unwrap().unwrap();

    let (g0, g1, g2) = tokio::join!(
      rank0.subgroup(vec![0, 1]),
      rank1.subgroup(vec![0, 1]),
      rank2.subgroup(vec![0, 1]),
    );
    assert!(g0.unwrap().is_some());
    assert!(g1.unwrap().is_some());
    assert!(g2.unwrap().is_none());
  }
}
