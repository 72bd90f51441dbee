use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::CollectiveError;
use crate::group::GroupHandle;
use crate::hub::{self, Incoming, Reply};
use crate::leaf::LeafConn;
use crate::wire::WireMessage;

enum Mode {
  Hub {
    engine_tx: mpsc::UnboundedSender<Incoming>,
    _engine_task: JoinHandle<()>,
  },
  Leaf {
    conn: Arc<LeafConn>,
  },
}

/// TCP hub-and-spoke implementation of [`crate::Transport`]: rank 0 listens
/// and relays every collective op; every other rank makes one outbound
/// connection to rank 0 at startup and never talks to any other leaf
/// directly.
pub struct TcpTransport {
  world_rank: usize,
  world_size: usize,
  mode: Mode,
}

impl TcpTransport {
  /// Binds `addr` and blocks until all `world_size - 1` leaves have
  /// connected. Called on rank 0 only.
  pub async fn bind(
    addr: &str,
    world_size: usize,
  ) -> Result<Self, CollectiveError> {
    let listener =
      TcpListener::bind(addr).await.map_err(|source| {
        CollectiveError::Bind { addr: addr.to_string(), source }
      })?;

    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let run_engine_tx = engine_tx.clone();
    let engine_task = tokio::spawn(async move {
      if let Err(e) =
        hub::run(listener, world_size, run_engine_tx, engine_rx, ready_tx).await
      {
        tracing::error!(error = %e, "collective transport hub exited");
      }
    });

    ready_rx.await.map_err(|_| {
      CollectiveError::Protocol(
        "hub engine exited before all leaves connected".into(),
      )
    })?;

    Ok(Self {
      world_rank: 0,
      world_size,
      mode: Mode::Hub { engine_tx, _engine_task: engine_task },
    })
  }

  /// Connects to the hub at `coordinator_addr`. Called on every rank != 0.
  pub async fn connect(
    coordinator_addr: &str,
    world_rank: usize,
    world_size: usize,
  ) -> Result<Self, CollectiveError> {
    let conn = LeafConn::connect(coordinator_addr, world_rank).await?;
    Ok(Self { world_rank, world_size, mode: Mode::Leaf { conn } })
  }

  async fn call_barrier(
    &self,
    group: crate::wire::GroupId,
    tag: String,
  ) -> Result<(), CollectiveError> {
    match &self.mode {
      Mode::Hub { engine_tx, .. } => {
        let (tx, rx) = oneshot::channel();
        engine_tx
          .send(Incoming {
            origin: self.world_rank,
            message: WireMessage::Barrier { group, tag },
            reply: Reply::Local(tx),
          })
          .map_err(|_| CollectiveError::PeerDisconnected)?;
        rx.await.map_err(|_| CollectiveError::PeerDisconnected)?;
        Ok(())
      }
      Mode::Leaf { conn } => conn.barrier(group, tag).await,
    }
  }

  async fn call_broadcast(
    &self,
    group: crate::wire::GroupId,
    root: usize,
    value: Option<Vec<u8>>,
  ) -> Result<Vec<u8>, CollectiveError> {
    match &self.mode {
      Mode::Hub { engine_tx, .. } => {
        let (tx, rx) = oneshot::channel();
        engine_tx
          .send(Incoming {
            origin: self.world_rank,
            message: WireMessage::Broadcast { group, root, value },
            reply: Reply::Local(tx),
          })
          .map_err(|_| CollectiveError::PeerDisconnected)?;
        match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
          WireMessage::BroadcastDone { value, .. } => Ok(value),
          other => Err(CollectiveError::Protocol(format!(
            "expected BroadcastDone, got {other:?}"
          ))),
        }
      }
      Mode::Leaf { conn } => conn.broadcast(group, root, value).await,
    }
  }

  async fn call_all_to_all(
    &self,
    group: crate::wire::GroupId,
    value: Vec<u8>,
  ) -> Result<Vec<Vec<u8>>, CollectiveError> {
    match &self.mode {
      Mode::Hub { engine_tx, .. } => {
        let (tx, rx) = oneshot::channel();
        engine_tx
          .send(Incoming {
            origin: self.world_rank,
            message: WireMessage::AllToAll { group, value },
            reply: Reply::Local(tx),
          })
          .map_err(|_| CollectiveError::PeerDisconnected)?;
        match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
          WireMessage::AllToAllDone { values, .. } => Ok(values),
          other => Err(CollectiveError::Protocol(format!(
            "expected AllToAllDone, got {other:?}"
          ))),
        }
      }
      Mode::Leaf { conn } => conn.all_to_all(group, value).await,
    }
  }

  async fn call_subgroup(
    &self,
    ranks: Vec<usize>,
  ) -> Result<Option<crate::wire::GroupId>, CollectiveError> {
    match &self.mode {
      Mode::Hub { engine_tx, .. } => {
        let (tx, rx) = oneshot::channel();
        engine_tx
          .send(Incoming {
            origin: self.world_rank,
            message: WireMessage::Subgroup { ranks: ranks.clone() },
            reply: Reply::Local(tx),
          })
          .map_err(|_| CollectiveError::PeerDisconnected)?;
        match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
          WireMessage::SubgroupDone { group, .. } => Ok(group),
          other => Err(CollectiveError::Protocol(format!(
            "expected SubgroupDone, got {other:?}"
          ))),
        }
      }
      Mode::Leaf { conn } => conn.subgroup(ranks).await,
    }
  }

  fn call_disconnect(
    &self,
    group: crate::wire::GroupId,
  ) -> Result<(), CollectiveError> {
    match &self.mode {
      Mode::Hub { engine_tx, .. } => engine_tx
        .send(Incoming {
          origin: self.world_rank,
          message: WireMessage::Disconnect { group },
          reply: Reply::Local(oneshot::channel().0),
        })
        .map_err(|_| CollectiveError::PeerDisconnected),
      Mode::Leaf { conn } => conn.disconnect(group),
    }
  }
}

impl crate::Transport for TcpTransport {
  fn world_size(&self) -> usize {
    self.world_size
  }

  fn world_rank(&self) -> usize {
    self.world_rank
  }

  fn world_group(&self) -> GroupHandle {
    GroupHandle::world(self.world_size)
  }

  async fn barrier(
    &self,
    group: &GroupHandle,
    tag: &str,
  ) -> Result<(), CollectiveError> {
    if !group.contains(self.world_rank) {
      return Err(CollectiveError::NotInGroup);
    }
    self.call_barrier(group.id(), tag.to_string()).await
  }

  async fn broadcast_bytes(
    &self,
    group: &GroupHandle,
    root: usize,
    value: Option<Vec<u8>>,
  ) -> Result<Vec<u8>, CollectiveError> {
    if !group.contains(self.world_rank) {
      return Err(CollectiveError::NotInGroup);
    }
    self.call_broadcast(group.id(), root, value).await
  }

  async fn all_to_all_bytes(
    &self,
    group: &GroupHandle,
    value: Vec<u8>,
  ) -> Result<Vec<Vec<u8>>, CollectiveError> {
    if !group.contains(self.world_rank) {
      return Err(CollectiveError::NotInGroup);
    }
    self.call_all_to_all(group.id(), value).await
  }

  async fn subgroup(
    &self,
    ranks: Vec<usize>,
  ) -> Result<Option<GroupHandle>, CollectiveError> {
    let mut sorted = ranks;
    sorted.sort_unstable();
    sorted.dedup();
    let id = self.call_subgroup(sorted.clone()).await?;
    Ok(id.map(|id| GroupHandle { id, ranks: sorted }))
  }

  async fn disconnect(&self, group: GroupHandle) -> Result<(), CollectiveError> {
    self.call_disconnect(group.id())
  }
}
