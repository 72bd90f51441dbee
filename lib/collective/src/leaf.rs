use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::error::CollectiveError;
use crate::wire::{self, GroupId, WireMessage};

/// One rank's connection to the hub. Every collective op this rank issues
/// is sent over `writer_tx` and its `*Done` reply is delivered through a
/// one-shot registered here, demultiplexed by the reader task.
pub(crate) struct LeafConn {
  writer_tx: mpsc::UnboundedSender<WireMessage>,
  pending_group_ops: Mutex<HashMap<GroupId, oneshot::Sender<WireMessage>>>,
  pending_subgroup: Mutex<HashMap<Vec<usize>, oneshot::Sender<WireMessage>>>,
}

impl LeafConn {
  pub(crate) async fn connect(
    addr: &str,
    rank: usize,
  ) -> Result<std::sync::Arc<Self>, CollectiveError> {
    let stream =
      TcpStream::connect(addr).await.map_err(|source| {
        CollectiveError::Connect { addr: addr.to_string(), source }
      })?;
    let mut conn = wire::framed(stream);
    wire::send(&mut conn, &WireMessage::Hello { rank }).await?;

    let (mut sink, mut stream) = conn.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WireMessage>();

    let this = std::sync::Arc::new(Self {
      writer_tx,
      pending_group_ops: Mutex::new(HashMap::new()),
      pending_subgroup: Mutex::new(HashMap::new()),
    });

    let reader_this = this.clone();
    tokio::spawn(async move {
      while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else { break };
        let Ok(message) = serde_json::from_slice::<WireMessage>(&frame)
        else {
          break;
        };
        reader_this.deliver(message);
      }
    });

    tokio::spawn(async move {
      while let Some(message) = writer_rx.recv().await {
        let Ok(bytes) = serde_json::to_vec(&message) else { continue };
        if sink.send(bytes.into()).await.is_err() {
          break;
        }
      }
    });

    Ok(this)
  }

  fn deliver(&self, message: WireMessage) {
    match &message {
      WireMessage::BarrierDone { group }
      | WireMessage::BroadcastDone { group, .. }
      | WireMessage::AllToAllDone { group, .. } => {
        if let Some(tx) =
          self.pending_group_ops.lock().unwrap().remove(group)
        {
          let _ = tx.send(message);
        }
      }
      WireMessage::SubgroupDone { ranks, .. } => {
        if let Some(tx) =
          self.pending_subgroup.lock().unwrap().remove(ranks)
        {
          let _ = tx.send(message);
        }
      }
      _ => {}
    }
  }

  fn send(&self, message: WireMessage) -> Result<(), CollectiveError> {
    self
      .writer_tx
      .send(message)
      .map_err(|_| CollectiveError::PeerDisconnected)
  }

  pub(crate) async fn barrier(
    &self,
    group: GroupId,
    tag: String,
  ) -> Result<(), CollectiveError> {
    let (tx, rx) = oneshot::channel();
    self.pending_group_ops.lock().unwrap().insert(group, tx);
    self.send(WireMessage::Barrier { group, tag })?;
    match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
      WireMessage::BarrierDone { .. } => Ok(()),
      other => Err(CollectiveError::Protocol(format!(
        "expected BarrierDone, got {other:?}"
      ))),
    }
  }

  pub(crate) async fn broadcast(
    &self,
    group: GroupId,
    root: usize,
    value: Option<Vec<u8>>,
  ) -> Result<Vec<u8>, CollectiveError> {
    let (tx, rx) = oneshot::channel();
    self.pending_group_ops.lock().unwrap().insert(group, tx);
    self.send(WireMessage::Broadcast { group, root, value })?;
    match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
      WireMessage::BroadcastDone { value, .. } => Ok(value),
      other => Err(CollectiveError::Protocol(format!(
        "expected BroadcastDone, got {other:?}"
      ))),
    }
  }

  pub(crate) async fn all_to_all(
    &self,
    group: GroupId,
    value: Vec<u8>,
  ) -> Result<Vec<Vec<u8>>, CollectiveError> {
    let (tx, rx) = oneshot::channel();
    self.pending_group_ops.lock().unwrap().insert(group, tx);
    self.send(WireMessage::AllToAll { group, value })?;
    match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
      WireMessage::AllToAllDone { values, .. } => Ok(values),
      other => Err(CollectiveError::Protocol(format!(
        "expected AllToAllDone, got {other:?}"
      ))),
    }
  }

  pub(crate) async fn subgroup(
    &self,
    ranks: Vec<usize>,
  ) -> Result<Option<GroupId>, CollectiveError> {
    let (tx, rx) = oneshot::channel();
    self.pending_subgroup.lock().unwrap().insert(ranks.clone(), tx);
    self.send(WireMessage::Subgroup { ranks })?;
    match rx.await.map_err(|_| CollectiveError::PeerDisconnected)? {
      WireMessage::SubgroupDone { group, .. } => Ok(group),
      other => Err(CollectiveError::Protocol(format!(
        "expected SubgroupDone, got {other:?}"
      ))),
    }
  }

  pub(crate) fn disconnect(&self, group: GroupId) -> Result<(), CollectiveError> {
    self.send(WireMessage::Disconnect { group })
  }
}
