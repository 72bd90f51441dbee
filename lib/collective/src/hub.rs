use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::CollectiveError;
use crate::wire::{self, GroupId, WireMessage, WORLD};

/// Where to send a collective op's resolved `*Done` message: back to rank
/// 0's own caller (in-process), or out over a leaf's socket.
pub(crate) enum Reply {
  Local(tokio::sync::oneshot::Sender<WireMessage>),
  Remote(usize),
}

pub(crate) struct Incoming {
  pub origin: usize,
  pub message: WireMessage,
  pub reply: Reply,
}

struct GroupRuntime {
  ranks: Vec<usize>,
  pending: Option<PendingOp>,
}

enum PendingOp {
  Barrier {
    tag: String,
    arrived: Vec<(usize, Reply)>,
  },
  Broadcast {
    value: Option<Vec<u8>>,
    arrived: Vec<(usize, Reply)>,
  },
  AllToAll {
    values: HashMap<usize, Vec<u8>>,
    arrived: Vec<(usize, Reply)>,
  },
}

/// Runs only on rank 0. Owns every group's membership and in-flight
/// collective op, and relays `*Done` replies back to whichever rank is
/// waiting (itself, via [`Reply::Local`], or a leaf, via [`Reply::Remote`]).
struct HubEngine {
  world_size: usize,
  groups: HashMap<GroupId, GroupRuntime>,
  forming: HashMap<Vec<usize>, Vec<(usize, Reply)>>,
  next_group_id: GroupId,
  peer_writers: HashMap<usize, mpsc::UnboundedSender<WireMessage>>,
}

impl HubEngine {
  fn new(world_size: usize) -> Self {
    let mut groups = HashMap::new();
    groups.insert(
      WORLD,
      GroupRuntime {
        ranks: (0..world_size).collect(),
        pending: None,
      },
    );
    Self {
      world_size,
      groups,
      forming: HashMap::new(),
      next_group_id: WORLD + 1,
      peer_writers: HashMap::new(),
    }
  }

  fn register_peer(
    &mut self,
    rank: usize,
    writer: mpsc::UnboundedSender<WireMessage>,
  ) {
    self.peer_writers.insert(rank, writer);
  }

  fn respond(&self, reply: Reply, message: WireMessage) {
    match reply {
      Reply::Local(tx) => {
        let _ = tx.send(message);
      }
      Reply::Remote(rank) => {
        if let Some(tx) = self.peer_writers.get(&rank) {
          let _ = tx.send(message);
        } else {
          warn!(rank, "no writer registered for rank, dropping reply");
        }
      }
    }
  }

  fn handle(&mut self, incoming: Incoming) {
    let Incoming { origin, message, reply } = incoming;
    match message {
      WireMessage::Hello { .. } => {
        warn!("unexpected Hello after handshake, ignoring");
      }
      WireMessage::Barrier { group, tag } => {
        self.on_barrier(group, origin, tag, reply);
      }
      WireMessage::Broadcast { group, root, value } => {
        self.on_broadcast(group, origin, root, value, reply);
      }
      WireMessage::AllToAll { group, value } => {
        self.on_all_to_all(group, origin, value, reply);
      }
      WireMessage::Subgroup { ranks } => {
        self.on_subgroup(ranks, origin, reply);
      }
      WireMessage::Disconnect { group } => {
        self.groups.remove(&group);
        debug!(group, "group disconnected");
      }
      other => {
        warn!(?other, "unexpected *Done message arrived at the hub");
      }
    }
  }

  fn on_barrier(
    &mut self,
    group: GroupId,
    origin: usize,
    tag: String,
    reply: Reply,
  ) {
    let Some(rt) = self.groups.get_mut(&group) else {
      warn!(group, "barrier on unknown group, dropping");
      return;
    };
    if rt.pending.is_none() {
      rt.pending = Some(PendingOp::Barrier { tag, arrived: vec![] });
    }
    let Some(PendingOp::Barrier { arrived, .. }) = &mut rt.pending else {
      warn!(group, "barrier collided with a different in-flight op");
      return;
    };
    arrived.push((origin, reply));

    if arrived.len() == rt.ranks.len() {
      let Some(PendingOp::Barrier { arrived, .. }) = rt.pending.take()
      else {
        unreachable!()
      };
      for (_, reply) in arrived {
        self.respond(reply, WireMessage::BarrierDone { group });
      }
    }
  }

  fn on_broadcast(
    &mut self,
    group: GroupId,
    origin: usize,
    _root: usize,
    value: Option<Vec<u8>>,
    reply: Reply,
  ) {
    let Some(rt) = self.groups.get_mut(&group) else {
      warn!(group, "broadcast on unknown group, dropping");
      return;
    };
    if rt.pending.is_none() {
      rt.pending =
        Some(PendingOp::Broadcast { value: None, arrived: vec![] });
    }
    let Some(PendingOp::Broadcast { value: slot, arrived }) =
      &mut rt.pending
    else {
      warn!(group, "broadcast collided with a different in-flight op");
      return;
    };
    if let Some(v) = value {
      *slot = Some(v);
    }
    arrived.push((origin, reply));

    if arrived.len() == rt.ranks.len() {
      let Some(PendingOp::Broadcast { value, arrived }) = rt.pending.take()
      else {
        unreachable!()
      };
      let value = value.unwrap_or_default();
      for (_, reply) in arrived {
        self.respond(
          reply,
          WireMessage::BroadcastDone { group, value: value.clone() },
        );
      }
    }
  }

  fn on_all_to_all(
    &mut self,
    group: GroupId,
    origin: usize,
    value: Vec<u8>,
    reply: Reply,
  ) {
    let Some(rt) = self.groups.get_mut(&group) else {
      warn!(group, "all_to_all on unknown group, dropping");
      return;
    };
    if rt.pending.is_none() {
      rt.pending = Some(PendingOp::AllToAll {
        values: HashMap::new(),
        arrived: vec![],
      });
    }
    let Some(PendingOp::AllToAll { values, arrived }) = &mut rt.pending
    else {
      warn!(group, "all_to_all collided with a different in-flight op");
      return;
    };
    values.insert(origin, value);
    arrived.push((origin, reply));

    if arrived.len() == rt.ranks.len() {
      let Some(PendingOp::AllToAll { values, arrived }) = rt.pending.take()
      else {
        unreachable!()
      };
      let ordered: Vec<Vec<u8>> = rt
        .ranks
        .iter()
        .map(|r| values.get(r).cloned().unwrap_or_default())
        .collect();
      for (_, reply) in arrived {
        self.respond(
          reply,
          WireMessage::AllToAllDone { group, values: ordered.clone() },
        );
      }
    }
  }

  fn on_subgroup(&mut self, ranks: Vec<usize>, origin: usize, reply: Reply) {
    let arrived = self.forming.entry(ranks.clone()).or_default();
    arrived.push((origin, reply));

    if arrived.len() == self.world_size {
      let arrived = self.forming.remove(&ranks).unwrap();
      let group_id = self.next_group_id;
      self.next_group_id += 1;
      self.groups.insert(
        group_id,
        GroupRuntime { ranks: ranks.clone(), pending: None },
      );
      for (origin, reply) in arrived {
        let group = ranks.contains(&origin).then_some(group_id);
        self.respond(
          reply,
          WireMessage::SubgroupDone { ranks: ranks.clone(), group },
        );
      }
    }
  }
}

/// Accepts `world_size - 1` leaf connections (registering each one's writer
/// with the engine as it arrives), signals `ready_tx` once every leaf is
/// registered, then drives the engine loop until `engine_rx` closes.
pub(crate) async fn run(
  listener: TcpListener,
  world_size: usize,
  engine_tx: mpsc::UnboundedSender<Incoming>,
  mut engine_rx: mpsc::UnboundedReceiver<Incoming>,
  ready_tx: tokio::sync::oneshot::Sender<()>,
) -> Result<(), CollectiveError> {
  let mut engine = HubEngine::new(world_size);
  let expected_leaves = world_size.saturating_sub(1);

  for _ in 0..expected_leaves {
    let (stream, addr) = listener.accept().await.map_err(|source| {
      CollectiveError::Accept { addr: listener_addr(&listener), source }
    })?;
    debug!(%addr, "accepted collective-transport connection");
    let rank = handshake(stream, &mut engine, engine_tx.clone()).await?;
    debug!(rank, "collective-transport leaf registered");
  }

  let _ = ready_tx.send(());

  while let Some(incoming) = engine_rx.recv().await {
    engine.handle(incoming);
  }
  Ok(())
}

fn listener_addr(listener: &TcpListener) -> String {
  listener
    .local_addr()
    .map(|a| a.to_string())
    .unwrap_or_else(|_| "<unknown>".to_string())
}

async fn handshake(
  stream: TcpStream,
  engine: &mut HubEngine,
  engine_tx: mpsc::UnboundedSender<Incoming>,
) -> Result<usize, CollectiveError> {
  let mut conn = wire::framed(stream);
  let hello = wire::recv(&mut conn).await?;
  let WireMessage::Hello { rank } = hello else {
    return Err(CollectiveError::Protocol(format!(
      "expected Hello, got {hello:?}"
    )));
  };

  let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WireMessage>();
  engine.register_peer(rank, writer_tx);

  let (mut sink, mut stream) = conn.split();

  tokio::spawn(async move {
    while let Some(frame) = stream.next().await {
      let Ok(frame) = frame else { break };
      let Ok(message) = serde_json::from_slice::<WireMessage>(&frame)
      else {
        break;
      };
      let incoming = Incoming { origin: rank, message, reply: Reply::Remote(rank) };
      if engine_tx.send(incoming).is_err() {
        break;
      }
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

  Ok(rank)
}
