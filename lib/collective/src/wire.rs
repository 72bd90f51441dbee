use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::CollectiveError;

pub type GroupId = u32;

/// The group every rank belongs to from process start; [`GroupId`]s minted
/// by `subgroup` are always greater than this.
pub const WORLD: GroupId = 0;

/// Messages relayed through the hub (rank 0). Every collective op a rank
/// issues maps to one `*Submit`-shaped variant sent to the hub and one
/// `*Done`-shaped variant the hub sends back once every member of the
/// target group has submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
  /// First message a leaf sends after connecting, identifying its rank.
  Hello { rank: usize },

  Barrier { group: GroupId, tag: String },
  BarrierDone { group: GroupId },

  Broadcast {
    group: GroupId,
    root: usize,
    /// `Some` only on the submission from `root`.
    value: Option<Vec<u8>>,
  },
  BroadcastDone { group: GroupId, value: Vec<u8> },

  AllToAll { group: GroupId, value: Vec<u8> },
  /// Indexed by position within the group's member list, ascending rank.
  AllToAllDone { group: GroupId, values: Vec<Vec<u8>> },

  /// Collectively requested by every world rank; `ranks` must be identical
  /// across all submitters for a given formation round.
  Subgroup { ranks: Vec<usize> },
  /// `None` when the receiving rank was not in `ranks`. `ranks` echoes the
  /// request so the leaf can correlate it before a `GroupId` exists.
  SubgroupDone { ranks: Vec<usize>, group: Option<GroupId> },

  Disconnect { group: GroupId },
}

pub(crate) type Conn = Framed<TcpStream, LengthDelimitedCodec>;

pub(crate) fn framed(stream: TcpStream) -> Conn {
  Framed::new(stream, LengthDelimitedCodec::new())
}

pub(crate) async fn send(
  conn: &mut Conn,
  message: &WireMessage,
) -> Result<(), CollectiveError> {
  let bytes = serde_json::to_vec(message)?;
  conn.send(bytes.into()).await?;
  Ok(())
}

pub(crate) async fn recv(
  conn: &mut Conn,
) -> Result<WireMessage, CollectiveError> {
  let frame = conn
    .next()
    .await
    .ok_or(CollectiveError::PeerDisconnected)??;
  Ok(serde_json::from_slice(&frame)?)
}
