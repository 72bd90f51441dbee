use thiserror::Error;

/// Errors from the Collective Transport (component C2). Always fatal: a
/// rank that hits one of these aborts rather than retrying, since the
/// ordering guarantee (every member sees collective ops in the same order)
/// cannot be recovered once violated.
#[derive(Debug, Error)]
pub enum CollectiveError {
  #[error("failed to bind collective transport listener on {addr}")]
  Bind {
    addr: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to connect to coordinator at {addr}")]
  Connect {
    addr: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to accept collective-transport connection on {addr}")]
  Accept {
    addr: String,
    #[source]
    source: std::io::Error,
  },

  #[error("collective transport I/O error")]
  Io(#[from] std::io::Error),

  #[error("malformed wire message")]
  Wire(#[from] serde_json::Error),

  #[error("peer disconnected mid-collective")]
  PeerDisconnected,

  #[error("rank is not a member of this group")]
  NotInGroup,

  #[error("protocol violation: {0}")]
  Protocol(String),
}
