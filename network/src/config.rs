use std::{net::SocketAddr, str::FromStr, time::Duration};

/// Dissemination strategy of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// Forward gossip to a random subset of peers and nothing else.
  Push,

  /// Push, plus a periodic IHAVE/IWANT exchange that lets peers
  /// pull messages the push wave missed.
  Hybrid,
}

impl FromStr for Mode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "push" => Ok(Mode::Push),
      "hybrid" => Ok(Mode::Hybrid),
      other => Err(format!("unknown mode {other:?}, expected push or hybrid")),
    }
  }
}

/// Engine configuration. All values are read once at startup and
/// never change for the lifetime of a node.
#[derive(Debug, Clone)]
pub struct Config {
  /// UDP port the node binds its single datagram endpoint to.
  pub port: u16,

  /// Address of a known member used to join the overlay. A node
  /// without a bootstrap address is its own seed and waits to be
  /// contacted.
  pub bootstrap: Option<SocketAddr>,

  /// Number of peers selected per gossip forward, liveness round
  /// and IHAVE advertisement.
  pub fanout: usize,

  /// Initial hop budget of gossip originated by this node.
  pub ttl: u32,

  /// Maximum number of peer records kept in the membership view.
  pub peer_limit: usize,

  /// How often the liveness loop pings sampled peers.
  pub ping_interval: Duration,

  /// Silence threshold after which a peer is removed from the view.
  pub peer_timeout: Duration,

  /// Seed of the rng driving peer selection. Fixing it makes a
  /// simulation run reproducible.
  pub seed: u64,

  /// Push-only or hybrid push-pull dissemination.
  pub mode: Mode,

  /// How often the pull loop advertises stored message ids.
  /// Only used in [`Mode::Hybrid`].
  pub pull_interval: Duration,

  /// Maximum number of message ids carried by one IHAVE.
  pub ihave_max_ids: usize,

  /// Required number of leading hex zeros in the admission puzzle.
  /// Zero disables admission control.
  pub pow_k: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      port: 8000,
      bootstrap: None,
      fanout: 3,
      ttl: 8,
      peer_limit: 20,
      ping_interval: Duration::from_secs(2),
      peer_timeout: Duration::from_secs(6),
      seed: 42,
      mode: Mode::Push,
      pull_interval: Duration::from_secs(2),
      ihave_max_ids: 32,
      pow_k: 0,
    }
  }
}
