//! Joining the overlay through a configured seed peer.
//!
//! The procedure sends HELLO and GET_PEERS to the seed, then waits
//! with a linearly growing backoff for the engine to learn its first
//! peer. Five unanswered rounds end the procedure; the node then runs
//! standalone but stays reachable, so it can still be pulled into the
//! overlay by somebody else.

use {
  crate::{
    config::{Config, Mode},
    pow,
    transport::Transport,
    wire::{Envelope, GetPeers, Hello, Payload},
  },
  std::net::SocketAddr,
  tokio::{
    sync::watch,
    time::{timeout, Duration},
  },
  tracing::{debug, info, warn},
};

/// Terminal state of the join procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
  /// At least one peer was learned within the attempt budget.
  Joined,

  /// Every attempt went unanswered.
  Standalone,
}

const MAX_ATTEMPTS: u32 = 5;

/// Backoff after attempt `n` is `n * BACKOFF_STEP`: 0.5s, 1.0s, ...
const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Runs the join procedure against the configured seed.
///
/// When the overlay requires an admission proof, the puzzle search
/// runs on the blocking pool first; the engine keeps servicing
/// datagrams and timers for however long the search takes.
pub(crate) async fn join(
  config: Config,
  node_id: String,
  local_addr: SocketAddr,
  seed: SocketAddr,
  transport: Transport,
  mut peer_count: watch::Receiver<usize>,
) -> Outcome {
  let proof = match config.pow_k {
    0 => None,
    k => {
      let id = node_id.clone();
      match tokio::task::spawn_blocking(move || pow::compute(&id, k)).await {
        Ok(proof) => {
          debug!("admission puzzle solved with nonce {}", proof.nonce);
          Some(proof)
        }
        Err(err) => {
          warn!("admission puzzle worker failed: {err}");
          None
        }
      }
    }
  };

  let mut capabilities = vec!["gossip".to_owned()];
  if config.mode == Mode::Hybrid {
    capabilities.push("pull".to_owned());
  }

  for attempt in 1..=MAX_ATTEMPTS {
    info!("joining via {seed}, attempt {attempt}/{MAX_ATTEMPTS}");

    let hello = Envelope::control(
      &node_id,
      local_addr,
      Payload::Hello(Hello {
        capabilities: capabilities.clone(),
        pow: proof.clone(),
      }),
    );
    transport.send(&hello, seed);

    let request = Envelope::control(
      &node_id,
      local_addr,
      Payload::GetPeers(GetPeers {
        max_peers: config.peer_limit,
      }),
    );
    transport.send(&request, seed);

    match timeout(BACKOFF_STEP * attempt, first_peer(&mut peer_count)).await {
      Ok(true) => {
        info!("joined the overlay after {attempt} attempt(s)");
        return Outcome::Joined;
      }
      // the engine is gone, there is nothing left to join for
      Ok(false) => return Outcome::Standalone,
      Err(_) => debug!("bootstrap attempt {attempt} timed out"),
    }
  }

  warn!("no peers learned via {seed}, continuing standalone");
  Outcome::Standalone
}

/// Resolves true once the membership view becomes non-empty, false if
/// the publishing engine went away.
async fn first_peer(peer_count: &mut watch::Receiver<usize>) -> bool {
  loop {
    if *peer_count.borrow() > 0 {
      return true;
    }
    if peer_count.changed().await.is_err() {
      return false;
    }
  }
}
