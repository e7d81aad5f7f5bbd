//! Defines the wire protocol messages exchanged between nodes.
//!
//! Every message travels as one UTF-8 JSON datagram: a fixed envelope
//! carrying the immediate sender's identity plus a type-specific
//! payload. Gossip payloads keep their origin fields unchanged across
//! forwards; only the envelope sender, timestamp and ttl are rewritten
//! on every hop.

use {
  crate::pow::Proof,
  rand::RngCore,
  serde::{Deserialize, Serialize},
  std::{
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
  },
};

/// Protocol version spoken by this implementation. Datagrams with a
/// different version are discarded by the codec.
pub const VERSION: u32 = 1;

/// Member entry advertised in a PEERS_LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
  pub node_id: String,
  pub addr: SocketAddr,
}

/// First message a joining node sends to a seed. Carries the solved
/// admission puzzle when the overlay requires one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
  pub capabilities: Vec<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pow: Option<Proof>,
}

/// Asks the receiver for a sample of its membership view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPeers {
  pub max_peers: usize,
}

/// Response to GET_PEERS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeersList {
  pub peers: Vec<PeerInfo>,
}

/// An application payload under epidemic dissemination.
///
/// `origin_id` and `origin_timestamp_ms` identify the node that
/// originated the message and never change while it propagates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gossip {
  pub topic: String,
  pub data: String,
  pub origin_id: String,
  pub origin_timestamp_ms: u64,
}

/// Liveness probe. Each probe carries a fresh `ping_id` so the
/// matching PONG can be paired with its send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
  pub ping_id: String,
  pub seq: u64,
}

/// Echo of a PING.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
  pub ping_id: String,
  pub seq: u64,
}

/// Advertisement of recently stored message ids (hybrid mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ihave {
  pub ids: Vec<String>,
  pub max_ids: usize,
}

/// Request for messages the advertisement revealed as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iwant {
  pub ids: Vec<String>,
}

/// Type-specific part of a wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  Hello(Hello),
  GetPeers(GetPeers),
  PeersList(PeersList),
  Gossip(Gossip),
  Ping(Ping),
  Pong(Pong),
  Ihave(Ihave),
  Iwant(Iwant),
}

impl Payload {
  /// Wire name of the message type.
  pub fn kind(&self) -> &'static str {
    match self {
      Payload::Hello(_) => "HELLO",
      Payload::GetPeers(_) => "GET_PEERS",
      Payload::PeersList(_) => "PEERS_LIST",
      Payload::Gossip(_) => "GOSSIP",
      Payload::Ping(_) => "PING",
      Payload::Pong(_) => "PONG",
      Payload::Ihave(_) => "IHAVE",
      Payload::Iwant(_) => "IWANT",
    }
  }
}

/// One wire message: envelope fields plus the typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
  pub version: u32,

  /// Opaque unique identifier minted once by the originator and
  /// preserved across gossip forwards.
  pub msg_id: String,

  /// Identity of the immediate sender, not the origin.
  pub sender_id: String,

  /// Listening address of the immediate sender.
  pub sender_addr: SocketAddr,

  /// Wall clock milliseconds at send time.
  pub timestamp_ms: u64,

  /// Remaining hop budget. Zero means the receiver must not forward.
  pub ttl: u32,

  pub payload: Payload,
}

impl Envelope {
  /// Builds a single-hop message. Control traffic is never forwarded,
  /// so it carries a ttl of 1.
  pub fn control(
    sender_id: &str,
    sender_addr: SocketAddr,
    payload: Payload,
  ) -> Self {
    Self {
      version: VERSION,
      msg_id: random_id(),
      sender_id: sender_id.to_owned(),
      sender_addr,
      timestamp_ms: now_ms(),
      ttl: 1,
      payload,
    }
  }

  pub fn kind(&self) -> &'static str {
    self.payload.kind()
  }
}

/// Mints a fresh opaque 128-bit identifier rendered as 32 hex chars.
///
/// Identifiers intentionally do not come from the seeded sampling rng:
/// nodes configured with the same seed would otherwise mint colliding
/// message ids.
pub fn random_id() -> String {
  let mut bytes = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut bytes);
  hex::encode(bytes)
}

/// Wall clock milliseconds since the unix epoch, used for all wire
/// timestamps. Internal scheduling never uses this clock.
pub fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .expect("system clock before unix epoch")
    .as_millis() as u64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn random_ids_are_32_hex_chars() {
    let id = random_id();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn random_ids_do_not_repeat() {
    let ids: std::collections::HashSet<_> =
      (0..1000).map(|_| random_id()).collect();
    assert_eq!(ids.len(), 1000);
  }
}
