//! Encoding and decoding of wire messages, one JSON object per
//! datagram. The codec validates structural invariants (version,
//! known message type, required fields); semantically empty payloads
//! are the handlers' concern.

use {
  crate::wire::{
    Envelope,
    GetPeers,
    Gossip,
    Hello,
    Ihave,
    Iwant,
    Payload,
    PeersList,
    Ping,
    Pong,
    VERSION,
  },
  bytes::Bytes,
  serde::{Deserialize, Serialize},
  serde_json::Value,
  std::net::SocketAddr,
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
  /// Not JSON, or JSON that does not shape into the envelope or the
  /// payload expected for its type.
  #[error("malformed message: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("unsupported protocol version {0}")]
  UnsupportedVersion(u32),

  #[error("unknown message type {0:?}")]
  UnknownType(String),
}

impl Error {
  /// Short stable name used as a metrics label.
  pub fn label(&self) -> &'static str {
    match self {
      Error::Malformed(_) => "malformed",
      Error::UnsupportedVersion(_) => "version",
      Error::UnknownType(_) => "unknown_type",
    }
  }
}

/// The envelope as it appears on the wire, with the payload still
/// untyped. Unknown extra fields are tolerated for forward
/// compatibility.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
  version: u32,
  msg_id: String,
  msg_type: String,
  sender_id: String,
  sender_addr: SocketAddr,
  timestamp_ms: u64,
  ttl: u32,
  payload: Value,
}

/// Encodes a message into a single datagram payload.
pub fn encode(msg: &Envelope) -> Bytes {
  let payload = match &msg.payload {
    Payload::Hello(p) => serde_json::to_value(p),
    Payload::GetPeers(p) => serde_json::to_value(p),
    Payload::PeersList(p) => serde_json::to_value(p),
    Payload::Gossip(p) => serde_json::to_value(p),
    Payload::Ping(p) => serde_json::to_value(p),
    Payload::Pong(p) => serde_json::to_value(p),
    Payload::Ihave(p) => serde_json::to_value(p),
    Payload::Iwant(p) => serde_json::to_value(p),
  }
  .expect("wire payloads always serialize");

  let raw = RawEnvelope {
    version: msg.version,
    msg_id: msg.msg_id.clone(),
    msg_type: msg.payload.kind().to_owned(),
    sender_id: msg.sender_id.clone(),
    sender_addr: msg.sender_addr,
    timestamp_ms: msg.timestamp_ms,
    ttl: msg.ttl,
    payload,
  };

  serde_json::to_vec(&raw)
    .expect("wire envelopes always serialize")
    .into()
}

/// Decodes one datagram into a typed message.
pub fn decode(datagram: &[u8]) -> Result<Envelope, Error> {
  let raw: RawEnvelope = serde_json::from_slice(datagram)?;

  if raw.version != VERSION {
    return Err(Error::UnsupportedVersion(raw.version));
  }

  let payload = match raw.msg_type.as_str() {
    "HELLO" => Payload::Hello(serde_json::from_value::<Hello>(raw.payload)?),
    "GET_PEERS" => {
      Payload::GetPeers(serde_json::from_value::<GetPeers>(raw.payload)?)
    }
    "PEERS_LIST" => {
      Payload::PeersList(serde_json::from_value::<PeersList>(raw.payload)?)
    }
    "GOSSIP" => Payload::Gossip(serde_json::from_value::<Gossip>(raw.payload)?),
    "PING" => Payload::Ping(serde_json::from_value::<Ping>(raw.payload)?),
    "PONG" => Payload::Pong(serde_json::from_value::<Pong>(raw.payload)?),
    "IHAVE" => Payload::Ihave(serde_json::from_value::<Ihave>(raw.payload)?),
    "IWANT" => Payload::Iwant(serde_json::from_value::<Iwant>(raw.payload)?),
    other => return Err(Error::UnknownType(other.to_owned())),
  };

  Ok(Envelope {
    version: raw.version,
    msg_id: raw.msg_id,
    sender_id: raw.sender_id,
    sender_addr: raw.sender_addr,
    timestamp_ms: raw.timestamp_ms,
    ttl: raw.ttl,
    payload,
  })
}
