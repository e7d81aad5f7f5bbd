//! Observable protocol events.
//!
//! Every datagram the engine sends, accepts or discards is reported as
//! one timestamped record. The stream of those records is the sole
//! contract with external analysis tooling; convergence and overhead
//! metrics are computed entirely by downstream readers, which is why
//! gossip records carry the origin fields needed to reconstruct the
//! dissemination window.

use {
  crate::{
    channel::Channel,
    wire::{self, Envelope, Payload},
  },
  futures::Stream,
  serde::Serialize,
  std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
  },
  tokio::sync::mpsc::UnboundedSender,
};

/// What happened to the datagram this event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
  /// Emitted by this node, one record per target.
  Sent,

  /// Received and accepted. A gossip message produces exactly one
  /// RECV record per node, on its first delivery past deduplication.
  Recv,

  /// Discarded: malformed, unknown type, duplicate gossip or a
  /// rejected admission attempt.
  Drop,
}

/// A timestamped record of one observable protocol action.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
  pub timestamp_ms: u64,
  pub direction: Direction,
  pub msg_type: String,
  pub msg_id: String,
  pub peer_addr: SocketAddr,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub origin_id: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub origin_timestamp_ms: Option<u64>,
}

impl Event {
  /// Describes `msg` as observed on the link to `peer_addr`.
  pub(crate) fn observed(
    direction: Direction,
    msg: &Envelope,
    peer_addr: SocketAddr,
  ) -> Self {
    let (origin_id, origin_timestamp_ms) = match &msg.payload {
      Payload::Gossip(gossip) => {
        (Some(gossip.origin_id.clone()), Some(gossip.origin_timestamp_ms))
      }
      _ => (None, None),
    };

    Self {
      timestamp_ms: wire::now_ms(),
      direction,
      msg_type: msg.kind().to_owned(),
      msg_id: msg.msg_id.clone(),
      peer_addr,
      origin_id,
      origin_timestamp_ms,
    }
  }

  /// Describes a datagram that never decoded into a message.
  pub(crate) fn undecodable(peer_addr: SocketAddr) -> Self {
    Self {
      timestamp_ms: wire::now_ms(),
      direction: Direction::Drop,
      msg_type: "UNKNOWN".to_owned(),
      msg_id: String::new(),
      peer_addr,
      origin_id: None,
      origin_timestamp_ms: None,
    }
  }
}

/// Sending half of the event stream, cloned into every component that
/// observes traffic. One sink per engine instance; sinks are never
/// shared between engines in the same process.
#[derive(Clone)]
pub(crate) struct EventSink {
  tx: UnboundedSender<Event>,
}

impl EventSink {
  pub fn emit(&self, event: Event) {
    let _ = self.tx.send(event);
  }
}

/// Stream of engine events handed to the embedding host.
///
/// Events accumulate while the node runs; take the stream and drain
/// it, or drop it to discard observation for the rest of the run.
pub struct Events {
  inner: Channel<Event>,
}

/// Creates the per-instance sink/stream pair.
pub(crate) fn channel() -> (EventSink, Events) {
  let inner = Channel::new();
  let sink = EventSink {
    tx: inner.sender(),
  };
  (sink, Events { inner })
}

impl Stream for Events {
  type Item = Event;

  fn poll_next(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    self.get_mut().inner.poll_recv(cx)
  }
}
