//! The node's single UDP endpoint.
//!
//! One message per datagram, no segmentation. Sends are non-blocking:
//! a datagram that cannot leave immediately is dropped, which the
//! protocol tolerates the same way it tolerates loss on the wire.
//! Binding is the only fatal transport error; everything after that
//! is logged and survived.

use {
  crate::{
    codec,
    events::{Direction, Event, EventSink},
    wire::Envelope,
  },
  metrics::increment_counter,
  std::{io, net::SocketAddr, sync::Arc},
  tokio::net::UdpSocket,
  tracing::warn,
};

/// Upper bound on accepted datagrams. Far above anything the protocol
/// produces; IHAVE, the largest message, is bounded by `ihave_max_ids`.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Cheap to clone; all clones share the one bound socket.
#[derive(Clone)]
pub(crate) struct Transport {
  socket: Arc<UdpSocket>,
  events: EventSink,
}

impl Transport {
  pub async fn bind(port: u16, events: EventSink) -> io::Result<Self> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    Ok(Self {
      socket: Arc::new(socket),
      events,
    })
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  /// Sends one message to one peer.
  pub fn send(&self, msg: &Envelope, addr: SocketAddr) {
    self.transmit(&codec::encode(msg), msg, addr);
  }

  /// Sends the same message to every target, encoding it once and
  /// reusing the buffer across the whole fanout.
  pub fn fanout(&self, msg: &Envelope, targets: &[SocketAddr]) {
    let bytes = codec::encode(msg);
    for addr in targets {
      self.transmit(&bytes, msg, *addr);
    }
  }

  fn transmit(&self, bytes: &[u8], msg: &Envelope, addr: SocketAddr) {
    match self.socket.try_send_to(bytes, addr) {
      Ok(_) => {
        increment_counter!("datagrams_sent", "type" => msg.kind());
        self.events.emit(Event::observed(Direction::Sent, msg, addr));
      }
      Err(err) => {
        increment_counter!("send_failures");
        warn!("send of {} to {addr} failed: {err}", msg.kind());
      }
    }
  }

  /// Waits for the next datagram.
  pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    self.socket.recv_from(buf).await
  }
}
