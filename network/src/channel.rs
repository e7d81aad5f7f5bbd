use {
  std::task::{Context, Poll},
  tokio::sync::mpsc::{
    unbounded_channel,
    UnboundedReceiver,
    UnboundedSender,
  },
};

/// In-process channel used to move commands and events between the
/// engine and its embedding host.
///
/// Thin wrapper keeping both halves together until a component claims
/// one of them. Sending never blocks; a send after the receiving half
/// is gone is silently dropped, which only happens during shutdown.
pub struct Channel<T> {
  tx: UnboundedSender<T>,
  rx: UnboundedReceiver<T>,
}

impl<T> Channel<T> {
  pub fn new() -> Self {
    let (tx, rx) = unbounded_channel();
    Self { tx, rx }
  }

  pub fn sender(&self) -> UnboundedSender<T> {
    self.tx.clone()
  }

  pub fn split(self) -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    (self.tx, self.rx)
  }

  pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
    self.rx.poll_recv(cx)
  }
}
