//! Bounded record of disseminated messages.
//!
//! Two insertion-ordered views share one capacity: the seen set, used
//! only for deduplication, and the message store, which retains full
//! messages so IWANT requests can be answered. Both evict their oldest
//! entry on overflow. Stored ids are always a subset of seen ids.

use {
  crate::wire::Envelope,
  std::collections::{HashMap, HashSet, VecDeque},
  tracing::trace,
};

/// Maximum number of message ids remembered for deduplication, and
/// the maximum number of full messages retained for reconciliation.
pub const SEEN_CAP: usize = 10_000;

pub struct History {
  seen: HashSet<String>,
  seen_order: VecDeque<String>,
  store: HashMap<String, Envelope>,
  store_order: VecDeque<String>,
  cap: usize,
}

impl History {
  pub fn new() -> Self {
    Self::with_capacity(SEEN_CAP)
  }

  pub fn with_capacity(cap: usize) -> Self {
    Self {
      seen: HashSet::new(),
      seen_order: VecDeque::new(),
      store: HashMap::new(),
      store_order: VecDeque::new(),
      cap,
    }
  }

  /// Records a message id. Returns true if the id is new, false if it
  /// was already seen. The oldest id is evicted on overflow.
  pub fn mark_seen(&mut self, id: &str) -> bool {
    if self.seen.contains(id) {
      return false;
    }

    if self.seen.len() == self.cap {
      if let Some(oldest) = self.seen_order.pop_front() {
        self.seen.remove(&oldest);
        trace!("dedup capacity reached, forgetting {oldest}");

        // retention follows the dedup insertion order, so an id
        // falling out of the seen set can only be the oldest stored
        // one; evicting it here keeps stored ids a subset of seen ids
        if self.store_order.front() == Some(&oldest) {
          self.store_order.pop_front();
          self.store.remove(&oldest);
        }
      }
    }

    self.seen.insert(id.to_owned());
    self.seen_order.push_back(id.to_owned());
    true
  }

  pub fn contains(&self, id: &str) -> bool {
    self.seen.contains(id)
  }

  /// Retains the full message for later reconciliation. The id must
  /// have been marked seen first.
  pub fn store(&mut self, msg: Envelope) {
    debug_assert!(self.seen.contains(&msg.msg_id));

    if self.store.contains_key(&msg.msg_id) {
      return;
    }

    if self.store.len() == self.cap {
      if let Some(oldest) = self.store_order.pop_front() {
        self.store.remove(&oldest);
      }
    }

    self.store_order.push_back(msg.msg_id.clone());
    self.store.insert(msg.msg_id.clone(), msg);
  }

  /// The stored message, if still retained.
  pub fn fetch(&self, id: &str) -> Option<&Envelope> {
    self.store.get(id)
  }

  /// Up to `max` most recently stored ids, oldest first.
  pub fn recent_ids(&self, max: usize) -> Vec<String> {
    let skip = self.store_order.len().saturating_sub(max);
    self.store_order.iter().skip(skip).cloned().collect()
  }

  pub fn seen_len(&self) -> usize {
    self.seen.len()
  }

  pub fn store_len(&self) -> usize {
    self.store.len()
  }
}

impl Default for History {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::wire::{Gossip, Payload, VERSION},
  };

  fn gossip(id: &str) -> Envelope {
    Envelope {
      version: VERSION,
      msg_id: id.to_owned(),
      sender_id: "f00d".repeat(8),
      sender_addr: "127.0.0.1:9000".parse().unwrap(),
      timestamp_ms: 0,
      ttl: 8,
      payload: Payload::Gossip(Gossip {
        topic: "t".into(),
        data: "d".into(),
        origin_id: "f00d".repeat(8),
        origin_timestamp_ms: 0,
      }),
    }
  }

  #[test]
  fn first_sighting_is_new_second_is_not() {
    let mut history = History::new();
    assert!(history.mark_seen("a"));
    assert!(!history.mark_seen("a"));
    assert!(history.contains("a"));
  }

  #[test]
  fn stored_messages_can_be_fetched() {
    let mut history = History::new();
    history.mark_seen("a");
    history.store(gossip("a"));
    assert_eq!(history.fetch("a").unwrap().msg_id, "a");
    assert!(history.fetch("b").is_none());
  }

  #[test]
  fn twenty_thousand_inserts_retain_the_newest_ten_thousand() {
    let mut history = History::new();
    for i in 0..20_000 {
      let id = format!("{i:032x}");
      assert!(history.mark_seen(&id));
      history.store(gossip(&id));
    }

    assert_eq!(history.seen_len(), SEEN_CAP);
    assert_eq!(history.store_len(), SEEN_CAP);

    // the newest half survives, the oldest half is gone
    assert!(history.contains(&format!("{:032x}", 19_999)));
    assert!(history.fetch(&format!("{:032x}", 10_000)).is_some());
    assert!(!history.contains(&format!("{:032x}", 9_999)));
    assert!(history.fetch(&format!("{:032x}", 0)).is_none());
  }

  #[test]
  fn stored_ids_stay_subset_of_seen_ids() {
    let mut history = History::with_capacity(4);

    // ids marked seen but never stored age the seen set faster than
    // the store; eviction must still keep the subset relation
    for i in 0..16 {
      let id = format!("{i:x}");
      history.mark_seen(&id);
      if i % 2 == 0 {
        history.store(gossip(&id));
      }
    }

    for id in history.store.keys() {
      assert!(history.seen.contains(id), "{id} stored but not seen");
    }
    assert!(history.store_len() <= history.seen_len());
  }

  #[test]
  fn recent_ids_returns_the_tail_in_order() {
    let mut history = History::new();
    for i in 0..10 {
      let id = format!("{i:x}");
      history.mark_seen(&id);
      history.store(gossip(&id));
    }

    assert_eq!(history.recent_ids(3), vec!["7", "8", "9"]);
    assert_eq!(history.recent_ids(100).len(), 10);
  }
}
