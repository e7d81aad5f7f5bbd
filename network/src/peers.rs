//! Bounded membership view with liveness tracking.
//!
//! Peers are keyed by their listening address. The table never grows
//! past its limit: inserting into a full table evicts the entry that
//! has been silent the longest. Random sampling drives who hears a
//! gossip round; its randomness is what gives the dissemination its
//! redundancy, so selection always goes through the per-node seeded
//! rng and never through a deterministic order.

use {
  crate::wire::PeerInfo,
  metrics::gauge,
  rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng},
  std::{
    collections::BTreeMap,
    net::SocketAddr,
    time::{Duration, Instant},
  },
  tracing::debug,
};

/// Everything known about one remote member of the overlay.
#[derive(Debug, Clone)]
pub struct PeerRecord {
  /// Stable identity, unknown until the first message from the peer.
  pub node_id: Option<String>,

  pub addr: SocketAddr,

  /// Monotonic instant of the most recent inbound message from this
  /// peer. Drives both LRU eviction and timeout expiry.
  pub last_seen: Instant,
}

pub struct PeerTable {
  /// Ordered so that iteration, and with it seeded sampling, is
  /// reproducible across runs.
  entries: BTreeMap<SocketAddr, PeerRecord>,
  limit: usize,
  rng: StdRng,
}

impl PeerTable {
  pub fn new(limit: usize, seed: u64) -> Self {
    Self {
      entries: BTreeMap::new(),
      limit,
      rng: StdRng::seed_from_u64(seed),
    }
  }

  /// Inserts or refreshes a peer, stamping `last_seen` with now.
  /// Inserting into a full table evicts the least recently seen
  /// entry. Refreshing an existing address never evicts.
  pub fn touch(&mut self, addr: SocketAddr, node_id: Option<&str>) {
    let now = Instant::now();

    if let Some(entry) = self.entries.get_mut(&addr) {
      entry.last_seen = now;
      if let Some(id) = node_id {
        entry.node_id = Some(id.to_owned());
      }
      return;
    }

    if self.entries.len() >= self.limit {
      if let Some(lru) = self
        .entries
        .values()
        .min_by_key(|peer| peer.last_seen)
        .map(|peer| peer.addr)
      {
        debug!("membership view full, evicting {lru}");
        self.entries.remove(&lru);
      }
    }

    self.entries.insert(
      addr,
      PeerRecord {
        node_id: node_id.map(str::to_owned),
        addr,
        last_seen: now,
      },
    );
    gauge!("known_peers", self.entries.len() as f64);
  }

  pub fn remove(&mut self, addr: &SocketAddr) {
    self.entries.remove(addr);
    gauge!("known_peers", self.entries.len() as f64);
  }

  pub fn contains(&self, addr: &SocketAddr) -> bool {
    self.entries.contains_key(addr)
  }

  /// Uniform selection without replacement of up to `k` peers whose
  /// address is not in `exclude`.
  pub fn sample(&mut self, k: usize, exclude: &[SocketAddr]) -> Vec<SocketAddr> {
    self
      .entries
      .keys()
      .copied()
      .filter(|addr| !exclude.contains(addr))
      .choose_multiple(&mut self.rng, k)
  }

  /// Up to `max` identified peers for a PEERS_LIST. Entries whose
  /// identity is still unknown cannot be advertised and are skipped.
  pub fn snapshot(&self, max: usize) -> Vec<PeerInfo> {
    self
      .entries
      .values()
      .filter_map(|peer| {
        peer.node_id.as_ref().map(|node_id| PeerInfo {
          node_id: node_id.clone(),
          addr: peer.addr,
        })
      })
      .take(max)
      .collect()
  }

  /// Removes every peer that has been silent longer than `timeout`
  /// and returns their addresses.
  pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<SocketAddr> {
    let dead: Vec<SocketAddr> = self
      .entries
      .values()
      .filter(|peer| now.duration_since(peer.last_seen) > timeout)
      .map(|peer| peer.addr)
      .collect();

    for addr in &dead {
      debug!("peer {addr} timed out");
      self.entries.remove(addr);
    }

    if !dead.is_empty() {
      gauge!("known_peers", self.entries.len() as f64);
    }
    dead
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
  }

  #[test]
  fn touch_inserts_and_refreshes() {
    let mut table = PeerTable::new(4, 42);
    table.touch(addr(1), None);
    assert!(table.contains(&addr(1)));
    assert_eq!(table.len(), 1);

    // identity learned later sticks
    table.touch(addr(1), Some("aa"));
    assert_eq!(table.len(), 1);
    assert_eq!(table.snapshot(10).len(), 1);
  }

  #[test]
  fn full_table_evicts_least_recently_seen() {
    let mut table = PeerTable::new(3, 42);
    table.touch(addr(1), Some("a"));
    std::thread::sleep(Duration::from_millis(5));
    table.touch(addr(2), Some("b"));
    std::thread::sleep(Duration::from_millis(5));
    table.touch(addr(3), Some("c"));
    std::thread::sleep(Duration::from_millis(5));

    // refresh the oldest so the second oldest becomes the victim
    table.touch(addr(1), None);
    table.touch(addr(4), Some("d"));

    assert_eq!(table.len(), 3);
    assert!(table.contains(&addr(1)));
    assert!(!table.contains(&addr(2)));
    assert!(table.contains(&addr(4)));
  }

  #[test]
  fn sample_respects_bounds_and_exclusions() {
    let mut table = PeerTable::new(10, 42);
    for port in 1..=5 {
      table.touch(addr(port), None);
    }

    assert_eq!(table.sample(3, &[]).len(), 3);
    assert_eq!(table.sample(10, &[]).len(), 5);

    let excluded = [addr(1), addr(2)];
    let picked = table.sample(10, &excluded);
    assert_eq!(picked.len(), 3);
    assert!(picked.iter().all(|a| !excluded.contains(a)));

    let all = [addr(1), addr(2), addr(3), addr(4), addr(5)];
    assert!(table.sample(3, &all).is_empty());
  }

  #[test]
  fn sampling_is_reproducible_for_a_fixed_seed() {
    let mut first = PeerTable::new(10, 7);
    let mut second = PeerTable::new(10, 7);
    for port in 1..=8 {
      first.touch(addr(port), None);
      second.touch(addr(port), None);
    }

    for _ in 0..16 {
      assert_eq!(first.sample(3, &[]), second.sample(3, &[]));
    }
  }

  #[test]
  fn expire_removes_only_silent_peers() {
    let mut table = PeerTable::new(10, 42);
    table.touch(addr(1), None);
    table.touch(addr(2), None);

    let dead = table.expire(
      Instant::now() + Duration::from_secs(10),
      Duration::from_secs(6),
    );
    assert_eq!(dead.len(), 2);
    assert!(table.is_empty());

    table.touch(addr(3), None);
    assert!(table
      .expire(Instant::now(), Duration::from_secs(6))
      .is_empty());
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn snapshot_caps_and_skips_unidentified_peers() {
    let mut table = PeerTable::new(10, 42);
    table.touch(addr(1), Some("a"));
    table.touch(addr(2), None);
    table.touch(addr(3), Some("c"));

    assert_eq!(table.snapshot(10).len(), 2);
    assert_eq!(table.snapshot(1).len(), 1);
  }
}
