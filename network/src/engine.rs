//! The protocol engine proper.
//!
//! One engine task owns every piece of protocol state: membership
//! view, dedup history, pending liveness probes and the rng driving
//! peer selection. Concurrency is cooperative; the run loop suspends
//! only while waiting for a datagram, a timer or a host command, and
//! inbound handlers perform bounded synchronous work with nothing but
//! non-blocking sends. This gives a per-node total order over all
//! state mutations.

use {
  crate::{
    codec,
    config::{Config, Mode},
    events::{Direction, Event, EventSink},
    history::History,
    peers::PeerTable,
    pow,
    transport::{Transport, MAX_DATAGRAM_SIZE},
    wire::{
      self,
      Envelope,
      GetPeers,
      Gossip,
      Hello,
      Ihave,
      Iwant,
      Payload,
      PeerInfo,
      PeersList,
      Ping,
      Pong,
    },
  },
  metrics::{gauge, increment_counter},
  std::{collections::HashMap, net::SocketAddr, time::Instant},
  tokio::sync::{mpsc::UnboundedReceiver, oneshot, watch},
  tracing::{debug, info, trace},
};

/// Commands accepted by the engine from its embedding host.
pub(crate) enum Command {
  /// Inject a new application payload for dissemination.
  Originate { topic: String, data: String },

  /// Ask for a snapshot of the current membership view.
  Peers(oneshot::Sender<Vec<PeerInfo>>),

  /// Stop the run loop.
  Shutdown,
}

/// An outstanding liveness probe, keyed by its ping id in the
/// engine's pending map.
struct PingProbe {
  sent_at: Instant,
  seq: u64,
}

pub(crate) struct Engine {
  config: Config,
  node_id: String,

  /// The address this node advertises as `sender_addr`.
  addr: SocketAddr,

  transport: Transport,
  peers: PeerTable,
  history: History,
  pending_pings: HashMap<String, PingProbe>,
  ping_seq: u64,
  events: EventSink,

  /// Published on every membership change; the bootstrap task watches
  /// it to learn when the first peer arrived.
  peer_count: watch::Sender<usize>,
}

impl Engine {
  pub fn new(
    config: Config,
    node_id: String,
    addr: SocketAddr,
    transport: Transport,
    events: EventSink,
    peer_count: watch::Sender<usize>,
  ) -> Self {
    Self {
      peers: PeerTable::new(config.peer_limit, config.seed),
      history: History::new(),
      pending_pings: HashMap::new(),
      ping_seq: 0,
      config,
      node_id,
      addr,
      transport,
      events,
      peer_count,
    }
  }

  /// Drives the engine until shutdown. This future is the single
  /// scheduling context for all protocol state.
  pub async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
    let transport = self.transport.clone();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut liveness = tokio::time::interval(self.config.ping_interval);
    let mut pull = tokio::time::interval(self.config.pull_interval);

    loop {
      tokio::select! {
        inbound = transport.recv(&mut buf) => match inbound {
          Ok((len, from)) => self.dispatch(&buf[..len], from),
          Err(err) => debug!("recv error: {err}"),
        },

        _ = liveness.tick() => self.liveness_round(),

        _ = pull.tick(), if self.config.mode == Mode::Hybrid => {
          self.pull_round()
        }

        command = commands.recv() => match command {
          Some(Command::Originate { topic, data }) => {
            self.originate(topic, data)
          }
          Some(Command::Peers(reply)) => {
            let _ = reply.send(self.peers.snapshot(self.config.peer_limit));
          }
          Some(Command::Shutdown) | None => break,
        },
      }
    }

    info!("engine of node {} stopped", self.node_id);
  }
}

// inbound path
impl Engine {
  /// Routes one datagram: decode, admit, refresh liveness, handle.
  /// A datagram that fails any structural check is discarded and
  /// counted; a single bad message never fails the node.
  fn dispatch(&mut self, datagram: &[u8], from: SocketAddr) {
    let msg = match codec::decode(datagram) {
      Ok(msg) => msg,
      Err(err) => {
        increment_counter!("dropped_datagrams", "reason" => err.label());
        debug!("dropping datagram from {from}: {err}");
        self.events.emit(Event::undecodable(from));
        return;
      }
    };

    // With a nonzero difficulty only a HELLO carrying a valid proof
    // may introduce an unknown sender into the membership view.
    // Responses from the configured seed are trusted introductions,
    // otherwise a joining node could never learn its first peer.
    let known = self.peers.contains(&msg.sender_addr);
    let may_introduce = match &msg.payload {
      Payload::Hello(hello) => {
        if !self.admit(hello, &msg.sender_id) {
          increment_counter!("dropped_datagrams", "reason" => "pow");
          self.events.emit(Event::observed(Direction::Drop, &msg, from));
          return;
        }
        true
      }
      _ => {
        self.config.pow_k == 0
          || self.config.bootstrap == Some(msg.sender_addr)
      }
    };

    if known || may_introduce {
      // every valid inbound message is a liveness signal
      self.touch(msg.sender_addr, Some(&msg.sender_id));
    }

    increment_counter!("received_messages", "type" => msg.kind());
    trace!("{} from {}", msg.kind(), msg.sender_addr);

    // gossip emits its own record after deduplication
    if !matches!(msg.payload, Payload::Gossip(_)) {
      self.events.emit(Event::observed(Direction::Recv, &msg, from));
    }

    let sender = msg.sender_addr;
    match msg.payload {
      Payload::Gossip(_) => self.consume_gossip(msg),
      Payload::Hello(_) => {} // admission and touch were the whole job
      Payload::GetPeers(req) => self.consume_get_peers(sender, req),
      Payload::PeersList(list) => self.consume_peers_list(sender, list),
      Payload::Ping(ping) => self.consume_ping(sender, ping),
      Payload::Pong(pong) => self.consume_pong(sender, pong),
      Payload::Ihave(ihave) => self.consume_ihave(sender, ihave),
      Payload::Iwant(iwant) => self.consume_iwant(sender, iwant),
    }
  }

  fn admit(&self, hello: &Hello, sender_id: &str) -> bool {
    if self.config.pow_k == 0 {
      return true;
    }

    match &hello.pow {
      Some(proof) => {
        let valid = pow::validate(proof, sender_id, self.config.pow_k);
        if !valid {
          info!("rejecting hello from {sender_id}: invalid proof of work");
        }
        valid
      }
      None => {
        info!("rejecting hello from {sender_id}: proof of work required");
        false
      }
    }
  }

  fn consume_gossip(&mut self, msg: Envelope) {
    let sender = msg.sender_addr;

    if !self.history.mark_seen(&msg.msg_id) {
      increment_counter!("duplicate_gossip");
      self.events.emit(Event::observed(Direction::Drop, &msg, sender));
      return;
    }

    self.events.emit(Event::observed(Direction::Recv, &msg, sender));
    self.history.store(msg.clone());

    let ttl = msg.ttl.saturating_sub(1);
    if ttl == 0 {
      trace!("gossip {} exhausted its hop budget", msg.msg_id);
      return;
    }

    let targets = self.peers.sample(self.config.fanout, &[sender]);
    if targets.is_empty() {
      return;
    }

    let forward = Envelope {
      sender_id: self.node_id.clone(),
      sender_addr: self.addr,
      timestamp_ms: wire::now_ms(),
      ttl,
      ..msg
    };
    self.transport.fanout(&forward, &targets);
  }

  fn consume_get_peers(&mut self, sender: SocketAddr, req: GetPeers) {
    let peers: Vec<PeerInfo> = self
      .peers
      .snapshot(req.max_peers)
      .into_iter()
      .filter(|peer| peer.addr != sender)
      .collect();

    let reply = self.control(Payload::PeersList(PeersList { peers }));
    self.transport.send(&reply, sender);
  }

  fn consume_peers_list(&mut self, sender: SocketAddr, list: PeersList) {
    // under admission control, introductions are only accepted from
    // peers that are themselves in the view
    if self.config.pow_k > 0 && !self.peers.contains(&sender) {
      return;
    }

    for peer in list.peers {
      self.touch(peer.addr, Some(&peer.node_id));
    }
  }

  fn consume_ping(&mut self, sender: SocketAddr, ping: Ping) {
    let reply = self.control(Payload::Pong(Pong {
      ping_id: ping.ping_id,
      seq: ping.seq,
    }));
    self.transport.send(&reply, sender);
  }

  fn consume_pong(&mut self, sender: SocketAddr, pong: Pong) {
    if let Some(probe) = self.pending_pings.remove(&pong.ping_id) {
      let rtt = probe.sent_at.elapsed();
      gauge!("ping_rtt_ms", rtt.as_secs_f64() * 1000.0);
      debug!("pong {} from {sender}, rtt {rtt:?}", probe.seq);
    }
  }

  fn consume_ihave(&mut self, sender: SocketAddr, ihave: Ihave) {
    let wanted: Vec<String> = ihave
      .ids
      .into_iter()
      .filter(|id| !self.history.contains(id))
      .collect();

    if wanted.is_empty() {
      return;
    }

    increment_counter!("reconciliations_requested");
    let request = self.control(Payload::Iwant(Iwant { ids: wanted }));
    self.transport.send(&request, sender);
  }

  fn consume_iwant(&mut self, sender: SocketAddr, iwant: Iwant) {
    for id in iwant.ids {
      if let Some(stored) = self.history.fetch(&id) {
        // point-to-point repair: the recipient's decrement yields
        // zero, so repaired gossip is not flooded again
        let copy = Envelope {
          sender_id: self.node_id.clone(),
          sender_addr: self.addr,
          timestamp_ms: wire::now_ms(),
          ttl: 1,
          ..stored.clone()
        };
        self.transport.send(&copy, sender);
      }
    }
  }
}

// periodic work and origination
impl Engine {
  fn originate(&mut self, topic: String, data: String) {
    let now = wire::now_ms();
    let msg = Envelope {
      version: wire::VERSION,
      msg_id: wire::random_id(),
      sender_id: self.node_id.clone(),
      sender_addr: self.addr,
      timestamp_ms: now,
      ttl: self.config.ttl,
      payload: Payload::Gossip(Gossip {
        topic,
        data,
        origin_id: self.node_id.clone(),
        origin_timestamp_ms: now,
      }),
    };

    increment_counter!("gossip_originated");
    self.history.mark_seen(&msg.msg_id);
    self.history.store(msg.clone());

    let targets = self.peers.sample(self.config.fanout, &[]);
    if targets.is_empty() {
      debug!("originated {} with nobody to send it to", msg.msg_id);
      return;
    }
    self.transport.fanout(&msg, &targets);
  }

  fn liveness_round(&mut self) {
    let now = Instant::now();

    for addr in self.peers.expire(now, self.config.peer_timeout) {
      info!("evicted unresponsive peer {addr}");
    }
    let _ = self.peer_count.send(self.peers.len());

    // stale probes are purged on age alone; eviction is driven by
    // last_seen, not by outstanding pings
    let timeout = self.config.peer_timeout;
    self
      .pending_pings
      .retain(|_, probe| now.duration_since(probe.sent_at) <= timeout);

    for addr in self.peers.sample(self.config.fanout, &[]) {
      self.ping_seq += 1;
      let ping_id = wire::random_id();
      self.pending_pings.insert(
        ping_id.clone(),
        PingProbe {
          sent_at: now,
          seq: self.ping_seq,
        },
      );

      let probe = self.control(Payload::Ping(Ping {
        ping_id,
        seq: self.ping_seq,
      }));
      self.transport.send(&probe, addr);
    }
  }

  fn pull_round(&mut self) {
    let ids = self.history.recent_ids(self.config.ihave_max_ids);
    if ids.is_empty() {
      return;
    }

    let targets = self.peers.sample(self.config.fanout, &[]);
    if targets.is_empty() {
      return;
    }

    let advert = self.control(Payload::Ihave(Ihave {
      ids,
      max_ids: self.config.ihave_max_ids,
    }));
    self.transport.fanout(&advert, &targets);
  }

  fn touch(&mut self, addr: SocketAddr, node_id: Option<&str>) {
    if addr == self.addr {
      return;
    }
    self.peers.touch(addr, node_id);
    let _ = self.peer_count.send(self.peers.len());
  }

  fn control(&self, payload: Payload) -> Envelope {
    Envelope::control(&self.node_id, self.addr, payload)
  }
}
