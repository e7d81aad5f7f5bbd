//! Public entrypoint for hosting one protocol engine.
//!
//! A [`Node`] owns everything one engine instance needs: its identity,
//! its UDP endpoint, its event stream and the set of tasks it spawned.
//! Nothing is process-global, so any number of nodes can be hosted in
//! one process, which is what simulation harnesses do.

use {
  crate::{
    bootstrap,
    channel::Channel,
    config::Config,
    engine::{Command, Engine},
    events::{self, Events},
    transport::Transport,
    wire::{self, PeerInfo},
  },
  std::net::{IpAddr, Ipv4Addr, SocketAddr},
  thiserror::Error,
  tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
  },
  tracing::info,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("node is already running")]
  AlreadyRunning,

  #[error("node is not running")]
  NotRunning,
}

/// One running engine instance and the handle to control it.
pub struct Node {
  config: Config,
  node_id: String,
  events: Option<Events>,
  running: Option<Running>,
}

/// Every resource that exists only while the node runs. Shutdown
/// consumes this, cancelling exactly the tasks recorded here and no
/// others that may coexist in the same scheduler.
struct Running {
  commands: mpsc::UnboundedSender<Command>,
  tasks: Vec<JoinHandle<()>>,
  local_addr: SocketAddr,
}

impl Node {
  /// Creates a stopped node with a fresh random identity.
  pub fn new(config: Config) -> Self {
    Self {
      config,
      node_id: wire::random_id(),
      events: None,
      running: None,
    }
  }

  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  /// The advertised listening address, once started.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.running.as_ref().map(|running| running.local_addr)
  }

  /// Binds the transport and spawns the engine task set. Binding is
  /// the only fatal startup error.
  pub async fn start(&mut self) -> Result<(), Error> {
    if self.running.is_some() {
      return Err(Error::AlreadyRunning);
    }

    let (sink, events) = events::channel();
    let transport = Transport::bind(self.config.port, sink.clone()).await?;

    // when bound to the wildcard, advertise the loopback address;
    // the engine targets single-host overlays and simulations
    let bound = transport.local_addr()?;
    let advertised = if bound.ip().is_unspecified() {
      SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
    } else {
      bound
    };

    let (peer_count, peer_watch) = watch::channel(0usize);
    let (cmdtx, cmdrx) = Channel::new().split();

    let engine = Engine::new(
      self.config.clone(),
      self.node_id.clone(),
      advertised,
      transport.clone(),
      sink,
      peer_count,
    );
    let mut tasks = vec![tokio::spawn(engine.run(cmdrx))];

    if let Some(seed) = self.config.bootstrap {
      let config = self.config.clone();
      let node_id = self.node_id.clone();
      tasks.push(tokio::spawn(async move {
        bootstrap::join(config, node_id, advertised, seed, transport, peer_watch)
          .await;
      }));
    }

    info!("node {} listening on {advertised}", self.node_id);
    self.events = Some(events);
    self.running = Some(Running {
      commands: cmdtx,
      tasks,
      local_addr: advertised,
    });
    Ok(())
  }

  /// Stops the engine: cancels exactly the tasks this instance
  /// spawned, which closes the transport and drops all in-memory
  /// protocol state. Safe to call any number of times.
  pub fn stop(&mut self) {
    if let Some(running) = self.running.take() {
      let _ = running.commands.send(Command::Shutdown);
      for task in running.tasks {
        task.abort();
      }
      info!("node {} stopped", self.node_id);
    }
  }

  /// Enqueues a new application payload for dissemination on the
  /// engine's scheduling context.
  pub fn originate(
    &self,
    topic: impl Into<String>,
    data: impl Into<String>,
  ) -> Result<(), Error> {
    let running = self.running.as_ref().ok_or(Error::NotRunning)?;
    running
      .commands
      .send(Command::Originate {
        topic: topic.into(),
        data: data.into(),
      })
      .map_err(|_| Error::NotRunning)
  }

  /// Snapshot of the engine's current membership view.
  pub async fn peers(&self) -> Result<Vec<PeerInfo>, Error> {
    let running = self.running.as_ref().ok_or(Error::NotRunning)?;
    let (tx, rx) = oneshot::channel();
    running
      .commands
      .send(Command::Peers(tx))
      .map_err(|_| Error::NotRunning)?;
    rx.await.map_err(|_| Error::NotRunning)
  }

  /// The engine's observable event stream. Yields each record once;
  /// can be taken once per start.
  pub fn events(&mut self) -> Option<Events> {
    self.events.take()
  }
}

impl Drop for Node {
  fn drop(&mut self) {
    self.stop();
  }
}
