use {
  clap::Parser,
  murmur_network::{Config, Mode},
  std::{net::SocketAddr, time::Duration},
};

fn parse_mode(value: &str) -> Result<Mode, String> {
  value.parse()
}

/// Command line surface of the node. Options map one to one onto the
/// engine configuration; everything is read once at startup.
#[derive(Debug, Parser)]
#[clap(name = "murmur", about = "epidemic dissemination node")]
pub struct CliOptions {
  #[clap(long, default_value_t = 8000, help = "udp port to bind")]
  port: u16,

  #[clap(long, help = "address of a seed peer used to join the overlay")]
  bootstrap: Option<SocketAddr>,

  #[clap(long, default_value_t = 3, help = "peers selected per gossip round")]
  fanout: usize,

  #[clap(long, default_value_t = 8, help = "hop budget of originated gossip")]
  ttl: u32,

  #[clap(long, default_value_t = 20, help = "maximum peer records kept")]
  peer_limit: usize,

  #[clap(long, default_value_t = 2.0, help = "seconds between ping rounds")]
  ping_interval: f64,

  #[clap(
    long,
    default_value_t = 6.0,
    help = "seconds of silence before a peer is dropped"
  )]
  peer_timeout: f64,

  #[clap(long, default_value_t = 42, help = "rng seed for peer selection")]
  seed: u64,

  #[clap(
    long,
    default_value = "push",
    value_parser = parse_mode,
    help = "dissemination mode: push or hybrid"
  )]
  mode: Mode,

  #[clap(
    long,
    default_value_t = 2.0,
    help = "seconds between ihave rounds (hybrid mode)"
  )]
  pull_interval: f64,

  #[clap(long, default_value_t = 32, help = "max ids per ihave")]
  ihave_max_ids: usize,

  #[clap(
    long,
    default_value_t = 0,
    help = "required leading hex zeros for admission, 0 disables"
  )]
  pow_k: u32,

  #[clap(
    long,
    default_value = "chat",
    help = "topic that stdin lines are published under"
  )]
  topic: String,

  #[clap(long, help = "expose prometheus metrics for scraping")]
  metrics: bool,
}

impl CliOptions {
  pub fn to_config(&self) -> Config {
    Config {
      port: self.port,
      bootstrap: self.bootstrap,
      fanout: self.fanout,
      ttl: self.ttl,
      peer_limit: self.peer_limit,
      ping_interval: Duration::from_secs_f64(self.ping_interval),
      peer_timeout: Duration::from_secs_f64(self.peer_timeout),
      seed: self.seed,
      mode: self.mode,
      pull_interval: Duration::from_secs_f64(self.pull_interval),
      ihave_max_ids: self.ihave_max_ids,
      pow_k: self.pow_k,
    }
  }

  pub fn topic(&self) -> &str {
    &self.topic
  }

  pub fn metrics(&self) -> bool {
    self.metrics
  }
}
