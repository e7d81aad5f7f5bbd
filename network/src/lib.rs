mod bootstrap;
mod channel;
mod codec;
mod config;
mod engine;
mod events;
mod history;
mod node;
mod peers;
mod transport;

pub mod pow;
pub mod wire;

pub use {
  config::{Config, Mode},
  events::{Direction, Event, Events},
  history::SEEN_CAP,
  node::{Error, Node},
  wire::PeerInfo,
};
