use {
  crate::cli::CliOptions,
  clap::Parser,
  futures::StreamExt,
  metrics_exporter_prometheus::PrometheusBuilder,
  murmur_network::Node,
  tokio::io::{AsyncBufReadExt, BufReader},
  tracing::{error, info},
  tracing_subscriber::{EnvFilter, FmtSubscriber},
};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // logs go to stderr; stdout is reserved for the event stream
  // consumed by analysis tooling
  tracing::subscriber::set_global_default(
    FmtSubscriber::builder()
      .with_env_filter(EnvFilter::from_default_env())
      .with_writer(std::io::stderr)
      .finish(),
  )?;

  let opts = CliOptions::parse();
  info!("node options: {opts:?}");

  if opts.metrics() {
    PrometheusBuilder::new()
      .install()
      .expect("failed to install metrics exporter");
  }

  let mut node = Node::new(opts.to_config());
  node.start().await?;

  // every protocol event becomes one json line on stdout
  let mut events = node.events().expect("events stream was already taken");
  tokio::spawn(async move {
    while let Some(event) = events.next().await {
      match serde_json::to_string(&event) {
        Ok(line) => println!("{line}"),
        Err(err) => error!("event serialization failed: {err}"),
      }
    }
  });

  // each stdin line is originated as one gossip message. Interactive
  // interrupts shut the node down gracefully; supervisor-delivered
  // termination keeps its default disposition.
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut stdin_open = true;
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("interrupt received, shutting down");
        break;
      }

      line = lines.next_line(), if stdin_open => match line {
        Ok(Some(line)) => {
          let line = line.trim();
          if line.is_empty() {
            continue;
          }
          if let Err(err) = node.originate(opts.topic(), line) {
            error!("originate failed: {err}");
          }
        }
        Ok(None) => stdin_open = false,
        Err(err) => {
          error!("stdin read failed: {err}");
          stdin_open = false;
        }
      },
    }
  }

  node.stop();
  Ok(())
}
