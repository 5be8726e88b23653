//! queue-transport
//!
//! Runs a receiver that logs every inbound message, or sends one batch of
//! messages to a destination.
//!
//! ```text
//! queue-transport receive --config transport.toml
//! queue-transport send --to lq.tcp://queue-host:2200 --queue orders hello world
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use queue_transport::config::{load_config, TransportConfig};
use queue_transport::lifecycle::signals::wait_for_signal;
use queue_transport::net::{ConnectionTracker, Destination, OutgoingBatch, Receiver};
use queue_transport::observability::logging::init_logging;
use queue_transport::protocol::{LengthPrefixedProtocol, OutgoingMessage};

#[derive(Parser)]
#[command(name = "queue-transport")]
#[command(about = "Message queue transport: receive or send framed messages over TCP", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen and log every message received
    Receive {
        /// Override listener.bind_address
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Send one batch of messages to a destination
    Send {
        /// Destination URI, e.g. lq.tcp://host:2200
        #[arg(short, long)]
        to: String,

        /// Queue name for every message
        #[arg(short, long)]
        queue: String,

        /// Header applied to every message, as key=value
        #[arg(long = "header", value_name = "KEY=VALUE")]
        headers: Vec<String>,

        /// One message per payload, sent in order
        #[arg(required = true)]
        payloads: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };
    init_logging(&config.observability.log_filter);

    tracing::info!("queue-transport v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Receive { bind } => receive(config, bind).await,
        Commands::Send {
            to,
            queue,
            headers,
            payloads,
        } => send(config, &to, &queue, &headers, payloads).await,
    }
}

async fn receive(
    mut config: TransportConfig,
    bind: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(bind) = bind {
        config.listener.bind_address = bind;
    }

    let tracker = ConnectionTracker::new();
    let receiver = Receiver::new(
        config.listener.endpoint()?,
        Arc::new(LengthPrefixedProtocol::new(config.protocol.max_frame_bytes)),
    )
    .with_security(config.listener.security()?)
    .with_failure_policy(config.listener.failure_policy)
    .with_timeout(config.listener.receive_timeout())
    .with_tracker(tracker.clone());

    let messages = receiver.start_receiving()?;
    let mut subscription = messages.subscribe();

    let signal = wait_for_signal();
    tokio::pin!(signal);

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            _ = &mut signal => break,
            item = subscription.next() => match item {
                Some(Ok(message)) => {
                    tracing::info!(
                        message_id = %message.id,
                        queue = %message.queue,
                        sub_queue = ?message.sub_queue,
                        bytes = message.data.len(),
                        "Message received"
                    );
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Inbound sequence failed");
                    outcome = Err(e.to_string().into());
                    break;
                }
                None => break,
            },
        }
    }

    receiver.dispose();
    let drain = config.listener.drain_timeout();
    if !tracker.wait_for_idle(drain).await {
        tracing::warn!(
            open_connections = tracker.active_count(),
            drain_timeout_secs = drain.as_secs(),
            "Connections still open after drain timeout"
        );
    }

    tracing::info!("Shutdown complete");
    outcome
}

async fn send(
    config: TransportConfig,
    to: &str,
    queue: &str,
    headers: &[String],
    payloads: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let destination = Destination::parse(to)?;

    let mut parsed_headers = Vec::with_capacity(headers.len());
    for header in headers {
        let (key, value) = header
            .split_once('=')
            .ok_or_else(|| format!("header '{}' is not KEY=VALUE", header))?;
        parsed_headers.push((key.to_string(), value.to_string()));
    }

    let messages = payloads.into_iter().map(|payload| {
        parsed_headers
            .iter()
            .fold(OutgoingMessage::new(queue, payload.into_bytes()), |msg, (k, v)| {
                msg.with_header(k.clone(), v.clone())
            })
    });

    let mut batch = OutgoingBatch::new(destination, messages, config.outbound.security()?)
        .with_connect_timeout(config.outbound.connect_timeout());

    let protocol = LengthPrefixedProtocol::new(config.protocol.max_frame_bytes);
    batch.connect().await?;
    batch.send(&protocol).await?;

    tracing::info!(
        destination = %batch.destination(),
        count = batch.messages().len(),
        "Batch delivered"
    );
    batch.dispose();
    Ok(())
}
