//! CLI for publine
//!
//! Subcommands:
//! - `server`: run the broker
//! - `client producer|consumer|get`: small demo clients, handy for smoke tests

use std::time::Duration;

use clap::{Parser, Subcommand};
use publine::Broker;
use publine::client::Client;
use publine::config::{Settings, load_config};
use publine::transport::start_tcp_server;
use publine::utils::logging;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "publine", about = "Topic-based pub/sub broker over line-delimited JSON")]
struct Cli {
    /// Host to bind (server) or connect to (client); overrides configuration
    #[arg(long, global = true)]
    host: Option<String>,
    /// Port to bind (server) or connect to (client); overrides configuration
    #[arg(long, global = true)]
    port: Option<u16>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker
    Server,
    /// Run one of the demo clients
    Client {
        #[command(subcommand)]
        mode: ClientMode,
    },
}

#[derive(Subcommand)]
enum ClientMode {
    /// Publish a few numbered messages
    Producer {
        #[arg(long, default_value = "news")]
        topic: String,
        #[arg(long, default_value_t = 3)]
        count: u32,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Subscribe and log every push for a while
    Consumer {
        #[arg(long, default_value = "news")]
        topic: String,
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
    },
    /// Fetch a single message
    Get {
        #[arg(long, default_value = "news")]
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&settings.log.level);

    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let result = match cli.command {
        Command::Server => run_server(&settings).await,
        Command::Client { mode } => run_client(&settings, mode).await,
    };

    if let Err(e) = result {
        error!("{e}");
    }
}

async fn run_server(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::new()
        .with_outbound_limit(settings.broker.outbound_limit)
        .into_shared();
    let shutdown = CancellationToken::new();

    let server = start_tcp_server(settings.addr(), broker, shutdown.clone());
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            error!("Broker exited unexpectedly.");
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Closing sessions.");
        }
    }

    shutdown.cancel();
    server.await?;
    Ok(())
}

async fn run_client(
    settings: &Settings,
    mode: ClientMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect(settings.addr()).await?;

    match mode {
        ClientMode::Producer {
            topic,
            count,
            interval_ms,
        } => {
            for idx in 0..count {
                let payload = json!({ "id": idx, "text": format!("Message #{idx}") });
                let reply = client.publish(&topic, payload).await?;
                info!("Producer -> {reply:?}");
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
        ClientMode::Consumer {
            topic,
            duration_secs,
        } => {
            client.add_handler(|push| info!("Consumer got [{}] {}", push.topic, push.data));
            let reply = client.subscribe(&topic).await?;
            info!("Consumer subscribe -> {reply:?}");
            tokio::time::sleep(Duration::from_secs(duration_secs)).await;
        }
        ClientMode::Get { topic } => {
            let reply = client.get(&topic).await?;
            info!("Get -> {reply:?}");
        }
    }

    client.disconnect().await;
    Ok(())
}
