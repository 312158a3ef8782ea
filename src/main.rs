//! CLI for DispatchQ
//!
//! Subcommands:
//! - `broker`: run the broker behind a WebSocket server
//! - `consumer`: connect a consumer that answers every request (useful for smoke tests)
//! - `producer`: send requests and print the answers

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use dispatchq::broker::{Broker, DispatchMode};
use dispatchq::config::{Settings, load_config};
use dispatchq::consumer::{Consumer, Delivery, HandlerResult};
use dispatchq::producer::{Producer, ProducerOptions};
use dispatchq::transport::websocket;
use dispatchq::utils::logging;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dispatchq")]
enum Command {
    /// Start the broker and its WebSocket server
    Broker {
        /// Dispatch mode, overrides the configured one
        #[arg(long, value_parser = parse_mode)]
        mode: Option<DispatchMode>,
        /// Accepted command names (command mode), added to the configured ones
        #[arg(long = "command")]
        commands: Vec<String>,
        /// Seconds between stats log lines, 0 disables them
        #[arg(long, default_value_t = 30)]
        stats_interval: u64,
    },
    /// Run a consumer that answers every request with "Answer to <request>"
    Consumer {
        /// WebSocket URL of the broker (default: ws://127.0.0.1:8080)
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Commands to subscribe to once connected
        #[arg(long = "subscribe")]
        subscribe: Vec<String>,
    },
    /// Send requests and print the answers
    Producer {
        /// WebSocket URL of the broker (default: ws://127.0.0.1:8080)
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Request payload
        #[arg(long, default_value = "Hello")]
        message: String,
        /// Number of requests to send
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
}

fn parse_mode(s: &str) -> Result<DispatchMode, String> {
    match s.to_lowercase().as_str() {
        "direct" => Ok(DispatchMode::Direct),
        "command" => Ok(DispatchMode::Command),
        other => Err(format!("unknown dispatch mode '{other}'")),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            Settings::default()
        }
    };
    logging::init(&config.log.level);

    let cmd = Command::parse();

    match cmd {
        Command::Broker {
            mode,
            commands,
            stats_interval,
        } => {
            if let Err(e) = run_broker(config, mode, commands, stats_interval).await {
                error!("Broker failed: {}", e);
            }
        }
        Command::Consumer { url, subscribe } => {
            if let Err(e) = run_consumer(&url, subscribe).await {
                error!("Consumer failed: {}", e);
            }
        }
        Command::Producer {
            url,
            message,
            count,
        } => {
            if let Err(e) = run_producer(&config, &url, &message, count).await {
                error!("Producer failed: {}", e);
            }
        }
    }
}

async fn run_broker(
    mut config: Settings,
    mode: Option<DispatchMode>,
    commands: Vec<String>,
    stats_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(mode) = mode {
        config.broker.mode = mode;
    }
    config.broker.commands.extend(commands);

    let broker = Arc::new(Broker::from_settings(&config.broker));
    let dispatcher = broker.start();
    let listener = websocket::bind(&config.server_addr()).await?;

    if stats_interval > 0 {
        tokio::spawn(log_stats(broker.clone(), Duration::from_secs(stats_interval)));
    }

    tokio::select! {
        _ = websocket::serve(listener, broker) => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    dispatcher.abort();
    Ok(())
}

async fn log_stats(broker: Arc<Broker>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match serde_json::to_string(&broker.stats()) {
            Ok(stats) => info!("stats {stats}"),
            Err(e) => warn!("can't encode stats: {e}"),
        }
    }
}

async fn run_consumer(url: &str, subscribe: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let link = websocket::connect(url).await?;
    let (_consumer, handle) = Consumer::start(link, subscribe, answer);

    tokio::select! {
        _ = handle => {
            warn!("Connection to broker closed.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

fn answer(delivery: &Delivery) -> HandlerResult {
    let request = String::from_utf8_lossy(&delivery.payload);
    info!(id = delivery.id, "Request: {request}");
    Ok(Bytes::from(format!("Answer to {request}")))
}

async fn run_producer(
    config: &Settings,
    url: &str,
    message: &str,
    count: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let link = websocket::connect(url).await?;
    let (producer, handle) = Producer::spawn(link, ProducerOptions::from(&config.producer));

    for n in 1..=count {
        let payload = if count > 1 {
            format!("{message} {n}")
        } else {
            message.to_string()
        };
        match producer.request(payload.clone()).await {
            Ok(answer) => println!("{payload} -> {}", String::from_utf8_lossy(&answer)),
            Err(e) => warn!("{payload}: {e}"),
        }
    }

    handle.abort();
    Ok(())
}
