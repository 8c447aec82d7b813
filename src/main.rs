//! CLI for forumsub
//!
//! Subcommands:
//! - `broker`: run the in-process WebSocket broker
//! - `subscriber`: start the forum listeners and log what arrives
//! - `publish`: publish one message to a topic

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use forumsub::broker::Broker;
use forumsub::config::{Settings, load_config};
use forumsub::messaging::Messaging;
use forumsub::persistence::Persistence;
use forumsub::subscriber::{SubscriberService, TracingMessageLog};
use forumsub::transport::start_websocket_server;
use forumsub::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "forumsub", version)]
enum Command {
    /// Start the WebSocket broker
    Broker,
    /// Connect to the broker and run the forum listeners until Ctrl-C
    Subscriber,
    /// Publish a message to a topic
    Publish {
        /// Topic to publish to
        #[arg(long, short)]
        topic: String,
        /// Message payload
        message: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Broker => run_broker(&settings).await,
        Command::Subscriber => run_subscriber(&settings).await,
        Command::Publish { topic, message } => run_publish(&settings, &topic, &message).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_broker(settings: &Settings) -> forumsub::Result<()> {
    let persistence = Persistence::open(
        &settings.server.database_path,
        Some(settings.server.message_ttl()?),
        Some(settings.server.max_messages_per_queue),
    )?;
    let broker = Arc::new(Mutex::new(Broker::new(persistence)));
    let addr = settings.server_addr();

    tokio::select! {
        res = start_websocket_server(&addr, broker) => {
            error!("WebSocket broker exited unexpectedly.");
            res
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    }
}

async fn run_subscriber(settings: &Settings) -> forumsub::Result<()> {
    let messaging = Messaging::connect(settings).await?;
    let service = SubscriberService::new(
        messaging.topic_template.clone(),
        Arc::new(TracingMessageLog),
        settings.forum.user_id.clone(),
    );
    let containers = service.start(&messaging).await?;
    info!(user_id = %settings.forum.user_id, "listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping listeners.");
    for container in containers {
        container.stop();
    }
    messaging.close();
    Ok(())
}

async fn run_publish(settings: &Settings, topic: &str, message: &str) -> forumsub::Result<()> {
    let messaging = Messaging::connect(settings).await?;
    let service = SubscriberService::new(
        messaging.topic_template.clone(),
        Arc::new(TracingMessageLog),
        settings.forum.user_id.clone(),
    );
    service.publish_to_topic(topic, message).await?;
    info!(%topic, "message published");
    messaging.close();
    Ok(())
}
