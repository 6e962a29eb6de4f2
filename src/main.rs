mod config;
mod error;
mod mqtt;
mod mystrom;
mod poller;
mod registry;
mod relay;
#[cfg(test)]
mod testutil;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::mqtt::client::{MqttMessage, MqttSession};
use crate::mystrom::client::SwitchClient;
use crate::poller::ReportPoller;
use crate::registry::DeviceRegistry;
use crate::relay::CommandRelay;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let registry = DeviceRegistry::new(&config.devices);
    info!(
        "Starting mystrom-to-mqtt bridge (mqtt={}:{}, client_id={}, devices={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.mqtt.client_id,
        registry.len(),
    );
    for device in registry.iter() {
        info!("  Device: {} at {}", device.name, device.address);
    }

    let switch = match SwitchClient::new(&config.http) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to set up HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    // The first connection has to succeed; after that the event loop reconnects on its own.
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<MqttMessage>(100);
    let session = match MqttSession::new(&config).connect(&mqtt_cmd_tx).await {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let mqtt = session.handle();
    let mqtt_handle = tokio::spawn(session.run(mqtt_cmd_tx));

    let mut poller_handles = Vec::new();
    for device in registry.iter() {
        let topic = config.report_topic(&device.name);
        let poller = ReportPoller::new(device.clone(), topic, switch.clone(), mqtt.clone());
        poller_handles.push(tokio::spawn(poller.run(config.http.poll_interval)));
    }

    let (relay, relay_handles) =
        CommandRelay::spawn(&registry, switch, config.command_topic_root());

    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                if let Err(e) = relay.on_command(&msg.topic, &msg.payload) {
                    warn!("Discarding command on {}: {}", msg.topic, e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    for handle in poller_handles.into_iter().chain(relay_handles) {
        handle.abort();
    }
    mqtt_handle.abort();
    info!("mystrom-to-mqtt bridge stopped");
}

#[cfg(unix)]
async fn sigterm() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
