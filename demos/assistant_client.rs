//! Assistant client example
//!
//! Connects using `TETHER_*` environment variables, prints connection events,
//! and asks a few questions.
//!
//! Run with: TETHER_URL=ws://127.0.0.1:8080 cargo run --example assistant_client

use serde::Deserialize;
use serde_json::json;
use tether::{methods, ClientBuilder, ClientConfig, ClientEvent, ObservabilityConfig};

#[derive(Deserialize, Debug)]
struct Health {
    status: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env()?;

    let client = ClientBuilder::from_config(config)
        .with_observability(ObservabilityConfig::new("assistant-client").with_traces(false))
        .connect()
        .await?;
    tracing::info!(endpoint = %client.config().endpoint, "Assistant client connected");

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::StateChanged(state) => println!("[state] {}", state),
                ClientEvent::ReconnectScheduled { attempt, delay } => {
                    println!("[reconnect] attempt {} in {:?}", attempt, delay)
                }
                ClientEvent::Notification(msg) => println!("[notification] {}", msg.method_name()),
                ClientEvent::Error(e) => println!("[error] {}", e),
            }
        }
    });

    client
        .on_notification(methods::AI_MODEL_CHANGED, |msg| async move {
            println!("Model switched: {:?}", msg.params);
        })
        .await;

    let health: Health = client.request(methods::SYSTEM_HEALTH, ()).await?;
    tracing::info!(status = %health.status, "Service health");

    for prompt in ["Where is my order?", "Can I change the delivery address?"] {
        match client.send(methods::CHAT_COMPLETION, json!({ "prompt": prompt })).await {
            Ok(reply) => println!("> {}\n{}\n", prompt, reply),
            Err(e) => tracing::warn!(prompt, error = %e, "Question failed"),
        }
    }

    let stats = client.stats().await;
    tracing::info!(
        pending = stats.pending_requests,
        reconnect_attempts = stats.reconnect_attempts,
        "Session finished"
    );
    client.disconnect().await;
    tether::core::shutdown_observability();
    Ok(())
}
