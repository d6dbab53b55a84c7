use anyhow::{bail, Context};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wsline::{ChannelConfig, ChannelRegistry};

/// Usage: `wsline <ws-url> [command...]`
///
/// Subscribes to every command given, logs their pushes, and waits until each
/// has arrived once. Settings come from `WSLINE_*` variables (or `.env`).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: wsline <ws-url> [command...]");
    };
    let commands: Vec<String> = args.collect();

    #[cfg(feature = "env-file")]
    let config = ChannelConfig::from_env_file("wsline")?;
    #[cfg(not(feature = "env-file"))]
    let config = ChannelConfig::from_env("wsline")?;

    let registry = ChannelRegistry::new(config);
    let channel = registry
        .get_channel(&url)
        .with_context(|| format!("cannot open channel to {}", url))?;

    channel.on_connect(|| info!("Connected"));
    channel.on_disconnect(|| warn!("Disconnected, reconnecting"));

    for command in &commands {
        let name = command.clone();
        channel.read(command, move |data, reply| {
            info!(command = %name, "{}", data);
            if reply.expects_answer() {
                if let Err(e) = reply.send(&json!({"ok": true})) {
                    warn!("Failed to answer server request: {}", e);
                }
            }
        });
        channel.subscribe(command)?;
    }

    if !commands.is_empty() {
        channel.wait_async(&commands).await;
        info!("Every subscribed command has arrived at least once");
    }

    tokio::signal::ctrl_c().await?;
    registry.close_all();
    Ok(())
}
