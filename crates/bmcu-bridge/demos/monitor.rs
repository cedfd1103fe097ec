//! Connect to a feeder, ask for its status and print the lane snapshot.
//!
//! ```text
//! cargo run --example monitor -- bmcu.json
//! cargo run --example monitor -- /dev/ttyUSB0
//! RUST_LOG=debug cargo run --example monitor -- --list
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use bmcu_bridge::prelude::*;
use bmcu_bridge::protocol::list_ports;
use serde_json::Map;
use tracing_subscriber::EnvFilter;

fn load_config(arg: &str) -> Result<BridgeConfig> {
    if arg.ends_with(".json") {
        BridgeConfig::from_file(arg).with_context(|| format!("loading {arg}"))
    } else {
        let mut config = BridgeConfig::new(arg, 115200);
        config.debug = true;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let Some(arg) = std::env::args().nth(1) else {
        bail!("usage: monitor <config.json | serial-port | --list>");
    };

    if arg == "--list" {
        for port in list_ports() {
            let tag = if port.is_ch340() { " (CH340)" } else { "" };
            println!("{}{tag}", port.name);
        }
        return Ok(());
    }

    let config = load_config(&arg)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let mut bridge = Bridge::new(config);
        tracing::info!("{}", bridge.capabilities());
        bridge.connect().context("opening feeder port")?;
        let (handle, _timers) = scheduler::spawn(bridge);

        let ping = handle
            .request("PING", Map::new(), Duration::from_secs(2))
            .await
            .context("PING")?;
        println!("ping: {ping}");

        match handle
            .request("STATUS", Map::new(), Duration::from_secs(3))
            .await
        {
            Ok(_) => {}
            Err(e @ BridgeError::Timeout { .. }) => tracing::warn!("{e}"),
            Err(e) => return Err(e.into()),
        }

        for (i, lane) in handle.lanes().iter().enumerate() {
            println!("lane {i}: {lane}");
        }
        println!("{}", serde_json::to_string_pretty(&handle.status())?);

        handle.shutdown();
        Ok(())
    })
}
