// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use page_tracker::config::load_config_with_overrides;
use page_tracker::{
    Agent, BackendFactory, CollectorSet, EventData, HostMessage, HttpTransport, MemoryTransport,
    PageContext, PageSignal, SystemClock, Tracker, TrackerHandle, Transport,
};

/// Page Tracker - headless telemetry agent driven by host messages on stdin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// API key (overrides config file)
    #[arg(short, long)]
    api_key: Option<String>,

    /// Log deliveries instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// URL reported in the initial pageview
    #[arg(long, default_value = "")]
    url: String,

    #[arg(long, default_value = "")]
    referrer: String,

    #[arg(long, default_value = "")]
    title: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file, environment and CLI overrides
    let tracker_config = load_config_with_overrides(&args.config, args.api_key)?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = if tracker_config.tracker.debug {
        "debug".to_string()
    } else {
        tracker_config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Page Tracker");
    info!("Loaded configuration from: {:?}", args.config);
    info!("Endpoint: {}", tracker_config.tracker.endpoint);
    info!("Storage backend: {}", tracker_config.storage.backend);

    // Create storage backend
    let backend = BackendFactory::create(&tracker_config.storage)?;
    info!("Storage backend initialized: {}", backend.backend_type());

    let transport: Arc<dyn Transport> = if args.dry_run {
        info!("Dry run: deliveries are logged, not sent");
        Arc::new(MemoryTransport::logging())
    } else {
        Arc::new(
            HttpTransport::new(tracker_config.tracker.endpoint.clone(), &tracker_config.transport)
                .context("Failed to create HTTP transport")?,
        )
    };
    info!("Transport initialized: {}", transport.transport_type());

    let tracker = Tracker::new(&tracker_config, backend, transport, Arc::new(SystemClock));
    let page = PageContext {
        url: args.url,
        referrer: args.referrer,
        title: args.title,
    };

    let mut agent = Agent::new();
    let handle = agent.init(tracker, page, CollectorSet::new()).await;

    // Forward host messages until EOF or Ctrl+C
    tokio::select! {
        result = forward_host_messages(handle) => {
            if let Err(e) = result {
                tracing::error!("Host input error: {}", e);
            }
            info!("Host input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Cleanup
    let outcome = agent.destroy().await;
    info!("Page Tracker shut down successfully: {:?}", outcome);

    Ok(())
}

async fn forward_host_messages(handle: &TrackerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: HostMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed host message: {}", e);
                continue;
            }
        };

        match message {
            HostMessage::Track { name, data } => {
                handle.track(&name, data);
            }
            HostMessage::Identify { user_id, traits } => {
                handle.identify(&user_id, traits);
            }
            HostMessage::Capture { event_type, data } => {
                handle.capture(EventData::from_wire(&event_type, data));
            }
            HostMessage::Signal { signal } => {
                if let Some(outcome) = handle.signal(PageSignal::from(signal)).await {
                    debug!("Signal {:?}: {:?}", signal, outcome);
                }
            }
            HostMessage::Flush => {
                let outcome = handle.flush().await;
                debug!("Flush: {:?}", outcome);
            }
        }
    }

    Ok(())
}
