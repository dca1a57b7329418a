use anyhow::{bail, Context, Result};
use btsock::{
    BluezAdapter, Event, EventCategory, EventDispatcher, ManagerConfig, RfcommConfig,
    RfcommTransport, SocketEvent, SocketManager,
};
use btsock_shared::service::SERVICE_UUID;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

// CLI
#[derive(Parser)]
#[command(name = "btsock")]
#[command(version)]
#[command(about = "Keyed RFCOMM sockets with newline-framed messages")]
struct Cli {
    /// Service identifier to listen on and dial
    #[arg(long, global = true, default_value_t = SERVICE_UUID)]
    service_uuid: Uuid,

    /// Give up on an outbound connect after this many seconds
    #[arg(long, global = true, default_value_t = 30)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections and echo every received line back
    Listen {
        #[arg(long, default_value = "server")]
        key: String,
    },
    /// Connect to a device and forward stdin lines to it
    Connect {
        #[arg(long, default_value = "client")]
        key: String,
        /// Remote device address (AA:BB:CC:DD:EE:FF)
        #[arg(long)]
        address: String,
    },
    /// List paired devices
    Paired,
    /// Show adapter state
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = ManagerConfig {
        service_uuid: cli.service_uuid,
        connect_timeout: Duration::from_secs(cli.connect_timeout_secs),
        ..Default::default()
    };

    let dispatcher = EventDispatcher::new();
    let adapter = Arc::new(BluezAdapter::open(dispatcher.sink()).await);

    let Some((session, bt_adapter)) = adapter.handles() else {
        if matches!(cli.command, Commands::State) {
            println!("{}", json!({ "supported": false }));
            return Ok(());
        }
        bail!("no Bluetooth adapter available");
    };
    info!("[BT] Using adapter {}", bt_adapter.name());

    let rfcomm = RfcommConfig {
        service_name: config.service_name.clone(),
        ..Default::default()
    };
    let transport = Arc::new(RfcommTransport::with_adapter(session, bt_adapter, rfcomm));
    let manager = SocketManager::new(config, adapter, transport, dispatcher);

    match cli.command {
        Commands::State => print_state(&manager).await,
        Commands::Paired => {
            for device in manager.bonded_devices().await? {
                println!("{}", serde_json::to_string(&device)?);
            }
            Ok(())
        }
        Commands::Listen { key } => run_listen(&manager, &key).await,
        Commands::Connect { key, address } => run_connect(&manager, &key, &address).await,
    }
}

async fn print_state(manager: &SocketManager) -> Result<()> {
    let state = manager.adapter_state().await?;
    let discoverable = manager.is_discoverable().await?;
    println!(
        "{}",
        json!({
            "supported": manager.is_supported(),
            "state": state.code(),
            "enabled": state.is_on(),
            "discoverable": discoverable,
        })
    );
    Ok(())
}

fn print_event(event: &Event) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to encode event: {}", e),
    }
}

/// Run a listener until Ctrl+C or until it stops on its own
async fn run_listen(manager: &SocketManager, key: &str) -> Result<()> {
    let mut server = manager.subscribe(EventCategory::Server);
    let mut socket = manager.subscribe(EventCategory::Socket);

    manager
        .start_listener(key)
        .await
        .with_context(|| format!("failed to start listener {}", key))?;
    info!("Listening as {} on {}", key, manager.config().service_uuid);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down listener {}", key);
                if let Err(e) = manager.stop_listener(key) {
                    warn!("{}", e);
                }
            }
            Some(event) = server.recv() => {
                print_event(&event);
                if matches!(event, Event::Socket(SocketEvent::Stopped { .. })) {
                    break;
                }
            }
            Some(event) = socket.recv() => {
                print_event(&event);
                if let Event::Socket(SocketEvent::DataReceived { data, socket_key }) = event {
                    if let Err(e) = manager.write(&socket_key, data.as_bytes()).await {
                        error!("Echo to {} failed: {}", socket_key, e);
                    }
                }
            }
        }
    }

    for socket_key in manager.connection_keys() {
        let _ = manager.disconnect(&socket_key).await;
    }
    Ok(())
}

/// Forward stdin lines to the remote device until stdin or the link closes
async fn run_connect(manager: &SocketManager, key: &str, address: &str) -> Result<()> {
    let mut socket = manager.subscribe(EventCategory::Socket);

    let attempt = manager.connect(key, address).await?;
    attempt
        .outcome()
        .await
        .with_context(|| format!("failed to connect to {}", address))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => manager.write(key, line.as_bytes()).await?,
                None => {
                    stdin_open = false;
                    if let Err(e) = manager.disconnect(key).await {
                        warn!("{}", e);
                        break;
                    }
                }
            },
            event = socket.recv() => match event {
                Some(event) => {
                    print_event(&event);
                    if matches!(event, Event::Socket(SocketEvent::Close { .. })) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = manager.disconnect(key).await {
                    warn!("{}", e);
                    break;
                }
            }
        }
    }

    Ok(())
}
