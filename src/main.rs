use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use flex_ic::hardware::{BusTransport, CanListener, ListenerStatus, MockBus};
use flex_ic::widget::{load_widgets, DrawList, WidgetRegistry};
use flex_ic::{AppConfig, IdResolver, RealTimeStore};

type Opener = Box<dyn FnOnce() -> flex_ic::Result<Box<dyn BusTransport>> + Send>;

const BIND_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    let catalog = config.load_catalog()?;
    for problem in catalog.validate() {
        warn!("Catalog: {}", problem);
    }
    let catalog = Arc::new(catalog);
    info!(
        "Catalog ready: {} messages, {} signals",
        catalog.messages().len(),
        catalog.signal_count()
    );

    let resolver = Arc::new(IdResolver::build(Arc::clone(&catalog))?);
    let store = Arc::new(RealTimeStore::new(&catalog));

    let widget_config = config.widget_config()?;
    let mut graph = load_widgets(&widget_config, &catalog, &WidgetRegistry::with_stock_widgets())
        .context("Failed to load widget configuration")?;
    info!("Loaded {} widgets", graph.len());

    let opener = transport_opener(&config)?;
    let mut listener = CanListener::spawn(
        config.listener_config(),
        Arc::clone(&resolver),
        Arc::clone(&store),
        opener,
    )?;

    if listener.wait_until_settled(BIND_TIMEOUT) == ListenerStatus::Error {
        let reason = listener.last_error().unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("CAN listener on {} failed: {}", listener.interface(), reason);
    }
    info!("CAN listener on {} is {}", listener.interface(), listener.status());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(config.poll_interval());
    let mut canvas = DrawList::new();
    let mut store_degraded = false;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                // Healthy signals are already delivered when a cell reports poisoning
                let redraw = match graph.refresh(&store) {
                    Ok(fresh) => fresh > 0,
                    Err(e) => {
                        if !store_degraded {
                            warn!("Real-time store degraded: {}", e);
                            store_degraded = true;
                        }
                        true
                    }
                };
                if redraw {
                    canvas.clear();
                    let drawn = graph.draw(&mut canvas);
                    debug!("{} widgets drawn, {} draw commands", drawn, canvas.commands.len());
                }

                let status = listener.status();
                if status.is_terminal() {
                    match listener.last_error() {
                        Some(reason) => warn!("CAN listener stopped ({}): {}", status, reason),
                        None => warn!("CAN listener stopped ({})", status),
                    }
                    break;
                }
            }
        }
    }

    if !listener.join(config.join_timeout()) {
        warn!("Listener thread still running at exit");
    }

    let stats = listener.stats().snapshot();
    info!(
        "Received {} frames ({} rejected, {} unknown), wrote {} signal values, {} read errors",
        stats.frames_received,
        stats.frames_rejected,
        stats.frames_unknown,
        stats.signals_written,
        stats.read_errors
    );
    if let Some(started) = listener.stats().started_at() {
        info!("Listening since {}", started.to_rfc3339());
    }

    Ok(())
}

/// Decide which transport the listener thread opens
fn transport_opener(config: &AppConfig) -> anyhow::Result<Opener> {
    if let Some(path) = &config.replay_path {
        let bus = MockBus::from_candump_file(&config.interface, path)?
            .looping(true)
            .with_interval(config.replay_interval());
        info!("Replaying {:?} ({} frames)", path, bus.pending());
        return Ok(Box::new(move || Ok(Box::new(bus) as Box<dyn BusTransport>)));
    }
    socket_opener(config)
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
fn socket_opener(config: &AppConfig) -> anyhow::Result<Opener> {
    use flex_ic::hardware::SocketCanBus;

    let interface = config.interface.clone();
    let read_timeout = config.read_timeout();
    Ok(Box::new(move || {
        let bus = SocketCanBus::open(&interface, read_timeout)?;
        Ok(Box::new(bus) as Box<dyn BusTransport>)
    }))
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
fn socket_opener(config: &AppConfig) -> anyhow::Result<Opener> {
    Err(flex_ic::IcError::Socket(format!(
        "cannot open '{}': built without SocketCAN support, set replay_path to replay a candump log",
        config.interface
    ))
    .into())
}
