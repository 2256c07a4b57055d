use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use staybook::auth::{AuthSource, OperatorAuth};
use staybook::config::Config;
use staybook::engine::{Engine, PeriodCatalog};
use staybook::model::AvailabilityPeriod;
use staybook::notify::{LogSink, NotifyHub, spawn_notifier};
use staybook::{observability, reaper, wire};

fn load_periods(config: &Config) -> Result<Vec<AvailabilityPeriod>, Box<dyn std::error::Error>> {
    let Some(path) = &config.periods_file else {
        tracing::warn!("no STAYBOOK_PERIODS_FILE set, starting with an empty catalog");
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("reading {}: {e}", path.display()))?;
    let periods = serde_json::from_str(&raw)
        .map_err(|e| format!("parsing {}: {e}", path.display()))?;
    Ok(periods)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    if let Err(e) = observability::init(config.metrics_port) {
        tracing::error!("failed to install metrics exporter: {e}");
    }

    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = PeriodCatalog::new(load_periods(&config)?);
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        catalog,
        Arc::new(NotifyHub::new()),
    )?);
    let auth: Arc<dyn AuthSource> = Arc::new(OperatorAuth::new(config.operator_password.clone()));

    spawn_notifier(&engine.notify, Arc::new(LogSink));
    tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));
    if config.auto_cancel_expired {
        tokio::spawn(reaper::run_expiry_sweeper(engine.clone(), config.sweep_interval));
    }

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("staybook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  periods: {}", engine.catalog().await.len());
    info!("  bookings: {}", engine.booking_count());
    info!("  max_connections: {max_connections}");
    info!("  auto_cancel_expired: {}", config.auto_cancel_expired);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let auth = auth.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, auth).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("staybook stopped");
    Ok(())
}
