//! Process entrypoint: loads configuration, wires the storage backends, and runs the
//! scheduler until told to stop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mikromon_core::alert::LoggingSink;
use mikromon_core::config::{default_config, load_config, EngineConfig};
use mikromon_core::engine::MonitoringEngine;
use mikromon_core::fanout::FanoutHub;
use mikromon_core::scheduler::Scheduler;
use mikromon_core::state::memory::InMemoryStateStore;
use mikromon_core::state::StateStore;
use mikromon_core::timeseries::memory::InMemoryTimeSeriesStore;
use mikromon_core::timeseries::TimeSeriesStore;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a TOML config file. Falls back to compiled-in defaults if omitted.
    #[clap(long, env = "MIKROMOND_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address the Prometheus exporter listens on. Requires the `prometheus` feature.
    #[clap(long, env = "MIKROMOND_METRICS_ADDR", default_value = "127.0.0.1:9898")]
    metrics_addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config: EngineConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    let config = Arc::new(config);

    #[cfg(feature = "postgres")]
    let (state_store, timeseries): (Arc<dyn StateStore>, Arc<dyn TimeSeriesStore>) = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            (
                Arc::new(mikromon_core::state::postgres::PostgresStateStore::new(pool.clone())),
                Arc::new(mikromon_core::timeseries::postgres::PostgresTimeSeriesStore::new(pool)),
            )
        }
        None => {
            log::warn!("no database_url configured; running against in-memory stores (state is not durable)");
            (Arc::new(InMemoryStateStore::new()), Arc::new(InMemoryTimeSeriesStore::new()))
        }
    };
    #[cfg(not(feature = "postgres"))]
    let (state_store, timeseries): (Arc<dyn StateStore>, Arc<dyn TimeSeriesStore>) =
        (Arc::new(InMemoryStateStore::new()), Arc::new(InMemoryTimeSeriesStore::new()));

    let sink = Arc::new(LoggingSink);
    let fanout = Arc::new(FanoutHub::new(config.clone(), state_store.clone(), timeseries.clone()));
    let supervisors: mikromon_core::supervisor::SupervisorRegistry = Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new()));
    // The query/control boundary an outer HTTP API would hold onto and call into;
    // serving that API is out of scope for this process.
    let _engine = MonitoringEngine::new(state_store.clone(), timeseries.clone(), fanout.clone(), supervisors.clone());

    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone());

    #[cfg(feature = "prometheus")]
    spawn_metrics_server(args.metrics_addr.clone(), cancel.clone());

    let scheduler = Scheduler::new(config, state_store, timeseries, sink, fanout, cancel, supervisors);
    scheduler.run().await;

    Ok(())
}

/// Mirrors the teacher's own Ctrl-C handling: a process-wide flag set from the signal
/// handler, except here it drives a `CancellationToken` so every task (not just the
/// main poll loop) observes the request cooperatively.
fn install_ctrlc_handler(cancel: CancellationToken) {
    let fired = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if !fired.swap(true, Ordering::SeqCst) {
            log::info!("received interrupt, shutting down");
            cancel.cancel();
        }
    })
    .expect("error installing Ctrl-C handler");
}

#[cfg(feature = "prometheus")]
fn spawn_metrics_server(addr: String, cancel: CancellationToken) {
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    tokio::spawn(async move {
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                log::error!("metrics server: failed to bind {addr}: {e}");
                return;
            }
        };
        log::info!("metrics server listening on {addr}");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { continue };
                    let io = TokioIo::new(stream);
                    tokio::spawn(async move {
                        let service = service_fn(mikromon_core::stats::serve_req);
                        if let Err(e) = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await {
                            log::debug!("metrics connection error: {e}");
                        }
                    });
                }
            }
        }
    });
}
