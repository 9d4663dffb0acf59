//! Podmesh daemon entry point.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::signal;

use podmesh::config::Config;
use podmesh::http::{self, AppState, HttpPodClient};
use podmesh::pod::Pod;
use podmesh::store::JsonStore;
use podmesh::swarm::HttpSwarm;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting podmesh with config: {:?}", cfg);
    let settings = cfg.pod_settings()?;

    // Persistence, payload transfer and the client used to reach friends
    let store = JsonStore::open(&cfg.data_dir).await?;
    let transfer_timeout = settings.fetch_timeout.unwrap_or(Duration::from_secs(3600));
    let swarm = Arc::new(HttpSwarm::new(
        settings.url.clone(),
        cfg.data_dir.join("downloads"),
        transfer_timeout,
    )?);
    let client = Arc::new(HttpPodClient::new(settings.request_timeout)?);

    let pod = Pod::open(settings, store, swarm.clone(), client).await?;

    // HTTP server
    let listener = TcpListener::bind(cfg.listen).await?;
    let state = AppState {
        pod: Arc::clone(&pod),
        swarm: Some(swarm),
        uploads: cfg.data_dir.join("videos"),
    };
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = http::serve(listener, state, shutdown).await {
            error!("HTTP server failed: {}", e);
        }
    });

    // Befriend the configured seeds once the server is accepting
    if cfg.make_friends_on_start {
        let pod_for_friends = Arc::clone(&pod);
        tokio::spawn(async move {
            match pod_for_friends.make_friends().await {
                Ok(friends) => info!("Befriended {} seed pods", friends.len()),
                Err(e) => warn!("Could not make friends on start: {}", e),
            }
        });
    }

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    let _ = stop_tx.send(());
    if let Err(e) = server_handle.await {
        error!("HTTP server task panicked: {}", e);
    }
    pod.shutdown(SHUTDOWN_GRACE).await?;

    info!("Shutdown complete.");
    Ok(())
}
