use anyhow::{Context, Result};
use ide_api::{create_app, AppState, Config};
use ide_operator::{kube_triggers, Cluster, Controller};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = ide_logging::init_subscriber();

    info!("Starting ide-api service...");

    let config = Config::from_env();
    let operator = config.operator()?;
    info!(
        "Configuration loaded: bind_addr={}, mode={}, concurrency={}, resync={}s",
        config.bind_addr, operator.mode, operator.concurrency, config.resync_interval_secs
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    let cluster = Cluster::from_client(client.clone());
    let cancel = CancellationToken::new();

    // Controller and watches
    let controller = Controller::new(cluster.clone(), operator);
    let mut triggers = kube_triggers(client, &controller, cancel.clone());
    let controller_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await })
    };
    info!("Controller started");

    let app = create_app(AppState::new(&cluster));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    while triggers.join_next().await.is_some() {}
    if let Err(e) = controller_task.await {
        error!("Controller task failed: {}", e);
    }
    info!("ide-api stopped");

    Ok(())
}
