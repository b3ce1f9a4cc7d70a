use budget_sync::{
    config::{self, database},
    core::{
        connectivity::{ConnectivityMonitor, ConnectivitySignal, SessionProvider, StaticSession},
        events::SyncEvent,
        remote::HttpApiClient,
        sync::SyncManager,
    },
    errors::Result,
};
use dotenvy::dotenv;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; non-fatal, env vars can be set externally
    dotenv().ok();

    // 3. Load config.toml plus environment overrides
    let app_config = config::load_app_configuration()
        .inspect_err(|e| error!("Invalid configuration: {}", e))?;
    info!("Configuration loaded");

    // 4. Open the local store
    let db = database::init_db(&app_config.database.url)
        .await
        .inspect(|_| info!("Local store ready"))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Remote API client
    let api = HttpApiClient::new(
        &app_config.api.base_url,
        app_config.api.token.as_deref(),
        Duration::from_secs(app_config.api.timeout_secs),
    )?;

    // 6. Sync engine and connectivity bridge. A headless daemon has no
    //    platform signal, so it starts online and lets requests fail instead.
    let signal = ConnectivitySignal::new(true);
    let manager = SyncManager::new(db, Arc::new(api), signal.subscribe(), app_config.sync.clone());
    let session = Arc::new(StaticSession::new(app_config.api.token.is_some()));
    let monitor = ConnectivityMonitor::spawn(
        manager.clone(),
        &signal,
        Arc::clone(&session) as Arc<dyn SessionProvider>,
        Duration::from_secs(app_config.sync.pending_poll_interval_secs),
    );

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::SyncComplete(report)) => info!(
                    total = report.total,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "Sync complete"
                ),
                Ok(SyncEvent::SyncError { error }) => error!("Sync error: {error}"),
                Ok(event) => info!(?event, "Sync event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 7. Initial pass
    if session.is_authenticated() {
        match manager.sync().await {
            Ok(outcome) => info!(?outcome, "Initial sync finished"),
            Err(e) => error!("Initial sync failed: {}", e),
        }
    } else {
        warn!("BUDGET_API_TOKEN not set, queued operations will wait for a session");
    }

    // 8. Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    monitor.shutdown().await;
    Ok(())
}
