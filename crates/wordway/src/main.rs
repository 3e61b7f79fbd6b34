mod bootstrap;
mod host;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use wordway_core::settings::Settings;
use wordway_runtime::api_client::HttpApiClient;
use wordway_runtime::broker::Broker;
use wordway_runtime::config_manager::ConfigManager;
use wordway_runtime::observer::SessionObserver;
use wordway_runtime::service::BrokerService;
use wordway_runtime::transport;
use wordway_store::JsonFileStore;

use crate::host::DesktopHost;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let data_dir = settings.data_dir();

    bootstrap::ensure_directories(&data_dir)?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    info!("Wordway v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        data_dir = %data_dir.display(),
        scope = %settings.storage_scope,
        caller = settings.caller_origin.as_deref().unwrap_or("-"),
        "background service configured"
    );

    let store = Arc::new(JsonFileStore::in_dir(&data_dir, settings.storage_scope.clone()));
    let config = ConfigManager::start(store);

    let api = HttpApiClient::new(settings.api_base_url.clone())?.with_config(Arc::clone(&config));
    let host = DesktopHost::new(settings.options_url.clone());
    let broker = Broker::new(Arc::new(api), Arc::clone(&config), Arc::new(host));
    let (handle, task) = BrokerService::new(Arc::new(broker)).start();

    let (observer, _subscription, mut notices) = SessionObserver::attach(&config);
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            info!(notice = %notice, "session");
        }
    });
    if let Err(e) = observer.check_session().await {
        warn!(error = %e, "session check failed");
    }

    // Stdout is the message channel; nothing else may write to it.
    tokio::select! {
        result = transport::serve(tokio::io::stdin(), tokio::io::stdout(), handle) => {
            task.abort();
            result?;
            info!("browser closed the channel; exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received; shutting down broker");
            task.abort();
        }
    }

    Ok(())
}
