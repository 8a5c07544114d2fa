use clap::Parser;
use tavern::{RelayConfig, TavernServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::parse();
    let addr = config.bind_addr();
    info!(%addr, store = ?config.store, "starting tavern relay");

    let store = match config.open_store().await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open snapshot store");
            std::process::exit(1);
        }
    };
    let backend = store.name();

    let server = match TavernServer::builder().bind(&addr).build(store).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, store = backend, "failed to start relay");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "relay stopped");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
