use std::process::ExitCode;
use std::sync::Arc;

use catcache::config::{Config, ConfigError};
use catcache::proxy::CacheProxy;
use catcache::server::Server;
use catcache::store::DiskStore;
use catcache::upstream::HttpUpstream;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_args(std::env::args_os()) {
        Ok(config) => config,
        Err(ConfigError::Usage(e)) => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "catcache failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = DiskStore::new(&config.cache_dir);
    store.ensure_root().await?;

    let upstream = HttpUpstream::new(&config.upstream, config.upstream_timeout)?;
    let proxy = Arc::new(CacheProxy::new(store, upstream));

    let server = Server::bind(config.listen_addr()).await?;
    server
        .run(move |request| {
            let proxy = Arc::clone(&proxy);
            async move { proxy.handle(request).await }
        })
        .await?;

    Ok(())
}
