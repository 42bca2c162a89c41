use std::{io, sync::Arc, time::Duration};

use actix_cors::Cors;
use actix_web::{
    dev::ServerHandle,
    http::header,
    middleware::{Logger, NormalizePath},
    web, App, HttpServer,
};
use dotenv::dotenv;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod errors;
mod models;
mod services;
mod utils;

use config::{Config, ConfigError, ServerConfig};
use services::{CometRpcClient, CountdownResolver, HeightCache, NetworkDirectory, UpstreamClient};

fn build_resolver(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<CountdownResolver, ConfigError> {
    let mut clients = Vec::with_capacity(config.networks.len());
    for network in &config.networks {
        let client = CometRpcClient::new(&network.rpc, config.cache.upstream_timeout).map_err(
            |e| ConfigError::InvalidField {
                field: format!("{}.rpc", network.name),
                reason: e.to_string(),
            },
        )?;
        let client: Arc<dyn UpstreamClient> = Arc::new(client);
        clients.push((network.clone(), client));
    }

    let directory = NetworkDirectory::new(config.networks.clone())?;
    let cache = HeightCache::new(clients, config.cache.clone(), shutdown);
    Ok(CountdownResolver::new(
        directory,
        cache,
        config.default_network.clone(),
    ))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Stops the server gracefully on SIGINT/SIGTERM. Upstream refreshes still
/// running after the grace period are cancelled through `shutdown`.
async fn shutdown_on_signal(handle: ServerHandle, shutdown: CancellationToken, grace: Duration) {
    wait_for_signal().await;
    info!("Shutdown signal received, stopping server");

    let stop = handle.stop(true);
    tokio::pin!(stop);
    tokio::select! {
        _ = &mut stop => {}
        _ = tokio::time::sleep(grace) => {
            warn!("Grace period elapsed, cancelling in-flight upstream calls");
            shutdown.cancel();
            stop.await;
        }
    }
    shutdown.cancel();
    info!("Server stopped");
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let server_config = ServerConfig::from_env();
    let (config_path, config) = config::load_config(&server_config).map_err(|e| {
        error!("Failed to load config: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;
    info!(
        "Loaded {} network(s) from {}, default network {}",
        config.networks.len(),
        config_path.display(),
        config.default_network
    );

    let shutdown = CancellationToken::new();
    let resolver = build_resolver(&config, shutdown.clone()).map_err(|e| {
        error!("Invalid network configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;
    resolver.cache().warm_up(resolver.default_network()).await;
    let resolver = web::Data::new(resolver);

    info!("Starting server on {}:{}", server_config.host, config.port);
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT]);
        App::new()
            .app_data(resolver.clone())
            .wrap(NormalizePath::trim())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(api::config)
    })
    .bind((server_config.host.as_str(), config.port))?
    .shutdown_timeout(server_config.shutdown_timeout.as_secs())
    .disable_signals()
    .run();

    actix_web::rt::spawn(shutdown_on_signal(
        server.handle(),
        shutdown,
        server_config.shutdown_timeout,
    ));

    server.await
}
