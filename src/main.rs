use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use mimalloc::MiMalloc;

use watermark_export::config::Config;
use watermark_export::db;
use watermark_export::export::ExportContext;
use watermark_export::fetcher::HttpImageSource;
use watermark_export::routes::build_app;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env()?;
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid host address: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    info!("Starting watermark export server on {}", addr);
    info!("Database: {}", config.db_path);
    info!("Identity header: {}", config.identity_header);
    info!(
        "Export tuning: batch {}x{}, chunk {}x{}, max {} photos, fetch timeout {:?}",
        config.export.batch_size,
        config.export.batch_concurrency,
        config.export.chunk_size,
        config.export.chunk_concurrency,
        config.export.max_export_photos,
        config.export.fetch_timeout
    );

    if !is_port_available(addr) {
        error!("Port {} is already in use", config.port);
        error!(
            "You can check what's using the port with: lsof -i :{}",
            config.port
        );
        anyhow::bail!("Port {} is already in use", config.port);
    }

    let db_pool = db::create_db_pool(&config.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", config.db_path, e))?;
    info!("Database initialized successfully");

    let source = Arc::new(HttpImageSource::new(
        config.export.fetch_timeout,
        config.export.fetch_max_bytes,
    ));
    let ctx = ExportContext::new(db_pool, source, config.export.clone());

    let routes = build_app(ctx, config.identity_header.clone());

    info!("Server started successfully, listening on http://{}", addr);
    warp::serve(routes).run(addr).await;

    Ok(())
}

fn is_port_available(addr: SocketAddr) -> bool {
    TcpListener::bind(addr).is_ok()
}
