use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use facecheck_core::{build_verifier, ImageFetcher};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod handlers;
mod page;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facecheckd starting");

    let config = config::Config::from_env()?;
    let verifier = build_verifier(&config.verifier).context("verifier initialization failed")?;
    let engine = engine::spawn_engine(verifier, config.engine_timeout())?;
    let fetcher = ImageFetcher::new(config.fetch.clone())?;

    let state = web::Data::new(handlers::AppState { fetcher, engine });
    let form_limit = config.form_limit();

    tracing::info!(host = %config.host, port = config.port, "facecheckd ready");

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(web::FormConfig::default().limit(form_limit))
            .configure(handlers::configure)
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("cannot bind {}:{}", config.host, config.port))?
    .run()
    .await?;

    tracing::info!("facecheckd shutting down");
    Ok(())
}
