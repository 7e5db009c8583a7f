use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bus::HttpBusClient;
use catalog::{Catalog, Translations};
use clap::Parser;
use controller::{AppIdentity, GamesController};
use tracing::{error, info};

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the settings file; a missing file falls back to defaults.
    #[arg(long, default_value = "gamesd.toml")]
    config: PathBuf,
}

#[derive(Clone)]
struct ContentState {
    catalog: Catalog,
    games_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    let settings = load_settings(&args.config);

    let catalog = Catalog::scan(std::path::Path::new(&settings.games_dir))?;
    info!(
        games = catalog.entries().len(),
        dir = %settings.games_dir,
        "catalog loaded"
    );
    let translations = Translations::load_dir(std::path::Path::new(&settings.locales_dir))?;

    let addr: SocketAddr = settings
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.bind))?;

    let identity = AppIdentity {
        topic: settings.topic.clone(),
        subscriber: settings.subscriber.clone(),
        resources: settings.resources.clone(),
        resource_topics: settings.resource_topics.clone(),
        public_host: settings.public_host.clone(),
        public_port: addr.port(),
        img_root: settings.img_root.clone(),
        strict_resource_subscriptions: settings.strict_resource_subscriptions,
    };

    let content_state = ContentState {
        catalog: catalog.clone(),
        games_dir: settings.games_dir.clone().into(),
    };
    let app = content_router(content_state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "content server listening");
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            error!(%error, "content server failed");
        }
    });

    let (bus, deliveries) = HttpBusClient::new(settings.bus_url.clone());
    info!(bus_url = %settings.bus_url, topic = %settings.topic, "starting controller");
    let controller = Arc::new(GamesController::new(bus, catalog, translations, identity));
    controller.run(deliveries).await?;
    Ok(())
}

fn content_router(state: ContentState) -> Router {
    Router::new()
        .route("/:file", get(serve_game))
        .with_state(state)
}

/// Serve one catalog file. Anything not in the catalog is a 404, which also
/// keeps requests from reaching outside the games directory.
async fn serve_game(
    State(state): State<ContentState>,
    Path(file): Path<String>,
) -> impl IntoResponse {
    if !state.catalog.contains_file(&file) {
        return (StatusCode::NOT_FOUND, "404 Not Found\n").into_response();
    }
    let path = state.games_dir.join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(error) => {
            error!(file = %file, %error, "failed to read game file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
