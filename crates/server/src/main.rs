mod api;
mod blob;
mod config;
mod cors;
mod error;
mod history;
mod metrics;
mod persist;
mod presence;
mod registry;
mod state;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::blob::{BlobStore, UrlSigner};
use crate::config::Config;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
};
use crate::history::HistoryStore;
use crate::persist::PersistQueue;
use crate::registry::SessionRegistry;
use crate::state::AppState;

const MAX_REQUEST_BODY_BYTES: usize = 25 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    metrics::set_global_metrics(Arc::new(metrics::ServerMetrics::default()));

    let history = match &config.database_url {
        Some(database_url) => match HistoryStore::connect(database_url).await {
            Ok(store) => store,
            Err(error) => {
                warn!(?error, "failed to connect history store, persistence disabled");
                HistoryStore::Disabled
            }
        },
        None => {
            info!("no database url configured, chat history persistence disabled");
            HistoryStore::Disabled
        }
    };

    let signer = config.url_signing_secret.as_deref().map(UrlSigner::new);
    if signer.is_none() {
        warn!("no url signing secret configured, download urls fall back to public objects");
    }
    let blobs =
        match BlobStore::local(config.blob_root.clone(), config.public_base_url.clone(), signer)
            .await
        {
            Ok(store) => Some(store),
            Err(error) => {
                warn!(?error, "failed to initialize blob store, uploads disabled");
                None
            }
        };

    let state = AppState {
        registry: Arc::new(SessionRegistry::default()),
        persist: PersistQueue::spawn(history),
        blobs,
    };
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting drawbridge server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")
}

fn build_router(state: AppState) -> Router {
    apply_middleware(Router::new().merge(ws::router(state.clone())).merge(api::router(state)))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
        .layer(cors::cors_layer())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;

    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
