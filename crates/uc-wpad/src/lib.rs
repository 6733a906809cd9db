//! Inline proxy auto-config (PAC) server for `/wpad.dat`.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const PAC_CONTENT_TYPE: &str = "application/x-ns-proxy-autoconfig";

#[derive(Clone)]
pub struct WpadState {
    pac: Arc<str>,
}

impl WpadState {
    pub fn new(pac: impl Into<Arc<str>>) -> Self {
        Self { pac: pac.into() }
    }

    /// Whether a PAC script is available to serve.
    pub fn is_inline(&self) -> bool {
        !self.pac.is_empty()
    }
}

pub fn router(state: WpadState) -> Router {
    Router::new()
        .route("/wpad.dat", get(wpad_dat))
        .with_state(state)
}

async fn wpad_dat(State(state): State<WpadState>) -> Response {
    if !state.is_inline() {
        warn!("WPAD inline request rejected (feature disabled)");
        return (StatusCode::NOT_FOUND, "Inline WPAD disabled").into_response();
    }

    (
        [
            (header::CONTENT_TYPE, PAC_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        state.pac.to_string(),
    )
        .into_response()
}

/// Serve `/wpad.dat` on `0.0.0.0:port` until the listener fails.
pub async fn run_wpad_server(port: u16, state: WpadState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "WPAD HTTP server listening on {} (inline {}, PAC length {} bytes)",
        addr,
        if state.is_inline() { "enabled" } else { "disabled" },
        state.pac.len()
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}
