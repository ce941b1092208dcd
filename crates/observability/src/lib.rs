//! # voxhall-observability
//!
//! Observability-Crate fuer voxhall:
//! - Prometheus-kompatible Raum-Metriken (`/metrics`)
//! - Structured Logging via tracing-subscriber, Spans fuer Aktionen und Pool

pub mod logging;
pub mod metrics;

pub use logging::{aktion_span, logging_initialisieren, pool_span};
pub use metrics::{metrics_router, RaumMetriken};

use anyhow::Result;
use std::net::SocketAddr;

/// Startet den Observability-HTTP-Server
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: RaumMetriken,
) -> Result<()> {
    let app = metrics_router(metriken).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app).await?;
    Ok(())
}
