//! Prometheus-kompatible Metriken fuer die Raum-Engine
//!
//! Registrierte Metriken:
//! - `voxhall_raeume_offen` – Gauge: Nicht reservierte Raeume in der verwalteten Kategorie
//! - `voxhall_raeume_erstellt_total` – Counter: Vom Pool angelegte Raeume
//! - `voxhall_raeume_geloescht_total` – Counter: Vom Pool geloeschte Raeume
//! - `voxhall_pool_durchlaeufe_total` – Counter: Pool-Durchlaeufe (ergebnis)
//! - `voxhall_pool_durchlauf_sekunden` – Histogram: Dauer eines Pool-Durchlaufs
//! - `voxhall_aktionen_total` – Counter: Raum-Aktionen (aktion, ergebnis)
//! - `voxhall_commit_konflikte_total` – Counter: Versionskonflikte beim Schreiben
//! - `voxhall_auswahl_abgelaufen_total` – Counter: Ziel-Auswahlen ohne Antwort

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Raum-Metriken in einer eigenen Registry
#[derive(Clone)]
pub struct RaumMetriken {
    pub registry: Arc<Registry>,

    // Pool
    pub raeume_offen: IntGauge,
    pub raeume_erstellt_total: IntCounter,
    pub raeume_geloescht_total: IntCounter,
    pub pool_durchlaeufe_total: IntCounterVec,
    pub pool_durchlauf_sekunden: Histogram,

    // Aktionen
    pub aktionen_total: IntCounterVec,
    pub commit_konflikte_total: IntCounter,
    pub auswahl_abgelaufen_total: IntCounter,
}

impl RaumMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Pool ---
        let raeume_offen = IntGauge::with_opts(Opts::new(
            "voxhall_raeume_offen",
            "Nicht reservierte Raeume in der verwalteten Kategorie",
        ))?;
        registry.register(Box::new(raeume_offen.clone()))?;

        let raeume_erstellt_total = IntCounter::with_opts(Opts::new(
            "voxhall_raeume_erstellt_total",
            "Vom Pool angelegte Raeume",
        ))?;
        registry.register(Box::new(raeume_erstellt_total.clone()))?;

        let raeume_geloescht_total = IntCounter::with_opts(Opts::new(
            "voxhall_raeume_geloescht_total",
            "Vom Pool geloeschte Raeume",
        ))?;
        registry.register(Box::new(raeume_geloescht_total.clone()))?;

        let pool_durchlaeufe_total = IntCounterVec::new(
            Opts::new(
                "voxhall_pool_durchlaeufe_total",
                "Pool-Durchlaeufe nach Ergebnis",
            ),
            &["ergebnis"],
        )?;
        registry.register(Box::new(pool_durchlaeufe_total.clone()))?;

        let pool_durchlauf_sekunden = Histogram::with_opts(
            HistogramOpts::new(
                "voxhall_pool_durchlauf_sekunden",
                "Dauer eines Pool-Durchlaufs in Sekunden",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(pool_durchlauf_sekunden.clone()))?;

        // --- Aktionen ---
        let aktionen_total = IntCounterVec::new(
            Opts::new("voxhall_aktionen_total", "Raum-Aktionen nach Ergebnis"),
            &["aktion", "ergebnis"],
        )?;
        registry.register(Box::new(aktionen_total.clone()))?;

        let commit_konflikte_total = IntCounter::with_opts(Opts::new(
            "voxhall_commit_konflikte_total",
            "Versionskonflikte beim Schreiben der Overwrites",
        ))?;
        registry.register(Box::new(commit_konflikte_total.clone()))?;

        let auswahl_abgelaufen_total = IntCounter::with_opts(Opts::new(
            "voxhall_auswahl_abgelaufen_total",
            "Ziel-Auswahlen, die ohne Antwort abgelaufen sind",
        ))?;
        registry.register(Box::new(auswahl_abgelaufen_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            raeume_offen,
            raeume_erstellt_total,
            raeume_geloescht_total,
            pool_durchlaeufe_total,
            pool_durchlauf_sekunden,
            aktionen_total,
            commit_konflikte_total,
            auswahl_abgelaufen_total,
        })
    }

    /// Zaehlt eine abgeschlossene Raum-Aktion
    pub fn aktion_zaehlen(&self, aktion: &str, ergebnis: &str) {
        self.aktionen_total
            .with_label_values(&[aktion, ergebnis])
            .inc();
    }

    /// Zaehlt einen Pool-Durchlauf ("ausgefuehrt", "uebersprungen", "fehler")
    pub fn durchlauf_zaehlen(&self, ergebnis: &str) {
        self.pool_durchlaeufe_total
            .with_label_values(&[ergebnis])
            .inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RaumMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RaumMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
