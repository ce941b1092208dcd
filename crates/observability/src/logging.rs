//! Structured Logging fuer voxhall via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (Vorrang vor der Konfigurationsdatei):
//! - `VX_LOG_LEVEL`: Level oder vollstaendige EnvFilter-Direktive
//! - `VX_LOG_FORMAT`: `text` oder `json`
//!
//! Ein blosses Level gilt nur fuer die voxhall-Crates, Abhaengigkeiten
//! loggen ab `warn`. Raum-Aktionen und Pool-Durchlaeufe laufen in eigenen
//! Spans (`aktion`, `pool`); im JSON-Format haengen deren Felder an jeder
//! Zeile.

use std::fmt::Display;
use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LEVEL: &str = "VX_LOG_LEVEL";
const ENV_FORMAT: &str = "VX_LOG_FORMAT";

/// Crates, auf die sich ein blosses Level bezieht
const VOXHALL_CRATES: [&str; 4] = [
    "voxhall_core",
    "voxhall_rooms",
    "voxhall_observability",
    "voxhall_server",
];

/// Ausgabeformat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parsen(format: &str) -> Option<Self> {
        match format {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Initialisiert das Logging-System.
///
/// Darf pro Prozess nur einmal aufgerufen werden. Faellt auf `info` / `text`
/// zurueck, wenn weder Umgebung noch Parameter etwas Gueltiges liefern.
pub fn logging_initialisieren(level: &str, format: &str) {
    let level = std::env::var(ENV_LEVEL).unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(filter_direktive(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_direktive("info")));

    let format = std::env::var(ENV_FORMAT)
        .ok()
        .and_then(|f| LogFormat::parsen(&f))
        .or_else(|| LogFormat::parsen(format))
        .unwrap_or(LogFormat::Text);

    match format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        LogFormat::Text => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Macht aus einem blossen Level eine Direktive fuer die voxhall-Crates
///
/// Alles andere wird unveraendert als EnvFilter-Direktive uebernommen.
pub fn filter_direktive(level: &str) -> String {
    if !log_level_gueltig(level) {
        return level.to_string();
    }
    let mut direktive = String::from("warn");
    for krate in VOXHALL_CRATES {
        direktive.push_str(&format!(",{krate}={level}"));
    }
    direktive
}

pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Level oder Direktive laesst sich als EnvFilter parsen
pub fn log_filter_gueltig(level: &str) -> bool {
    EnvFilter::try_new(filter_direktive(level)).is_ok()
}

pub fn log_format_gueltig(format: &str) -> bool {
    LogFormat::parsen(format).is_some()
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

/// Span einer Raum-Aktion (Sperren, Kick, ...)
pub fn aktion_span(aktion: &'static str, raum: impl Display, benutzer: impl Display) -> Span {
    tracing::info_span!("aktion", aktion, raum = %raum, benutzer = %benutzer)
}

/// Span eines Pool-Durchlaufs
pub fn pool_span(ausloeser: impl Display) -> Span {
    tracing::info_span!("pool", ausloeser = %ausloeser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blosses_level_gilt_fuer_voxhall_crates() {
        let direktive = filter_direktive("debug");
        assert!(direktive.starts_with("warn,"));
        for krate in VOXHALL_CRATES {
            assert!(direktive.contains(&format!("{krate}=debug")), "{direktive}");
        }
        assert!(log_filter_gueltig("debug"));
    }

    #[test]
    fn direktive_wird_durchgereicht() {
        let direktive = "info,voxhall_rooms::pool=trace";
        assert_eq!(filter_direktive(direktive), direktive);
        assert!(log_filter_gueltig(direktive));
        assert!(!log_filter_gueltig("voxhall_rooms=laut"));
    }

    #[test]
    fn log_level_und_format() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level));
        }
        assert!(!log_level_gueltig("INFO"));
        assert_eq!(LogFormat::parsen("json"), Some(LogFormat::Json));
        assert!(log_format_gueltig("text"));
        assert!(!log_format_gueltig("xml"));
    }

    #[test]
    fn spans_tragen_raum_felder() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let span = aktion_span("sperren", "raum-1", "benutzer-1");
            let meta = span.metadata().unwrap();
            assert_eq!(meta.name(), "aktion");
            for feld in ["aktion", "raum", "benutzer"] {
                assert!(meta.fields().field(feld).is_some(), "{feld} fehlt");
            }

            let span = pool_span("start");
            assert!(span.metadata().unwrap().fields().field("ausloeser").is_some());
        });
    }
}
