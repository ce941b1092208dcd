//! voxhall-server – Bibliotheks-Root
//!
//! Betreibt die Raum-Engine auf dem In-Memory-Gateway. Plattform-Ereignisse
//! kommen als JSON-Zeilen ueber stdin, z.B.
//!
//! ```text
//! {"typ":"bereit"}
//! {"typ":"belegung","benutzer":"<uuid>","vorher":null,"nachher":"<uuid>"}
//! ```

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use voxhall_core::event::VoxhallEreignis;
use voxhall_observability::{observability_server_starten, RaumMetriken};
use voxhall_rooms::{Dispatcher, SpeicherGateway};

/// Dispatcher auf dem In-Memory-Gateway
pub type KonsolenDispatcher = Dispatcher<SpeicherGateway, SpeicherGateway>;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    pub gateway: Arc<SpeicherGateway>,
    pub dispatcher: Arc<KonsolenDispatcher>,
    pub metriken: RaumMetriken,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        let metriken = RaumMetriken::neu().context("Metriken konnten nicht registriert werden")?;
        let gateway = Arc::new(SpeicherGateway::neu(config.raeume.server_id));
        let dispatcher = Arc::new(Dispatcher::neu(
            gateway.clone(),
            gateway.clone(),
            config.raeume.clone(),
            metriken.clone(),
        ));
        Ok(Self {
            config,
            gateway,
            dispatcher,
            metriken,
        })
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Observability-Server starten (optional)
    /// 2. Ereignisse von stdin lesen, bis stdin endet oder Ctrl-C kommt
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            kategorie = %self.config.raeume.kategorie_id,
            min_raeume = self.config.raeume.min_raeume,
            min_leere_raeume = self.config.raeume.min_leere_raeume,
            "Server startet"
        );

        if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            let metriken = self.metriken.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let mut zeilen = BufReader::new(tokio::io::stdin()).lines();
        tracing::info!("Server laeuft. Erwarte Ereignisse auf stdin (Ctrl-C beendet)...");

        loop {
            tokio::select! {
                zeile = zeilen.next_line() => {
                    match zeile? {
                        Some(zeile) => self.zeile_einspeisen(&zeile),
                        None => {
                            tracing::info!("stdin geschlossen");
                            break;
                        }
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Parst eine Zeile und verarbeitet das Ereignis nebenlaeufig
    ///
    /// Ereignisse laufen unabhaengig voneinander, damit eine offene Auswahl
    /// die Antwort darauf nicht blockiert.
    fn zeile_einspeisen(&self, zeile: &str) {
        let zeile = zeile.trim();
        if zeile.is_empty() {
            return;
        }
        let ereignis = match ereignis_parsen(zeile) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(fehler = %e, "Zeile verworfen");
                return;
            }
        };

        let gateway = self.gateway.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = ereignis_verarbeiten(&gateway, &dispatcher, ereignis).await {
                tracing::warn!(fehler = %e, "Ereignis fehlgeschlagen");
            }
        });
    }
}

/// Parst eine JSON-Zeile als Plattform-Ereignis
pub fn ereignis_parsen(zeile: &str) -> Result<VoxhallEreignis> {
    serde_json::from_str(zeile).with_context(|| format!("Kein gueltiges Ereignis: {zeile}"))
}

/// Wendet ein Ereignis auf das In-Memory-Gateway an und reicht es weiter
///
/// Belegungsaenderungen werden zuerst im Gateway nachgezogen, damit die
/// Engine den neuen Zustand sieht, wie sie es bei einer echten Plattform tut.
pub async fn ereignis_verarbeiten(
    gateway: &SpeicherGateway,
    dispatcher: &KonsolenDispatcher,
    ereignis: VoxhallEreignis,
) -> Result<()> {
    if let VoxhallEreignis::Belegung(aenderung) = &ereignis {
        gateway.verbindung_setzen(aenderung.benutzer, aenderung.nachher);
    }

    let antworten_vorher = gateway.antworten().len();
    dispatcher.ereignis_verarbeiten(ereignis).await?;

    for (kontext, antwort) in gateway.antworten().into_iter().skip(antworten_vorher) {
        tracing::info!(
            aufruf = %kontext.aufruf,
            antwort = %serde_json::to_string(&antwort)?,
            "Antwort"
        );
    }
    Ok(())
}
