//! Ziel-Aufloesung fuer delegierende Aktionen
//!
//! Direkte Befehle tragen ihr Ziel bereits mit. Interaktive Aufrufe
//! (Knopfdruck) zeigen ein einmaliges Mitglieder-Auswahl-Element an und
//! warten auf genau eine Antwort des Ausstellers.
//!
//! Jede Auswahl bekommt eine eigene Korrelations-ID und wird registriert,
//! *bevor* das Element angezeigt wird, damit keine Antwort verloren geht.
//! Antworten anderer Mitglieder werden ignoriert, die Auswahl bleibt offen.
//! Antworten mit unbekannter (veralteter, bereits aufgeloester oder
//! abgelaufener) Korrelations-ID werden ebenfalls ignoriert.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use voxhall_core::types::{KorrelationsId, UserId};
use voxhall_observability::RaumMetriken;

use crate::error::RaumResult;
use crate::gateway::{AntwortKontext, RaumGateway};

/// Wie lange auf eine Auswahl gewartet wird
pub const AUSWAHL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Woher das Ziel einer Aktion kommt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zielquelle {
    /// Ziel steht im Aufruf (kann fehlen)
    Direkt(Option<UserId>),
    /// Ziel wird ueber ein Auswahl-Element erfragt
    Auswahl,
}

/// Ergebnis der Ziel-Aufloesung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aufloesung {
    Aufgeloest {
        ziel: Option<UserId>,
        /// Kontext fuer weitere Antworten (traegt ggf. die Auswahl)
        kontext: AntwortKontext,
    },
    /// Keine Antwort innerhalb von [`AUSWAHL_TIMEOUT`]
    Abgebrochen,
}

/// Offene Auswahl, wartet auf die Antwort des Ausstellers
#[derive(Debug)]
struct OffeneAuswahl {
    aussteller: UserId,
    ablauf: Instant,
    tx: oneshot::Sender<Option<UserId>>,
}

/// Loest Ziele auf und verwaltet offene Auswahlen
pub struct ZielAufloeser<G: RaumGateway> {
    gateway: Arc<G>,
    offen: DashMap<KorrelationsId, OffeneAuswahl>,
    timeout: Duration,
    metriken: RaumMetriken,
}

impl<G: RaumGateway> ZielAufloeser<G> {
    pub fn neu(gateway: Arc<G>, metriken: RaumMetriken) -> Self {
        Self::mit_timeout(gateway, metriken, AUSWAHL_TIMEOUT)
    }

    pub fn mit_timeout(gateway: Arc<G>, metriken: RaumMetriken, timeout: Duration) -> Self {
        Self {
            gateway,
            offen: DashMap::new(),
            timeout,
            metriken,
        }
    }

    /// Anzahl aktuell offener Auswahlen
    pub fn offene_auswahlen(&self) -> usize {
        self.offen.len()
    }

    /// Bestimmt das Ziel einer Aktion
    pub async fn aufloesen(
        &self,
        quelle: Zielquelle,
        aussteller: UserId,
        kontext: AntwortKontext,
        platzhalter: &str,
    ) -> RaumResult<Aufloesung> {
        match quelle {
            Zielquelle::Direkt(ziel) => Ok(Aufloesung::Aufgeloest { ziel, kontext }),
            Zielquelle::Auswahl => self.erfragen(aussteller, kontext, platzhalter).await,
        }
    }

    async fn erfragen(
        &self,
        aussteller: UserId,
        mut kontext: AntwortKontext,
        platzhalter: &str,
    ) -> RaumResult<Aufloesung> {
        let korrelation = KorrelationsId::new();
        let (tx, rx) = oneshot::channel();
        self.offen.insert(
            korrelation,
            OffeneAuswahl {
                aussteller,
                ablauf: Instant::now() + self.timeout,
                tx,
            },
        );
        kontext.auswahl = Some(korrelation);

        if let Err(e) = self
            .gateway
            .auswahl_anzeigen(&kontext, korrelation, platzhalter)
            .await
        {
            self.offen.remove(&korrelation);
            return Err(e.into());
        }
        tracing::debug!(korrelation = %korrelation, benutzer = %aussteller, "Auswahl angezeigt");

        let antwort = tokio::time::timeout(self.timeout, rx).await;
        self.offen.remove(&korrelation);

        if let Err(e) = self.gateway.auswahl_entfernen(&kontext, korrelation).await {
            tracing::warn!(korrelation = %korrelation, fehler = %e, "Auswahl konnte nicht entfernt werden");
        }

        match antwort {
            Ok(Ok(ziel)) => Ok(Aufloesung::Aufgeloest { ziel, kontext }),
            Ok(Err(_)) | Err(_) => {
                tracing::debug!(korrelation = %korrelation, "Auswahl ohne Antwort abgelaufen");
                self.metriken.auswahl_abgelaufen_total.inc();
                Ok(Aufloesung::Abgebrochen)
            }
        }
    }

    /// Nimmt eine Antwort auf ein Auswahl-Element entgegen
    ///
    /// Gibt `true` zurueck, wenn die Antwort eine offene Auswahl aufgeloest hat.
    pub fn auswahl_empfangen(
        &self,
        korrelation: KorrelationsId,
        benutzer: UserId,
        gewaehlt: Option<UserId>,
    ) -> bool {
        let jetzt = Instant::now();
        let entfernt = self
            .offen
            .remove_if(&korrelation, |_, a| a.aussteller == benutzer && a.ablauf > jetzt);

        match entfernt {
            Some((_, auswahl)) => auswahl.tx.send(gewaehlt).is_ok(),
            None => {
                if self.offen.contains_key(&korrelation) {
                    tracing::debug!(korrelation = %korrelation, benutzer = %benutzer, "Fremde oder verspaetete Antwort ignoriert");
                } else {
                    tracing::debug!(korrelation = %korrelation, "Antwort auf unbekannte Auswahl ignoriert");
                }
                false
            }
        }
    }
}
