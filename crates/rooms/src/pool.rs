//! Raum-Pool: haelt leere Raeume bereit und raeumt verlassene auf
//!
//! Ziel nach jedem Durchlauf: mindestens `min_leere_raeume` leere und
//! mindestens `min_raeume` nicht reservierte Raeume in der verwalteten
//! Kategorie. Offene Raeume teilen sich keine Bitrate, solange noch eine
//! Kandidaten-Bitrate frei ist.
//!
//! Es laeuft hoechstens ein Durchlauf gleichzeitig. Automatische Ausloeser
//! ueberspringen den Durchlauf, wenn bereits einer laeuft; eine explizite
//! Aktualisierung wartet stattdessen auf das Ende des laufenden Durchlaufs.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::Instrument;
use voxhall_core::event::Belegungsaenderung;
use voxhall_core::types::{ChannelId, NachrichtId};
use voxhall_observability::{pool_span, RaumMetriken};

use crate::config::RaumConfig;
use crate::error::{GatewayResult, RaumResult};
use crate::gateway::{Antwort, NeuerRaum, RaumGateway, RaumInfo};
use crate::kontrollflaeche::kontrollflaeche_rendern;

/// Name, wenn der Namenspool erschoepft ist
pub const RAUM_FEHLER_NAME: &str = "Raum-Fehler";

/// Was einen Durchlauf ausgeloest hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ausloeser {
    /// Letztes Mitglied hat diesen Raum verlassen
    LetztesMitgliedGegangen(ChannelId),
    /// Plattform-Verbindung steht
    Start,
    /// Sonstige Belegungsaenderung in einem verwalteten Raum
    Belegung,
    /// Vom Benutzer angefordert
    ExpliziteAktualisierung,
}

impl std::fmt::Display for Ausloeser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LetztesMitgliedGegangen(raum) => write!(f, "letztes_mitglied_gegangen({raum})"),
            Self::Start => write!(f, "start"),
            Self::Belegung => write!(f, "belegung"),
            Self::ExpliziteAktualisierung => write!(f, "explizite_aktualisierung"),
        }
    }
}

/// Ergebnis eines Durchlaufs
#[derive(Debug, Clone, Serialize)]
pub struct Wartungsbericht {
    pub ausloeser: Ausloeser,
    pub geloescht: Vec<ChannelId>,
    pub erstellt: Vec<RaumInfo>,
    /// Nicht reservierte Raeume nach dem Durchlauf
    pub raeume: usize,
    pub leere_raeume: usize,
    pub zeitpunkt: DateTime<Utc>,
}

/// Waehlt die Bitrate fuer einen neuen Raum
///
/// Erste Kandidaten-Bitrate, die kein offener Raum nutzt; sonst zufaellig.
pub fn bitrate_waehlen<R: Rng + ?Sized>(
    kandidaten: &[u32],
    raeume: &[RaumInfo],
    rng: &mut R,
) -> Option<u32> {
    kandidaten
        .iter()
        .copied()
        .find(|b| !raeume.iter().any(|r| r.bitrate_kbps == *b))
        .or_else(|| kandidaten.choose(rng).copied())
}

/// Waehlt einen Namen, der in keinem bestehenden Raumnamen vorkommt
pub fn namen_waehlen<'a, R: Rng + ?Sized>(
    pool: &'a [String],
    raeume: &[RaumInfo],
    rng: &mut R,
) -> &'a str {
    let frei: Vec<&String> = pool
        .iter()
        .filter(|n| !raeume.iter().any(|r| r.name.contains(n.as_str())))
        .collect();
    frei.choose(rng)
        .copied()
        .map(String::as_str)
        .unwrap_or(RAUM_FEHLER_NAME)
}

/// Verwaltet den Raum-Pool einer Kategorie
pub struct PoolVerwalter<G: RaumGateway> {
    gateway: Arc<G>,
    config: Arc<RaumConfig>,
    /// Single-Flight-Sperre, der Guard lebt fuer den ganzen Durchlauf
    sperre: Mutex<()>,
    /// Raeume, in denen die Kontrollflaeche bereits gepostet wurde
    gepostet: DashSet<ChannelId>,
    metriken: RaumMetriken,
}

impl<G: RaumGateway> PoolVerwalter<G> {
    pub fn neu(gateway: Arc<G>, config: Arc<RaumConfig>, metriken: RaumMetriken) -> Self {
        Self {
            gateway,
            config,
            sperre: Mutex::new(()),
            gepostet: DashSet::new(),
            metriken,
        }
    }

    /// Plattform ist bereit: Startzustand herstellen
    pub async fn bereit(&self) -> RaumResult<Option<Wartungsbericht>> {
        self.automatisch(Ausloeser::Start).await
    }

    /// Explizite Aktualisierung, wartet auf einen laufenden Durchlauf
    pub async fn aktualisieren(&self) -> RaumResult<Wartungsbericht> {
        let _guard = self.sperre.lock().await;
        self.durchlauf(Ausloeser::ExpliziteAktualisierung).await
    }

    /// Reagiert auf eine Belegungsaenderung
    ///
    /// Gibt `None` zurueck, wenn kein Durchlauf noetig war oder er
    /// uebersprungen wurde.
    pub async fn belegung_geaendert(
        &self,
        aenderung: &Belegungsaenderung,
    ) -> RaumResult<Option<Wartungsbericht>> {
        let mut ausloeser = None;

        if let Some(raum) = aenderung.hat_verlassen() {
            match self.gateway.raum_laden(raum).await? {
                Some(info) if self.ist_verwaltet(&info) => {
                    ausloeser = Some(if info.ist_leer() {
                        Ausloeser::LetztesMitgliedGegangen(raum)
                    } else {
                        Ausloeser::Belegung
                    });
                }
                Some(_) => {}
                None => self.vergessen(raum),
            }
        }

        if let Some(raum) = aenderung.hat_betreten() {
            match self.gateway.raum_laden(raum).await? {
                Some(info) if self.ist_verwaltet(&info) => {
                    if info.mitglieder == 1 {
                        self.kontrollflaeche_posten(&info).await;
                    }
                    ausloeser.get_or_insert(Ausloeser::Belegung);
                }
                Some(_) => {}
                None => self.vergessen(raum),
            }
        }

        match ausloeser {
            Some(a) => self.automatisch(a).await,
            None => Ok(None),
        }
    }

    /// Durchlauf fuer automatische Ausloeser, ueberspringt bei belegter Sperre
    async fn automatisch(&self, ausloeser: Ausloeser) -> RaumResult<Option<Wartungsbericht>> {
        let Ok(_guard) = self.sperre.try_lock() else {
            tracing::debug!(ausloeser = %ausloeser, "Pool-Durchlauf laeuft bereits, uebersprungen");
            self.metriken.durchlauf_zaehlen("uebersprungen");
            return Ok(None);
        };
        self.durchlauf(ausloeser).await.map(Some)
    }

    /// Ein Durchlauf; der Aufrufer haelt die Sperre
    async fn durchlauf(&self, ausloeser: Ausloeser) -> RaumResult<Wartungsbericht> {
        let start = Instant::now();
        let ergebnis = self
            .durchlauf_intern(ausloeser)
            .instrument(pool_span(ausloeser))
            .await;
        self.metriken
            .pool_durchlauf_sekunden
            .observe(start.elapsed().as_secs_f64());

        match &ergebnis {
            Ok(bericht) => {
                self.metriken.durchlauf_zaehlen("ausgefuehrt");
                tracing::info!(
                    ausloeser = %ausloeser,
                    geloescht = bericht.geloescht.len(),
                    erstellt = bericht.erstellt.len(),
                    raeume = bericht.raeume,
                    leer = bericht.leere_raeume,
                    "Pool-Durchlauf abgeschlossen"
                );
            }
            Err(e) => {
                self.metriken.durchlauf_zaehlen("fehler");
                tracing::warn!(ausloeser = %ausloeser, fehler = %e, "Pool-Durchlauf fehlgeschlagen");
            }
        }
        ergebnis
    }

    async fn durchlauf_intern(&self, ausloeser: Ausloeser) -> RaumResult<Wartungsbericht> {
        let mut geloescht = Vec::new();

        if let Ausloeser::LetztesMitgliedGegangen(raum) = ausloeser {
            // Unter der Sperre erneut pruefen, inzwischen kann jemand beigetreten sein
            match self.gateway.raum_laden(raum).await? {
                Some(info) if info.ist_leer() && self.ist_verwaltet(&info) => {
                    self.raum_entfernen(&info).await?;
                    geloescht.push(raum);
                }
                Some(_) => {}
                None => self.vergessen(raum),
            }
        }

        let mut raeume: Vec<RaumInfo> = self
            .gateway
            .raeume_in_kategorie(self.config.kategorie_id)
            .await?
            .into_iter()
            .filter(|r| !self.ist_reserviert(r.id))
            .collect();
        // Anderweitig geloeschte Raeume vergessen
        self.gepostet.retain(|id| raeume.iter().any(|r| r.id == *id));

        geloescht.extend(self.ueberzaehlige_entfernen(&mut raeume).await?);

        let kandidaten = self.config.bitrate_kandidaten();
        let mut erstellt = Vec::new();
        let max_neue = self.config.min_raeume + self.config.min_leere_raeume;

        for _ in 0..max_neue {
            if self.ziel_erreicht(&raeume) {
                break;
            }

            let neu = {
                let mut rng = rand::thread_rng();
                let bitrate = bitrate_waehlen(&kandidaten, &raeume, &mut rng)
                    .unwrap_or(self.config.ersatz_bitrate_kbps);
                let name = namen_waehlen(&self.config.raum_namen, &raeume, &mut rng);
                NeuerRaum {
                    name: format!("{name} ({bitrate} kbps)"),
                    bitrate_kbps: bitrate,
                }
            };

            let info = self
                .gateway
                .raum_erstellen(self.config.kategorie_id, neu)
                .await?;
            self.metriken.raeume_erstellt_total.inc();
            tracing::info!(raum = %info.id, name = %info.name, bitrate = info.bitrate_kbps, "Raum erstellt");
            raeume.push(info.clone());
            erstellt.push(info);
        }

        let leere_raeume = raeume.iter().filter(|r| r.ist_leer()).count();
        self.metriken.raeume_offen.set(raeume.len() as i64);

        Ok(Wartungsbericht {
            ausloeser,
            geloescht,
            erstellt,
            raeume: raeume.len(),
            leere_raeume,
            zeitpunkt: Utc::now(),
        })
    }

    /// Loescht leere Raeume oberhalb des Puffers, juengste zuerst
    ///
    /// Faengt Raeume auf, deren Ausloeser uebersprungen wurde, weil gerade
    /// ein anderer Durchlauf lief. Jeder Kandidat wird vor dem Loeschen
    /// frisch geladen.
    async fn ueberzaehlige_entfernen(&self, raeume: &mut Vec<RaumInfo>) -> RaumResult<Vec<ChannelId>> {
        let mut entfernt = Vec::new();
        let kandidaten: Vec<ChannelId> = raeume
            .iter()
            .rev()
            .filter(|r| r.ist_leer())
            .map(|r| r.id)
            .collect();
        let mut leer = kandidaten.len();

        for raum in kandidaten {
            if leer <= self.config.min_leere_raeume || raeume.len() <= self.config.min_raeume {
                break;
            }
            leer -= 1;

            match self.gateway.raum_laden(raum).await? {
                Some(info) if info.ist_leer() => {
                    self.raum_entfernen(&info).await?;
                    raeume.retain(|r| r.id != raum);
                    entfernt.push(raum);
                }
                // Inzwischen belegt
                Some(info) => {
                    if let Some(r) = raeume.iter_mut().find(|r| r.id == raum) {
                        *r = info;
                    }
                }
                None => {
                    self.vergessen(raum);
                    raeume.retain(|r| r.id != raum);
                }
            }
        }
        Ok(entfernt)
    }

    async fn raum_entfernen(&self, info: &RaumInfo) -> RaumResult<()> {
        self.gateway.raum_loeschen(info.id).await?;
        self.vergessen(info.id);
        self.metriken.raeume_geloescht_total.inc();
        tracing::info!(raum = %info.id, name = %info.name, "Leeren Raum geloescht");
        Ok(())
    }

    fn vergessen(&self, raum: ChannelId) {
        self.gepostet.remove(&raum);
    }

    /// Wurde die Kontrollflaeche in diesem Raum bereits gepostet?
    pub fn kontrollflaeche_gepostet(&self, raum: ChannelId) -> bool {
        self.gepostet.contains(&raum)
    }

    fn ziel_erreicht(&self, raeume: &[RaumInfo]) -> bool {
        let leer = raeume.iter().filter(|r| r.ist_leer()).count();
        leer >= self.config.min_leere_raeume && raeume.len() >= self.config.min_raeume
    }

    fn ist_reserviert(&self, raum: ChannelId) -> bool {
        self.config.afk_raum_id == Some(raum)
    }

    /// In der verwalteten Kategorie und nicht der AFK-Raum
    fn ist_verwaltet(&self, info: &RaumInfo) -> bool {
        info.kategorie == Some(self.config.kategorie_id) && !self.ist_reserviert(info.id)
    }

    async fn kontrollflaeche_senden(&self, info: &RaumInfo) -> GatewayResult<NachrichtId> {
        let schnappschuss = self.gateway.overwrites_laden(info.id).await?;
        let flaeche = kontrollflaeche_rendern(info, &schnappschuss.eintraege, None, &self.config);
        self.gateway
            .nachricht_senden(info.id, Antwort::flaeche(flaeche))
            .await
    }

    /// Postet die Kontrollflaeche einmal pro Raum-Lebensdauer
    async fn kontrollflaeche_posten(&self, info: &RaumInfo) {
        if !self.gepostet.insert(info.id) {
            return;
        }

        let ergebnis = self.kontrollflaeche_senden(info).await;

        match ergebnis {
            Ok(nachricht) => {
                tracing::debug!(raum = %info.id, nachricht = %nachricht, "Kontrollflaeche gepostet");
            }
            Err(e) => {
                self.gepostet.remove(&info.id);
                tracing::warn!(raum = %info.id, fehler = %e, "Kontrollflaeche konnte nicht gepostet werden");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn raum(name: &str, bitrate: u32, mitglieder: usize) -> RaumInfo {
        RaumInfo {
            id: ChannelId::new(),
            name: name.into(),
            kategorie: None,
            bitrate_kbps: bitrate,
            mitglieder,
        }
    }

    #[test]
    fn erste_freie_bitrate_in_kandidaten_reihenfolge() {
        let mut rng = StdRng::seed_from_u64(7);
        let raeume = vec![raum("A", 64, 2), raum("B", 96, 0)];
        assert_eq!(bitrate_waehlen(&[64, 96, 32], &raeume, &mut rng), Some(32));
        assert_eq!(bitrate_waehlen(&[64, 96, 32], &[], &mut rng), Some(64));
    }

    #[test]
    fn alle_bitraten_belegt_zufaellige_wahl() {
        let mut rng = StdRng::seed_from_u64(7);
        let raeume = vec![raum("A", 64, 0), raum("B", 96, 0)];
        for _ in 0..20 {
            let b = bitrate_waehlen(&[64, 96], &raeume, &mut rng).unwrap();
            assert!(b == 64 || b == 96);
        }
        assert_eq!(bitrate_waehlen(&[], &raeume, &mut rng), None);
    }

    #[test]
    fn name_kommt_in_keinem_raum_vor() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool: Vec<String> = ["Salon", "Bibliothek", "Veranda"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let raeume = vec![raum("Salon (64 kbps)", 64, 1), raum("Veranda (96 kbps)", 96, 0)];
        for _ in 0..20 {
            assert_eq!(namen_waehlen(&pool, &raeume, &mut rng), "Bibliothek");
        }
    }

    #[test]
    fn erschoepfter_namenspool_liefert_fehlernamen() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = vec!["Salon".to_string()];
        let raeume = vec![raum("Salon (64 kbps)", 64, 1)];
        assert_eq!(namen_waehlen(&pool, &raeume, &mut rng), RAUM_FEHLER_NAME);
    }
}
