//! In-Memory-Gateway
//!
//! Vollstaendige Implementierung von [`RaumGateway`] und [`RechtePruefer`]
//! ohne Plattform-Anbindung. Wird vom Server fuer den Konsolenbetrieb und
//! von den Tests als Fake-Kollaborateur verwendet. Alle schreibenden Aufrufe
//! werden in einem Protokoll festgehalten.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use voxhall_core::types::{
    AufrufId, ChannelId, EntitaetId, KategorieId, KorrelationsId, NachrichtId, RolleId, ServerId,
    UserId,
};

use crate::error::{GatewayFehler, GatewayResult};
use crate::gateway::{
    Antwort, AntwortKontext, NeuerRaum, OverwriteSchnappschuss, RaumGateway, RaumInfo,
    RechtePruefer,
};
use crate::overwrite::{eintrag_von, OverwriteEintrag, Recht};

/// Protokollierter schreibender Gateway-Aufruf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayAufruf {
    OverwritesErsetzt { raum: ChannelId, version: u64 },
    RaumErstellt { raum: ChannelId, name: String, bitrate_kbps: u32 },
    RaumGeloescht(ChannelId),
    Getrennt { raum: ChannelId, benutzer: UserId },
    NachrichtGesendet { kanal: ChannelId, nachricht: NachrichtId },
    NachrichtGeloescht { kanal: ChannelId, nachricht: NachrichtId },
    AntwortBearbeitet { aufruf: AufrufId },
    AuswahlAngezeigt(KorrelationsId),
    AuswahlEntfernt(KorrelationsId),
}

#[derive(Debug, Clone)]
struct GespeicherterRaum {
    name: String,
    kategorie: Option<KategorieId>,
    bitrate_kbps: u32,
    /// Anlage-Reihenfolge, fuer stabile Aufzaehlung
    nr: u64,
    overwrites: OverwriteSchnappschuss,
}

/// Chat-Plattform im Arbeitsspeicher
pub struct SpeicherGateway {
    server_id: ServerId,
    raeume: DashMap<ChannelId, GespeicherterRaum>,
    verbindungen: DashMap<UserId, ChannelId>,
    rollen: DashMap<UserId, Vec<RolleId>>,
    nachrichten: DashMap<NachrichtId, (ChannelId, Antwort)>,
    antworten: Mutex<Vec<(AntwortKontext, Antwort)>>,
    auswahlen: Mutex<Vec<KorrelationsId>>,
    protokoll: Mutex<Vec<GatewayAufruf>>,
    zaehler: AtomicU64,
    konflikte: AtomicU32,
    trennen_verweigert: AtomicBool,
}

impl SpeicherGateway {
    pub fn neu(server_id: ServerId) -> Self {
        Self {
            server_id,
            raeume: DashMap::new(),
            verbindungen: DashMap::new(),
            rollen: DashMap::new(),
            nachrichten: DashMap::new(),
            antworten: Mutex::new(Vec::new()),
            auswahlen: Mutex::new(Vec::new()),
            protokoll: Mutex::new(Vec::new()),
            zaehler: AtomicU64::new(0),
            konflikte: AtomicU32::new(0),
            trennen_verweigert: AtomicBool::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Zustand von aussen setzen
    // -----------------------------------------------------------------------

    /// Legt einen Raum an, ohne ihn zu protokollieren
    pub fn raum_anlegen(
        &self,
        kategorie: Option<KategorieId>,
        name: impl Into<String>,
        bitrate_kbps: u32,
    ) -> ChannelId {
        let id = ChannelId::new();
        self.raeume.insert(
            id,
            GespeicherterRaum {
                name: name.into(),
                kategorie,
                bitrate_kbps,
                nr: self.zaehler.fetch_add(1, Ordering::SeqCst),
                overwrites: OverwriteSchnappschuss::default(),
            },
        );
        id
    }

    /// Setzt den aktuellen Raum eines Mitglieds (None = getrennt)
    pub fn verbindung_setzen(&self, benutzer: UserId, raum: Option<ChannelId>) {
        match raum {
            Some(r) => {
                self.verbindungen.insert(benutzer, r);
            }
            None => {
                self.verbindungen.remove(&benutzer);
            }
        }
    }

    pub fn rolle_zuweisen(&self, benutzer: UserId, rolle: RolleId) {
        self.rollen.entry(benutzer).or_default().push(rolle);
    }

    /// Setzt Overwrites direkt (simuliert einen fremden Schreiber)
    pub fn overwrites_setzen(&self, raum: ChannelId, eintraege: Vec<OverwriteEintrag>) {
        if let Some(mut r) = self.raeume.get_mut(&raum) {
            r.overwrites.version += 1;
            r.overwrites.eintraege = eintraege;
        }
    }

    /// Die naechsten `anzahl` Schreibversuche scheitern mit einem Versionskonflikt
    pub fn konflikte_einstreuen(&self, anzahl: u32) {
        self.konflikte.store(anzahl, Ordering::SeqCst);
    }

    /// Laesst `trennen` mit fehlender Plattform-Berechtigung scheitern
    pub fn trennen_verweigern(&self, verweigern: bool) {
        self.trennen_verweigert.store(verweigern, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn eintraege(&self, raum: ChannelId) -> Vec<OverwriteEintrag> {
        self.raeume
            .get(&raum)
            .map(|r| r.overwrites.eintraege.clone())
            .unwrap_or_default()
    }

    pub fn raum_existiert(&self, raum: ChannelId) -> bool {
        self.raeume.contains_key(&raum)
    }

    /// Alle Raeume in Anlage-Reihenfolge
    pub fn alle_raeume(&self) -> Vec<RaumInfo> {
        let mut raeume: Vec<(u64, ChannelId, GespeicherterRaum)> = self
            .raeume
            .iter()
            .map(|r| (r.nr, *r.key(), r.value().clone()))
            .collect();
        raeume.sort_by_key(|(nr, _, _)| *nr);
        raeume
            .into_iter()
            .map(|(_, id, r)| self.info(id, &r))
            .collect()
    }

    pub fn protokoll(&self) -> Vec<GatewayAufruf> {
        self.protokoll.lock().clone()
    }

    /// Anzahl erfolgreicher Overwrite-Commits fuer einen Raum
    pub fn commits(&self, raum: ChannelId) -> usize {
        self.protokoll
            .lock()
            .iter()
            .filter(|a| matches!(a, GatewayAufruf::OverwritesErsetzt { raum: r, .. } if *r == raum))
            .count()
    }

    pub fn antworten(&self) -> Vec<(AntwortKontext, Antwort)> {
        self.antworten.lock().clone()
    }

    pub fn letzte_antwort(&self) -> Option<Antwort> {
        self.antworten.lock().last().map(|(_, a)| a.clone())
    }

    /// Nachrichten, die aktuell im Chat eines Raums stehen
    pub fn nachrichten_in(&self, kanal: ChannelId) -> Vec<Antwort> {
        self.nachrichten
            .iter()
            .filter(|n| n.value().0 == kanal)
            .map(|n| n.value().1.clone())
            .collect()
    }

    /// Angezeigte, noch nicht entfernte Auswahl-Elemente
    pub fn offene_auswahlen(&self) -> Vec<KorrelationsId> {
        self.auswahlen.lock().clone()
    }

    fn protokollieren(&self, aufruf: GatewayAufruf) {
        self.protokoll.lock().push(aufruf);
    }

    fn mitglieder_von(&self, raum: ChannelId) -> Vec<UserId> {
        self.verbindungen
            .iter()
            .filter(|v| *v.value() == raum)
            .map(|v| *v.key())
            .collect()
    }

    fn info(&self, id: ChannelId, raum: &GespeicherterRaum) -> RaumInfo {
        RaumInfo {
            id,
            name: raum.name.clone(),
            kategorie: raum.kategorie,
            bitrate_kbps: raum.bitrate_kbps,
            mitglieder: self.mitglieder_von(id).len(),
        }
    }

    fn raum_kopie(&self, raum: ChannelId) -> GatewayResult<GespeicherterRaum> {
        self.raeume
            .get(&raum)
            .map(|r| r.value().clone())
            .ok_or(GatewayFehler::RaumNichtGefunden(raum))
    }
}

#[async_trait]
impl RaumGateway for SpeicherGateway {
    async fn raum_laden(&self, raum: ChannelId) -> GatewayResult<Option<RaumInfo>> {
        let kopie = self.raeume.get(&raum).map(|r| r.value().clone());
        Ok(kopie.map(|r| self.info(raum, &r)))
    }

    async fn raeume_in_kategorie(&self, kategorie: KategorieId) -> GatewayResult<Vec<RaumInfo>> {
        Ok(self
            .alle_raeume()
            .into_iter()
            .filter(|r| r.kategorie == Some(kategorie))
            .collect())
    }

    async fn mitglieder(&self, raum: ChannelId) -> GatewayResult<Vec<UserId>> {
        if !self.raum_existiert(raum) {
            return Err(GatewayFehler::RaumNichtGefunden(raum));
        }
        Ok(self.mitglieder_von(raum))
    }

    async fn aktueller_raum(&self, benutzer: UserId) -> GatewayResult<Option<ChannelId>> {
        Ok(self.verbindungen.get(&benutzer).map(|r| *r.value()))
    }

    async fn overwrites_laden(&self, raum: ChannelId) -> GatewayResult<OverwriteSchnappschuss> {
        Ok(self.raum_kopie(raum)?.overwrites)
    }

    async fn overwrites_ersetzen(
        &self,
        raum: ChannelId,
        basis_version: u64,
        eintraege: Vec<OverwriteEintrag>,
    ) -> GatewayResult<u64> {
        let neue_version = {
            let mut r = self
                .raeume
                .get_mut(&raum)
                .ok_or(GatewayFehler::RaumNichtGefunden(raum))?;

            let eingestreut = self
                .konflikte
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if eingestreut {
                // Ein fremder Schreiber ist zuvorgekommen
                r.overwrites.version += 1;
            }

            if r.overwrites.version != basis_version {
                return Err(GatewayFehler::Konflikt {
                    raum,
                    erwartet: basis_version,
                    aktuell: r.overwrites.version,
                });
            }

            r.overwrites = OverwriteSchnappschuss {
                version: basis_version + 1,
                eintraege,
            };
            r.overwrites.version
        };

        self.protokollieren(GatewayAufruf::OverwritesErsetzt {
            raum,
            version: neue_version,
        });
        Ok(neue_version)
    }

    async fn raum_erstellen(&self, kategorie: KategorieId, neu: NeuerRaum) -> GatewayResult<RaumInfo> {
        let id = self.raum_anlegen(Some(kategorie), neu.name.clone(), neu.bitrate_kbps);
        self.protokollieren(GatewayAufruf::RaumErstellt {
            raum: id,
            name: neu.name.clone(),
            bitrate_kbps: neu.bitrate_kbps,
        });
        Ok(RaumInfo {
            id,
            name: neu.name,
            kategorie: Some(kategorie),
            bitrate_kbps: neu.bitrate_kbps,
            mitglieder: 0,
        })
    }

    async fn raum_loeschen(&self, raum: ChannelId) -> GatewayResult<()> {
        self.raeume
            .remove(&raum)
            .ok_or(GatewayFehler::RaumNichtGefunden(raum))?;
        self.verbindungen.retain(|_, r| *r != raum);
        self.nachrichten.retain(|_, (kanal, _)| *kanal != raum);
        self.protokollieren(GatewayAufruf::RaumGeloescht(raum));
        Ok(())
    }

    async fn trennen(&self, raum: ChannelId, benutzer: UserId) -> GatewayResult<()> {
        if self.trennen_verweigert.load(Ordering::SeqCst) {
            return Err(GatewayFehler::Verweigert("Mitglieder verschieben".into()));
        }
        self.verbindungen.remove_if(&benutzer, |_, r| *r == raum);
        self.protokollieren(GatewayAufruf::Getrennt { raum, benutzer });
        Ok(())
    }

    async fn nachricht_senden(&self, kanal: ChannelId, antwort: Antwort) -> GatewayResult<NachrichtId> {
        if !self.raum_existiert(kanal) {
            return Err(GatewayFehler::RaumNichtGefunden(kanal));
        }
        let nachricht = NachrichtId::new();
        self.nachrichten.insert(nachricht, (kanal, antwort));
        self.protokollieren(GatewayAufruf::NachrichtGesendet { kanal, nachricht });
        Ok(nachricht)
    }

    async fn nachricht_loeschen(&self, kanal: ChannelId, nachricht: NachrichtId) -> GatewayResult<()> {
        self.nachrichten.remove(&nachricht);
        self.protokollieren(GatewayAufruf::NachrichtGeloescht { kanal, nachricht });
        Ok(())
    }

    async fn antwort_bearbeiten(&self, kontext: &AntwortKontext, antwort: Antwort) -> GatewayResult<()> {
        self.antworten.lock().push((kontext.clone(), antwort));
        self.protokollieren(GatewayAufruf::AntwortBearbeitet {
            aufruf: kontext.aufruf,
        });
        Ok(())
    }

    async fn auswahl_anzeigen(
        &self,
        _kontext: &AntwortKontext,
        korrelation: KorrelationsId,
        _platzhalter: &str,
    ) -> GatewayResult<()> {
        self.auswahlen.lock().push(korrelation);
        self.protokollieren(GatewayAufruf::AuswahlAngezeigt(korrelation));
        Ok(())
    }

    async fn auswahl_entfernen(
        &self,
        _kontext: &AntwortKontext,
        korrelation: KorrelationsId,
    ) -> GatewayResult<()> {
        self.auswahlen.lock().retain(|k| *k != korrelation);
        self.protokollieren(GatewayAufruf::AuswahlEntfernt(korrelation));
        Ok(())
    }
}

#[async_trait]
impl RechtePruefer for SpeicherGateway {
    /// Effektives Recht: Default-Eintrag, dann Rollen (Deny vor Allow), dann Mitglied
    async fn hat_recht(&self, raum: ChannelId, benutzer: UserId, recht: Recht) -> GatewayResult<bool> {
        let eintraege = self.raum_kopie(raum)?.overwrites.eintraege;
        let mut erlaubt = true;

        if let Some(e) = eintrag_von(&eintraege, self.server_id.into()) {
            erlaubt = (erlaubt && !e.verweigert(recht)) || e.erlaubt(recht);
        }

        let rollen: Vec<EntitaetId> = self
            .rollen
            .get(&benutzer)
            .map(|r| r.iter().map(|id| EntitaetId::from(*id)).collect())
            .unwrap_or_default();
        let rollen_eintraege: Vec<&OverwriteEintrag> = rollen
            .iter()
            .filter_map(|id| eintrag_von(&eintraege, *id))
            .collect();
        if rollen_eintraege.iter().any(|e| e.verweigert(recht)) {
            erlaubt = false;
        }
        if rollen_eintraege.iter().any(|e| e.erlaubt(recht)) {
            erlaubt = true;
        }

        if let Some(e) = eintrag_von(&eintraege, benutzer.into()) {
            if e.verweigert(recht) {
                erlaubt = false;
            }
            if e.erlaubt(recht) {
                erlaubt = true;
            }
        }
        Ok(erlaubt)
    }
}
