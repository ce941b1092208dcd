//! Capability-Schnittstellen zur Chat-Plattform
//!
//! Die Engine spricht nie direkt mit einem Netzwerk-Client, sondern nur mit
//! diesen Traits. Jeder Aufruf ist ein Suspendierungspunkt: zwischen zwei
//! Aufrufen koennen andere Ablaeufe (andere Raeume, andere Mitglieder im
//! selben Raum) beliebig dazwischenkommen.
//!
//! Overwrites werden immer als vollstaendiger Schnappschuss gelesen und als
//! vollstaendige Liste ersetzt. Das Ersetzen traegt die gelesene Version mit
//! (Compare-and-Swap); ist sie veraltet, meldet das Gateway
//! [`GatewayFehler::Konflikt`](crate::error::GatewayFehler::Konflikt).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use voxhall_core::types::{AufrufId, ChannelId, KategorieId, KorrelationsId, NachrichtId, UserId};

use crate::error::GatewayResult;
use crate::kontrollflaeche::Kontrollflaeche;
use crate::overwrite::{OverwriteEintrag, Recht};

/// Momentaufnahme eines Voice-Raums
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaumInfo {
    pub id: ChannelId,
    pub name: String,
    pub kategorie: Option<KategorieId>,
    pub bitrate_kbps: u32,
    /// Anzahl aktuell verbundener Mitglieder
    pub mitglieder: usize,
}

impl RaumInfo {
    pub fn ist_leer(&self) -> bool {
        self.mitglieder == 0
    }
}

/// Parameter fuer einen neu anzulegenden Raum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeuerRaum {
    pub name: String,
    pub bitrate_kbps: u32,
}

/// Versionierter Schnappschuss der Overwrites eines Raums
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverwriteSchnappschuss {
    pub version: u64,
    pub eintraege: Vec<OverwriteEintrag>,
}

/// Ort, an dem auf einen Aufruf weiter geantwortet wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AntwortKontext {
    pub aufruf: AufrufId,
    /// Nachricht mit der Kontrollflaeche (nur bei Knopfdruecken)
    pub nachricht: Option<NachrichtId>,
    /// Auswahl, ueber die das Ziel bestimmt wurde
    pub auswahl: Option<KorrelationsId>,
}

impl AntwortKontext {
    pub fn fuer_befehl(aufruf: AufrufId) -> Self {
        Self {
            aufruf,
            nachricht: None,
            auswahl: None,
        }
    }

    pub fn fuer_knopf(aufruf: AufrufId, nachricht: NachrichtId) -> Self {
        Self {
            aufruf,
            nachricht: Some(nachricht),
            auswahl: None,
        }
    }
}

/// Inhalt einer Antwort oder Nachricht
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Antwort {
    pub inhalt: Option<String>,
    pub kontrollflaeche: Option<Kontrollflaeche>,
}

impl Antwort {
    pub fn text(inhalt: impl Into<String>) -> Self {
        Self {
            inhalt: Some(inhalt.into()),
            kontrollflaeche: None,
        }
    }

    pub fn flaeche(kontrollflaeche: Kontrollflaeche) -> Self {
        Self {
            inhalt: None,
            kontrollflaeche: Some(kontrollflaeche),
        }
    }

    pub fn mit_text(mut self, inhalt: impl Into<String>) -> Self {
        self.inhalt = Some(inhalt.into());
        self
    }
}

/// Gateway-Capability: alles, was die Engine auf der Plattform tun darf
#[async_trait]
pub trait RaumGateway: Send + Sync + 'static {
    /// Laedt einen Raum (None wenn er nicht existiert)
    async fn raum_laden(&self, raum: ChannelId) -> GatewayResult<Option<RaumInfo>>;

    /// Alle Voice-Raeume einer Kategorie
    async fn raeume_in_kategorie(&self, kategorie: KategorieId) -> GatewayResult<Vec<RaumInfo>>;

    /// Aktuell verbundene Mitglieder eines Raums
    async fn mitglieder(&self, raum: ChannelId) -> GatewayResult<Vec<UserId>>;

    /// Raum, in dem ein Mitglied gerade verbunden ist
    async fn aktueller_raum(&self, benutzer: UserId) -> GatewayResult<Option<ChannelId>>;

    /// Liest den vollstaendigen Overwrite-Schnappschuss
    async fn overwrites_laden(&self, raum: ChannelId) -> GatewayResult<OverwriteSchnappschuss>;

    /// Ersetzt alle Overwrites atomar, sofern `basis_version` noch aktuell ist
    ///
    /// Gibt die neue Version zurueck.
    async fn overwrites_ersetzen(
        &self,
        raum: ChannelId,
        basis_version: u64,
        eintraege: Vec<OverwriteEintrag>,
    ) -> GatewayResult<u64>;

    /// Legt einen neuen Voice-Raum in der Kategorie an
    async fn raum_erstellen(&self, kategorie: KategorieId, neu: NeuerRaum)
        -> GatewayResult<RaumInfo>;

    async fn raum_loeschen(&self, raum: ChannelId) -> GatewayResult<()>;

    /// Trennt ein Mitglied zwangsweise vom Raum
    async fn trennen(&self, raum: ChannelId, benutzer: UserId) -> GatewayResult<()>;

    /// Sendet eine Nachricht in den Chat eines Raums
    async fn nachricht_senden(&self, kanal: ChannelId, antwort: Antwort)
        -> GatewayResult<NachrichtId>;

    async fn nachricht_loeschen(&self, kanal: ChannelId, nachricht: NachrichtId)
        -> GatewayResult<()>;

    /// Bearbeitet die Antwort auf einen Aufruf
    async fn antwort_bearbeiten(&self, kontext: &AntwortKontext, antwort: Antwort)
        -> GatewayResult<()>;

    /// Zeigt ein einmaliges Mitglieder-Auswahl-Element an
    async fn auswahl_anzeigen(
        &self,
        kontext: &AntwortKontext,
        korrelation: KorrelationsId,
        platzhalter: &str,
    ) -> GatewayResult<()>;

    /// Entfernt ein Auswahl-Element wieder
    async fn auswahl_entfernen(
        &self,
        kontext: &AntwortKontext,
        korrelation: KorrelationsId,
    ) -> GatewayResult<()>;
}

/// Berechtigungs-Capability: "hat Mitglied X im Raum Y das Recht Z?"
#[async_trait]
pub trait RechtePruefer: Send + Sync + 'static {
    async fn hat_recht(&self, raum: ChannelId, benutzer: UserId, recht: Recht)
        -> GatewayResult<bool>;
}
