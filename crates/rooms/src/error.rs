//! Fehlertypen fuer die Raum-Engine
//!
//! Ablehnungen durch Guards (falscher Sperrzustand, fehlendes Recht, ...)
//! sind keine Fehler und leben in [`crate::aktionen::Ablehnung`]. Hier stehen
//! nur echte Fehlschlaege: Capability-Fehler des Gateways und Konflikte beim
//! Schreiben der Overwrites.

use thiserror::Error;
use voxhall_core::types::{ChannelId, UserId};

/// Fehler einer Gateway-Capability (Netzwerk, fehlende Plattform-Rechte, ...)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayFehler {
    /// Raum existiert nicht (mehr)
    #[error("Raum nicht gefunden: {0}")]
    RaumNichtGefunden(ChannelId),

    /// Overwrites wurden seit dem gelesenen Schnappschuss veraendert
    #[error("Versionskonflikt in {raum}: erwartet={erwartet}, aktuell={aktuell}")]
    Konflikt {
        raum: ChannelId,
        erwartet: u64,
        aktuell: u64,
    },

    /// Plattform hat die Operation verweigert
    #[error("Plattform verweigert: {0}")]
    Verweigert(String),

    /// Netzwerk- oder sonstiger Transportfehler
    #[error("Transportfehler: {0}")]
    Transport(String),
}

impl GatewayFehler {
    /// Gibt true zurueck wenn ein erneuter Versuch mit frischem Schnappschuss sinnvoll ist
    pub fn ist_konflikt(&self) -> bool {
        matches!(self, Self::Konflikt { .. })
    }
}

/// Fehlertyp der Raum-Engine
#[derive(Debug, Error)]
pub enum RaumFehler {
    /// Capability-Fehler des Gateways
    #[error("Gateway-Fehler: {0}")]
    Gateway(#[from] GatewayFehler),

    /// Overwrites konnten auch nach mehreren Versuchen nicht geschrieben werden
    #[error("Overwrites in {raum} nach {versuche} Versuchen nicht geschrieben")]
    KonfliktErschoepft { raum: ChannelId, versuche: u32 },

    /// Kick: Trennen gescheitert, Overwrites wurden nicht angefasst
    #[error("{benutzer} konnte nicht aus {raum} getrennt werden: {quelle}")]
    TrennenFehlgeschlagen {
        raum: ChannelId,
        benutzer: UserId,
        #[source]
        quelle: GatewayFehler,
    },
}

/// Result-Typ fuer die Raum-Engine
pub type RaumResult<T> = Result<T, RaumFehler>;

/// Result-Typ fuer Gateway-Capabilities
pub type GatewayResult<T> = Result<T, GatewayFehler>;
