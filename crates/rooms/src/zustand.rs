//! Sperr-Zustandsmaschine eines Raums
//!
//! Zwei unabhaengige Achsen pro Raum: Verbinden gesperrt (Lock) und
//! Sprechen gesperrt (Stream-/Mute-Lock). Vier Kombinationen, kein
//! Endzustand. Der Zustand wird ausschliesslich aus dem Default-Eintrag der
//! Overwrites abgeleitet und nie separat gespeichert.
//!
//! ```text
//!                Sperren / Entsperren
//!   (offen, laut) <------------------> (gesperrt, laut)
//!        ^                                   ^
//!        | StreamSperren / StreamEntsperren  |
//!        v                                   v
//!   (offen, stumm) <-----------------> (gesperrt, stumm)
//! ```
//!
//! Doppelte oder sich ueberholende Knopfdruecke werden ueber eine explizite
//! Wiederholungs-Politik behandelt: trifft eine Umschaltung auf einen Raum,
//! der bereits im Zielzustand ist, wird bei interaktiven Aufrufen genau
//! einmal die Gegenaktion probiert.

use serde::{Deserialize, Serialize};
use std::future::Future;
use voxhall_core::types::EntitaetId;

use crate::aktionen::Ablehnung;
use crate::error::RaumResult;
use crate::overwrite::{eintrag_von, OverwriteEintrag, Recht};

/// Abgeleiteter Sperrzustand eines Raums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sperrzustand {
    pub verbindung_gesperrt: bool,
    pub sprechen_gesperrt: bool,
}

impl Sperrzustand {
    /// Leitet den Zustand aus dem Default-Eintrag ab
    pub fn aus_overwrites(eintraege: &[OverwriteEintrag], default: EntitaetId) -> Self {
        match eintrag_von(eintraege, default) {
            Some(e) => Self {
                verbindung_gesperrt: e.verweigert(Recht::Verbinden),
                sprechen_gesperrt: e.verweigert(Recht::Sprechen),
            },
            None => Self::default(),
        }
    }

    /// Zustand nach erfolgreicher Umschaltung
    pub fn nach(self, aktion: Umschaltung) -> Self {
        match aktion {
            Umschaltung::Sperren => Self {
                verbindung_gesperrt: true,
                ..self
            },
            Umschaltung::Entsperren => Self {
                verbindung_gesperrt: false,
                ..self
            },
            Umschaltung::StreamSperren => Self {
                sprechen_gesperrt: true,
                ..self
            },
            Umschaltung::StreamEntsperren => Self {
                sprechen_gesperrt: false,
                ..self
            },
        }
    }
}

/// Umschaltende Aktionen auf einer der beiden Achsen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Umschaltung {
    Sperren,
    Entsperren,
    StreamSperren,
    StreamEntsperren,
}

impl Umschaltung {
    pub fn gegenteil(self) -> Self {
        match self {
            Self::Sperren => Self::Entsperren,
            Self::Entsperren => Self::Sperren,
            Self::StreamSperren => Self::StreamEntsperren,
            Self::StreamEntsperren => Self::StreamSperren,
        }
    }

    /// Ist der Zielzustand dieser Aktion bereits erreicht?
    pub fn ist_erfuellt(self, zustand: Sperrzustand) -> bool {
        match self {
            Self::Sperren => zustand.verbindung_gesperrt,
            Self::Entsperren => !zustand.verbindung_gesperrt,
            Self::StreamSperren => zustand.sprechen_gesperrt,
            Self::StreamEntsperren => !zustand.sprechen_gesperrt,
        }
    }

    /// Ablehnung, wenn der Zielzustand bereits besteht
    pub fn bereits_ablehnung(self) -> Ablehnung {
        match self {
            Self::Sperren => Ablehnung::BereitsGesperrt,
            Self::Entsperren => Ablehnung::NichtGesperrt,
            Self::StreamSperren => Ablehnung::BereitsStreamGesperrt,
            Self::StreamEntsperren => Ablehnung::NichtStreamGesperrt,
        }
    }
}

impl std::fmt::Display for Umschaltung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sperren => write!(f, "sperren"),
            Self::Entsperren => write!(f, "entsperren"),
            Self::StreamSperren => write!(f, "stream_sperren"),
            Self::StreamEntsperren => write!(f, "stream_entsperren"),
        }
    }
}

/// Wie auf "bereits im Zielzustand" reagiert wird
///
/// Wird einmal am Einstiegspunkt aus der Aufrufart abgeleitet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Politik {
    /// Direkter Befehl: sofort "bereits ..." melden
    OhneGegenversuch,
    /// Interaktiver Knopf: einmal die Gegenaktion probieren
    MitGegenversuch,
}

/// Womit ein "bereits im Zustand" aufgeloest wurde
///
/// Ohne Wiederherstellung bleibt es bei der typisierten "bereits"-Ablehnung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Wiederherstellung {
    /// Die Gegenaktion wurde angewendet (Knopf wirkte als Umschalter)
    Gegenaktion,
}

/// Ergebnis eines Umschalt-Versuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Versuch {
    Angewendet,
    BereitsImZustand {
        wiederhergestellt_durch: Wiederherstellung,
    },
}

/// Ergebnis einer einzelnen Ausfuehrung ohne Wiederholungs-Politik
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Einzelversuch {
    Angewendet,
    BereitsImZustand(Ablehnung),
    Abgelehnt(Ablehnung),
}

/// Fuehrt eine Umschaltung unter der gegebenen Politik aus
///
/// `einmal` fuehrt genau eine Umschaltung gegen einen frisch gelesenen
/// Zustand aus. Die Gegenversuch wird hoechstens einmal versucht; meldet auch
/// sie "bereits im Zustand" oder eine Ablehnung, bleibt es bei der
/// urspruenglichen "bereits"-Ablehnung.
pub async fn versuchen<F, Fut>(
    aktion: Umschaltung,
    politik: Politik,
    mut einmal: F,
) -> RaumResult<Result<Versuch, Ablehnung>>
where
    F: FnMut(Umschaltung) -> Fut,
    Fut: Future<Output = RaumResult<Einzelversuch>>,
{
    let bereits = match einmal(aktion).await? {
        Einzelversuch::Angewendet => return Ok(Ok(Versuch::Angewendet)),
        Einzelversuch::Abgelehnt(ablehnung) => return Ok(Err(ablehnung)),
        Einzelversuch::BereitsImZustand(ablehnung) => ablehnung,
    };

    match politik {
        Politik::OhneGegenversuch => Ok(Err(bereits)),
        Politik::MitGegenversuch => match einmal(aktion.gegenteil()).await? {
            Einzelversuch::Angewendet => {
                tracing::debug!(aktion = %aktion, "Gegenaktion als Wiederherstellung angewendet");
                Ok(Ok(Versuch::BereitsImZustand {
                    wiederhergestellt_durch: Wiederherstellung::Gegenaktion,
                }))
            }
            _ => Ok(Err(bereits)),
        },
    }
}
