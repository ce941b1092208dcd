//! Plattform-Ereignisse
//!
//! Definiert alle Ereignisse, die die Chat-Plattform an voxhall liefert:
//! Bereit-Signal, Belegungsaenderungen von Voice-Raeumen, Slash-Befehle,
//! Knopfdruecke auf der Kontrollflaeche und Antworten auf Auswahl-Elemente.
//! Die Ereignisse sind serde-kompatibel, damit sie z.B. als JSON-Zeilen
//! eingespeist werden koennen.

use crate::types::{AufrufId, ChannelId, KorrelationsId, NachrichtId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ein Mitglied hat seinen Voice-Zustand gewechselt
///
/// `vorher` und `nachher` sind die Raeume vor und nach der Aenderung;
/// `None` bedeutet "in keinem Raum".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Belegungsaenderung {
    pub benutzer: UserId,
    pub vorher: Option<ChannelId>,
    pub nachher: Option<ChannelId>,
    #[serde(default = "Utc::now")]
    pub zeitpunkt: DateTime<Utc>,
}

impl Belegungsaenderung {
    /// Erstellt eine Belegungsaenderung mit aktuellem Zeitstempel
    pub fn neu(benutzer: UserId, vorher: Option<ChannelId>, nachher: Option<ChannelId>) -> Self {
        Self {
            benutzer,
            vorher,
            nachher,
            zeitpunkt: Utc::now(),
        }
    }

    /// Prueft ob das Mitglied einen Raum verlassen hat (Wechsel oder Trennung)
    pub fn hat_verlassen(&self) -> Option<ChannelId> {
        match (self.vorher, self.nachher) {
            (Some(alt), Some(neu)) if alt == neu => None,
            (Some(alt), _) => Some(alt),
            _ => None,
        }
    }

    /// Prueft ob das Mitglied einen Raum betreten hat
    pub fn hat_betreten(&self) -> Option<ChannelId> {
        match (self.vorher, self.nachher) {
            (Some(alt), Some(neu)) if alt == neu => None,
            (_, Some(neu)) => Some(neu),
            _ => None,
        }
    }
}

/// Knoepfe der Kontrollflaeche eines Raums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnopfId {
    Sperren,
    Entsperren,
    StreamSperren,
    StreamEntsperren,
    UserErlauben,
    StreamErlauben,
    StreamVerbieten,
    UserKicken,
    Aktualisieren,
}

impl KnopfId {
    /// Stabile Custom-ID fuer die Plattform
    pub fn custom_id(&self) -> &'static str {
        match self {
            Self::Sperren => "voice_sperren",
            Self::Entsperren => "voice_entsperren",
            Self::StreamSperren => "voice_stream_sperren",
            Self::StreamEntsperren => "voice_stream_entsperren",
            Self::UserErlauben => "voice_user_erlauben",
            Self::StreamErlauben => "voice_stream_erlauben",
            Self::StreamVerbieten => "voice_stream_verbieten",
            Self::UserKicken => "voice_user_kicken",
            Self::Aktualisieren => "voice_aktualisieren",
        }
    }
}

/// Unterbefehle des `/voice`-Slash-Befehls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unterbefehl {
    Sperren,
    Entsperren,
    StreamSperren,
    StreamEntsperren,
    Kicken,
    Kontrollen,
    Aktualisieren,
}

impl Unterbefehl {
    /// Anzeigename fuer Antworten ("sperren erfolgreich!")
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sperren => "sperren",
            Self::Entsperren => "entsperren",
            Self::StreamSperren => "streamsperren",
            Self::StreamEntsperren => "streamentsperren",
            Self::Kicken => "kicken",
            Self::Kontrollen => "kontrollen",
            Self::Aktualisieren => "aktualisieren",
        }
    }
}

/// Alle Ereignisse, die voxhall von der Plattform verarbeitet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum VoxhallEreignis {
    /// Plattform-Verbindung steht, Startzustand herstellen
    Bereit,
    /// Voice-Zustand eines Mitglieds hat sich geaendert
    Belegung(Belegungsaenderung),
    /// Slash-Befehl `/voice <unterbefehl> [user]`
    Befehl {
        aufruf: AufrufId,
        benutzer: UserId,
        /// Kanal in dem der Befehl ausgefuehrt wurde
        text_kanal: ChannelId,
        unterbefehl: Unterbefehl,
        #[serde(default)]
        ziel: Option<UserId>,
    },
    /// Knopfdruck auf einer Kontrollflaeche
    Knopf {
        aufruf: AufrufId,
        benutzer: UserId,
        /// Raum in dessen Chat die Kontrollflaeche steht
        raum: ChannelId,
        nachricht: NachrichtId,
        knopf: KnopfId,
    },
    /// Antwort auf ein Auswahl-Element
    Auswahl {
        korrelation: KorrelationsId,
        benutzer: UserId,
        #[serde(default)]
        gewaehlt: Option<UserId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wechsel_ist_verlassen_und_betreten() {
        let a = ChannelId::new();
        let b = ChannelId::new();
        let e = Belegungsaenderung::neu(UserId::new(), Some(a), Some(b));
        assert_eq!(e.hat_verlassen(), Some(a));
        assert_eq!(e.hat_betreten(), Some(b));
    }

    #[test]
    fn gleicher_raum_ist_keine_bewegung() {
        // z.B. Mute-Statuswechsel innerhalb des Raums
        let a = ChannelId::new();
        let e = Belegungsaenderung::neu(UserId::new(), Some(a), Some(a));
        assert_eq!(e.hat_verlassen(), None);
        assert_eq!(e.hat_betreten(), None);
    }

    #[test]
    fn ereignis_aus_json_zeile() {
        let json = r#"{"typ":"knopf","aufruf":"00000000-0000-0000-0000-000000000001",
            "benutzer":"00000000-0000-0000-0000-000000000002",
            "raum":"00000000-0000-0000-0000-000000000003",
            "nachricht":"00000000-0000-0000-0000-000000000004",
            "knopf":"stream_sperren"}"#;
        let ereignis: VoxhallEreignis = serde_json::from_str(json).unwrap();
        assert!(matches!(
            ereignis,
            VoxhallEreignis::Knopf {
                knopf: KnopfId::StreamSperren,
                ..
            }
        ));
    }

    #[test]
    fn belegung_ohne_zeitpunkt_wird_ergaenzt() {
        let json = r#"{"typ":"belegung","benutzer":"00000000-0000-0000-0000-000000000002",
            "vorher":null,"nachher":"00000000-0000-0000-0000-000000000003"}"#;
        let ereignis: VoxhallEreignis = serde_json::from_str(json).unwrap();
        let VoxhallEreignis::Belegung(b) = ereignis else {
            panic!("Erwartete Belegung");
        };
        assert!(b.hat_betreten().is_some());
    }
}
