//! Gemeinsame Identifikationstypen fuer voxhall
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Erzeugt einen UUID-basierten ID-Newtype mit `new`, `inner`, `Default` und `Display`
macro_rules! id_typ {
    ($(#[$doc:meta])* $name:ident, $praefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Erstellt eine neue zufaellige ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Gibt die innere UUID zurueck
            pub fn inner(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }
    };
}

id_typ!(
    /// Eindeutige Benutzer-ID (Mitglied der Community)
    UserId,
    "user"
);

id_typ!(
    /// Eindeutige Kanal-ID (Voice-Raum oder Text-Kanal)
    ChannelId,
    "channel"
);

id_typ!(
    /// ID einer Kanal-Kategorie (Gruppe von Raeumen)
    KategorieId,
    "kategorie"
);

id_typ!(
    /// Eindeutige Server-ID
    ///
    /// Dient gleichzeitig als Schluessel der Default-Entitaet ("alle") in
    /// den Overwrites eines Raums.
    ServerId,
    "server"
);

id_typ!(
    /// ID einer Server-Rolle
    RolleId,
    "rolle"
);

id_typ!(
    /// ID einer gesendeten Nachricht (z.B. Kontrollflaeche, Hinweis)
    NachrichtId,
    "nachricht"
);

id_typ!(
    /// ID eines einzelnen Aufrufs (Slash-Befehl, Knopfdruck)
    AufrufId,
    "aufruf"
);

id_typ!(
    /// Korrelations-ID einer interaktiven Auswahl
    ///
    /// Bindet genau ein angezeigtes Auswahl-Element an genau eine Antwort.
    KorrelationsId,
    "auswahl"
);

/// Schluessel eines Overwrite-Eintrags
///
/// Overwrites koennen fuer Benutzer, Rollen oder die Default-Entitaet
/// (Server-ID) gesetzt werden. Die Plattform unterscheidet diese nur ueber
/// die ID selbst, daher ist der Schluessel eine einfache UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntitaetId(pub Uuid);

impl EntitaetId {
    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl From<UserId> for EntitaetId {
    fn from(id: UserId) -> Self {
        Self(id.0)
    }
}

impl From<ServerId> for EntitaetId {
    fn from(id: ServerId) -> Self {
        Self(id.0)
    }
}

impl From<RolleId> for EntitaetId {
    fn from(id: RolleId) -> Self {
        Self(id.0)
    }
}

impl std::fmt::Display for EntitaetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entitaet:{}", self.0)
    }
}
