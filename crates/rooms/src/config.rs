//! Statische Konfiguration der Raum-Engine
//!
//! Wird vom Server aus dem `[raeume]`-Abschnitt der TOML-Konfiguration
//! geladen. Alle Felder haben Standardwerte, damit Tests und der
//! In-Memory-Betrieb ohne Datei auskommen.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use voxhall_core::types::{ChannelId, EntitaetId, KategorieId, RolleId, ServerId, UserId};

use crate::overwrite::GeschuetzteEntitaeten;

/// Konfiguration fuer Raum-Aktionen und Raum-Pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaumConfig {
    /// Server-ID, gleichzeitig Schluessel der Default-Entitaet ("alle")
    pub server_id: ServerId,
    /// Verwaltete Kategorie, in der der Pool Raeume anlegt und loescht
    pub kategorie_id: KategorieId,
    /// Reservierter AFK-Raum, wird nie geloescht und nicht mitgezaehlt
    pub afk_raum_id: Option<ChannelId>,
    /// Account der Automation selbst (geschuetzt)
    pub bot_id: UserId,
    /// Rolle, die immer Zugriff behalten muss (geschuetzt)
    pub immer_erlaubt_rolle: Option<RolleId>,
    /// Rollen, die in der Kontrollflaeche nicht aufgelistet werden (Moderation)
    pub ignorierte_rollen: Vec<RolleId>,
    /// Maximale Bitrate des Servers in kbit/s (abhaengig vom Boost-Level)
    pub max_bitrate_kbps: u32,
    /// Basis-Bitraten in Bevorzugungsreihenfolge
    pub bitraten_kbps: Vec<u32>,
    /// Zusaetzliche Stufe, nur verfuegbar wenn `max_bitrate_kbps` sie erlaubt
    pub boost_bitrate_kbps: u32,
    /// Ersatz-Stufe wenn die Boost-Stufe nicht verfuegbar ist
    pub ersatz_bitrate_kbps: u32,
    /// Namenspool fuer neue Raeume
    pub raum_namen: Vec<String>,
    /// Mindestanzahl leerer Raeume
    pub min_leere_raeume: usize,
    /// Mindestanzahl Raeume insgesamt
    pub min_raeume: usize,
    /// Wie lange der "du kannst beitreten"-Hinweis stehen bleibt
    pub hinweis_dauer_sek: u64,
}

impl Default for RaumConfig {
    fn default() -> Self {
        Self {
            server_id: ServerId(Uuid::nil()),
            kategorie_id: KategorieId(Uuid::nil()),
            afk_raum_id: None,
            bot_id: UserId(Uuid::nil()),
            immer_erlaubt_rolle: None,
            ignorierte_rollen: vec![],
            max_bitrate_kbps: 96,
            bitraten_kbps: vec![64, 96],
            boost_bitrate_kbps: 128,
            ersatz_bitrate_kbps: 32,
            raum_namen: [
                "Kaminzimmer",
                "Bibliothek",
                "Wintergarten",
                "Salon",
                "Weinkeller",
                "Dachboden",
                "Veranda",
                "Rauchzimmer",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_leere_raeume: 2,
            min_raeume: 3,
            hinweis_dauer_sek: 10,
        }
    }
}

impl RaumConfig {
    /// Default-Entitaet als Overwrite-Schluessel
    pub fn default_entitaet(&self) -> EntitaetId {
        self.server_id.into()
    }

    /// Geschuetzte Entitaeten: Bot und immer-erlaubt-Rolle
    pub fn geschuetzt(&self) -> GeschuetzteEntitaeten {
        let mut ids = vec![EntitaetId::from(self.bot_id)];
        if let Some(rolle) = self.immer_erlaubt_rolle {
            ids.push(rolle.into());
        }
        GeschuetzteEntitaeten::neu(ids)
    }

    /// Kandidaten-Bitraten in Bevorzugungsreihenfolge
    ///
    /// Die Boost-Stufe ist nur verfuegbar, wenn die Server-Obergrenze
    /// ueber der hoechsten Basis-Stufe liegt, sonst rueckt die Ersatz-Stufe nach.
    pub fn bitrate_kandidaten(&self) -> Vec<u32> {
        let mut kandidaten = self.bitraten_kbps.clone();
        let basis_max = kandidaten.iter().copied().max().unwrap_or(0);
        if self.max_bitrate_kbps > basis_max && self.boost_bitrate_kbps <= self.max_bitrate_kbps {
            kandidaten.push(self.boost_bitrate_kbps);
        } else {
            kandidaten.push(self.ersatz_bitrate_kbps);
        }
        kandidaten
    }

    pub fn hinweis_dauer(&self) -> Duration {
        Duration::from_secs(self.hinweis_dauer_sek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ohne_boost_rueckt_ersatz_stufe_nach() {
        let cfg = RaumConfig::default();
        assert_eq!(cfg.bitrate_kandidaten(), vec![64, 96, 32]);
    }

    #[test]
    fn mit_boost_ist_hohe_stufe_verfuegbar() {
        let cfg = RaumConfig {
            max_bitrate_kbps: 256,
            ..Default::default()
        };
        assert_eq!(cfg.bitrate_kandidaten(), vec![64, 96, 128]);
    }

    #[test]
    fn geschuetzt_enthaelt_bot_und_rolle() {
        let rolle = RolleId::new();
        let cfg = RaumConfig {
            bot_id: UserId::new(),
            immer_erlaubt_rolle: Some(rolle),
            ..Default::default()
        };
        let geschuetzt = cfg.geschuetzt();
        assert!(geschuetzt.enthaelt(&cfg.bot_id.into()));
        assert!(geschuetzt.enthaelt(&rolle.into()));
        assert!(!geschuetzt.enthaelt(&cfg.default_entitaet()));
    }

    #[test]
    fn config_aus_toml_teilweise() {
        let toml = r#"
            max_bitrate_kbps = 384
            raum_namen = ["Halle"]
        "#;
        let cfg: RaumConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_bitrate_kbps, 384);
        assert_eq!(cfg.raum_namen, vec!["Halle".to_string()]);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.min_leere_raeume, 2);
    }
}
