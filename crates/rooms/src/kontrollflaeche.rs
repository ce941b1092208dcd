//! Kontrollflaeche eines Raums
//!
//! Plattformneutrale Beschreibung der Status-Nachricht mit Feldern und
//! Knoepfen. Das Gateway entscheidet, wie daraus ein Embed o.ae. wird.

use serde::Serialize;
use std::collections::BTreeSet;
use voxhall_core::event::KnopfId;
use voxhall_core::types::{EntitaetId, UserId};

use crate::config::RaumConfig;
use crate::gateway::RaumInfo;
use crate::overwrite::{ids_mit_erlaubnis, ids_mit_verweigerung, OverwriteEintrag, Recht};
use crate::zustand::Sperrzustand;

pub const FELD_STATUS: &str = "Status";
pub const FELD_ERLAUBT: &str = "Erlaubte Nutzer";
pub const FELD_SPRECHEN: &str = "Darf sprechen";
pub const FELD_GEBANNT: &str = "Gebannte Nutzer";

const NIEMAND: &str = "Niemand";
const ALLE: &str = "Alle!";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feld {
    pub name: String,
    pub wert: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Knopf {
    pub id: KnopfId,
    pub beschriftung: String,
    pub deaktiviert: bool,
}

impl Knopf {
    fn neu(id: KnopfId, beschriftung: &str, deaktiviert: bool) -> Self {
        Self {
            id,
            beschriftung: beschriftung.to_string(),
            deaktiviert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kontrollflaeche {
    pub titel: String,
    pub beschreibung: String,
    pub status: String,
    pub felder: Vec<Feld>,
    pub knoepfe: Vec<Knopf>,
}

impl Kontrollflaeche {
    /// Wert eines Feldes nach Name
    pub fn feld(&self, name: &str) -> Option<&str> {
        self.felder
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.wert.as_str())
    }

    pub fn knopf(&self, id: KnopfId) -> Option<&Knopf> {
        self.knoepfe.iter().find(|k| k.id == id)
    }
}

/// Erwaehnung eines Mitglieds oder einer Rolle im Chat
pub fn erwaehnung(id: impl Into<EntitaetId>) -> String {
    format!("<@{}>", id.into().inner())
}

/// Statuszeile fuer einen Sperrzustand
pub fn status_text(zustand: Sperrzustand) -> &'static str {
    match (zustand.verbindung_gesperrt, zustand.sprechen_gesperrt) {
        (false, false) => "Kanal entsperrt & laut 🔓 🔊",
        (true, false) => "Kanal gesperrt 🔒 🔊",
        (false, true) => "Kanal stummgeschaltet 🔓 🔇",
        (true, true) => "Kanal gesperrt & stumm 🔒 🔇",
    }
}

/// Rendert die Kontrollflaeche aus dem aktuellen Overwrite-Schnappschuss
///
/// Default-Entitaet, geschuetzte Entitaeten, ignorierte Rollen und der
/// Betrachter selbst tauchen in keiner Liste auf.
pub fn kontrollflaeche_rendern(
    raum: &RaumInfo,
    eintraege: &[OverwriteEintrag],
    betrachter: Option<UserId>,
    config: &RaumConfig,
) -> Kontrollflaeche {
    let zustand = Sperrzustand::aus_overwrites(eintraege, config.default_entitaet());

    let mut ausgeblendet: BTreeSet<EntitaetId> = config.geschuetzt().iter().copied().collect();
    ausgeblendet.insert(config.default_entitaet());
    ausgeblendet.extend(config.ignorierte_rollen.iter().map(|r| EntitaetId::from(*r)));
    if let Some(b) = betrachter {
        ausgeblendet.insert(b.into());
    }

    let liste = |ids: Vec<EntitaetId>, leer: &str| -> String {
        let namen: Vec<String> = ids
            .into_iter()
            .filter(|id| !ausgeblendet.contains(id))
            .map(erwaehnung)
            .collect();
        if namen.is_empty() {
            leer.to_string()
        } else {
            namen.join("\n")
        }
    };

    let leer_erlaubt = if zustand.verbindung_gesperrt { NIEMAND } else { ALLE };
    let leer_sprechen = if zustand.sprechen_gesperrt { NIEMAND } else { ALLE };
    let status = status_text(zustand).to_string();

    let felder = vec![
        Feld {
            name: FELD_STATUS.into(),
            wert: status.clone(),
        },
        Feld {
            name: FELD_ERLAUBT.into(),
            wert: liste(ids_mit_erlaubnis(eintraege, Recht::Verbinden), leer_erlaubt),
        },
        Feld {
            name: FELD_SPRECHEN.into(),
            wert: liste(ids_mit_erlaubnis(eintraege, Recht::Sprechen), leer_sprechen),
        },
        Feld {
            name: FELD_GEBANNT.into(),
            wert: liste(ids_mit_verweigerung(eintraege, Recht::Verbinden), NIEMAND),
        },
    ];

    let sperr_knopf = if zustand.verbindung_gesperrt {
        Knopf::neu(KnopfId::Entsperren, "Entsperren", false)
    } else {
        Knopf::neu(KnopfId::Sperren, "Sperren", false)
    };
    let stream_knopf = if zustand.sprechen_gesperrt {
        Knopf::neu(KnopfId::StreamEntsperren, "Stream entsperren", false)
    } else {
        Knopf::neu(KnopfId::StreamSperren, "Stream sperren", false)
    };

    let knoepfe = vec![
        sperr_knopf,
        stream_knopf,
        Knopf::neu(
            KnopfId::UserErlauben,
            "Nutzer erlauben",
            !zustand.verbindung_gesperrt,
        ),
        Knopf::neu(
            KnopfId::StreamErlauben,
            "Sprechen erlauben",
            !zustand.sprechen_gesperrt,
        ),
        Knopf::neu(
            KnopfId::StreamVerbieten,
            "Sprechen verbieten",
            !zustand.sprechen_gesperrt,
        ),
        Knopf::neu(KnopfId::UserKicken, "Nutzer kicken", false),
        Knopf::neu(KnopfId::Aktualisieren, "Aktualisieren", false),
    ];

    Kontrollflaeche {
        titel: format!("Kontrollen fuer {}", raum.name),
        beschreibung: "Verwalte hier, wer diesen Kanal betreten und wer sprechen darf.".into(),
        status,
        felder,
        knoepfe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxhall_core::types::{ChannelId, RolleId, ServerId};

    fn raum() -> RaumInfo {
        RaumInfo {
            id: ChannelId::new(),
            name: "Salon (64 kbps)".into(),
            kategorie: None,
            bitrate_kbps: 64,
            mitglieder: 1,
        }
    }

    fn config() -> RaumConfig {
        RaumConfig {
            server_id: ServerId::new(),
            bot_id: UserId::new(),
            immer_erlaubt_rolle: Some(RolleId::new()),
            ignorierte_rollen: vec![RolleId::new()],
            ..Default::default()
        }
    }

    #[test]
    fn offener_raum_zeigt_alle_und_deaktivierte_knoepfe() {
        let cfg = config();
        let flaeche = kontrollflaeche_rendern(&raum(), &[], None, &cfg);
        assert_eq!(flaeche.status, "Kanal entsperrt & laut 🔓 🔊");
        assert_eq!(flaeche.feld(FELD_ERLAUBT), Some("Alle!"));
        assert_eq!(flaeche.feld(FELD_SPRECHEN), Some("Alle!"));
        assert_eq!(flaeche.feld(FELD_GEBANNT), Some("Niemand"));
        assert!(flaeche.knopf(KnopfId::Sperren).is_some());
        assert!(flaeche.knopf(KnopfId::Entsperren).is_none());
        assert!(flaeche.knopf(KnopfId::UserErlauben).unwrap().deaktiviert);
        assert!(flaeche.knopf(KnopfId::StreamErlauben).unwrap().deaktiviert);
        assert!(!flaeche.knopf(KnopfId::UserKicken).unwrap().deaktiviert);
    }

    #[test]
    fn gesperrter_stummer_raum_listet_nur_sichtbare_mitglieder() {
        let cfg = config();
        let u = UserId::new();
        let x = UserId::new();
        let eintraege = vec![
            OverwriteEintrag::mit(
                cfg.default_entitaet(),
                &[],
                &[Recht::Verbinden, Recht::Sprechen],
            ),
            OverwriteEintrag::mit(cfg.bot_id.into(), &[Recht::Verbinden], &[]),
            OverwriteEintrag::mit(
                cfg.ignorierte_rollen[0].into(),
                &[Recht::Verbinden],
                &[],
            ),
            OverwriteEintrag::mit(u.into(), &[Recht::Verbinden, Recht::Sprechen], &[]),
            OverwriteEintrag::mit(x.into(), &[Recht::Verbinden], &[]),
        ];

        let flaeche = kontrollflaeche_rendern(&raum(), &eintraege, Some(u), &cfg);
        assert_eq!(flaeche.status, "Kanal gesperrt & stumm 🔒 🔇");
        assert_eq!(flaeche.feld(FELD_ERLAUBT), Some(erwaehnung(x).as_str()));
        // Betrachter ist ausgeblendet, sonst darf niemand sprechen
        assert_eq!(flaeche.feld(FELD_SPRECHEN), Some("Niemand"));
        assert!(flaeche.knopf(KnopfId::Entsperren).is_some());
        assert!(flaeche.knopf(KnopfId::StreamEntsperren).is_some());
        assert!(!flaeche.knopf(KnopfId::UserErlauben).unwrap().deaktiviert);
        assert!(!flaeche.knopf(KnopfId::StreamVerbieten).unwrap().deaktiviert);
    }

    #[test]
    fn gebannte_nutzer_werden_gelistet() {
        let cfg = config();
        let gebannt = UserId::new();
        let eintraege = vec![OverwriteEintrag::mit(gebannt.into(), &[], &[Recht::Verbinden])];
        let flaeche = kontrollflaeche_rendern(&raum(), &eintraege, None, &cfg);
        assert_eq!(flaeche.feld(FELD_GEBANNT), Some(erwaehnung(gebannt).as_str()));
        assert!(flaeche.titel.contains("Salon"));
    }
}
