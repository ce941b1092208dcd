//! Overwrite-Algebra fuer Raum-Berechtigungen
//!
//! Berechnet aus der aktuellen Overwrite-Liste eines Raums und einer
//! geordneten Liste von Direktiven die neue, minimale Overwrite-Liste.
//!
//! Regeln (in Direktiven-Reihenfolge, spaetere Direktiven gewinnen):
//!   1. Geschuetzte Entitaeten werden uebersprungen
//!   2. Eintrag des Ziels wird gesucht oder angehaengt
//!   3. `erlauben`:   Recht in Allow, aus Deny entfernen
//!   4. `verweigern`: Recht in Deny, aus Allow entfernen
//!   5. `entfernen`:  Recht aus beiden Mengen streichen
//!
//! Am Ende werden alle Eintraege ohne Allow und ohne Deny verworfen.
//! Die Funktion ist rein; der Aufrufer schreibt das Ergebnis als ein
//! einziges atomares Replace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use voxhall_core::types::EntitaetId;

/// Einzelnes Raum-Recht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recht {
    KanalAnzeigen,
    Verbinden,
    Sprechen,
    Video,
    NachrichtenSenden,
}

impl Recht {
    /// Alle bekannten Rechte (z.B. um einen Eintrag komplett zu entfernen)
    pub const ALLE: [Recht; 5] = [
        Recht::KanalAnzeigen,
        Recht::Verbinden,
        Recht::Sprechen,
        Recht::Video,
        Recht::NachrichtenSenden,
    ];
}

impl std::fmt::Display for Recht {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KanalAnzeigen => write!(f, "KanalAnzeigen"),
            Self::Verbinden => write!(f, "Verbinden"),
            Self::Sprechen => write!(f, "Sprechen"),
            Self::Video => write!(f, "Video"),
            Self::NachrichtenSenden => write!(f, "NachrichtenSenden"),
        }
    }
}

/// Overwrite-Eintrag einer Entitaet in einem Raum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteEintrag {
    pub id: EntitaetId,
    pub erlaubt: BTreeSet<Recht>,
    pub verweigert: BTreeSet<Recht>,
}

impl OverwriteEintrag {
    /// Erstellt einen leeren Eintrag
    pub fn leer(id: EntitaetId) -> Self {
        Self {
            id,
            erlaubt: BTreeSet::new(),
            verweigert: BTreeSet::new(),
        }
    }

    /// Erstellt einen Eintrag aus Allow- und Deny-Listen
    pub fn mit(id: EntitaetId, erlaubt: &[Recht], verweigert: &[Recht]) -> Self {
        Self {
            id,
            erlaubt: erlaubt.iter().copied().collect(),
            verweigert: verweigert.iter().copied().collect(),
        }
    }

    /// Ein Eintrag ohne Allow und Deny hat keine Wirkung
    pub fn ist_leer(&self) -> bool {
        self.erlaubt.is_empty() && self.verweigert.is_empty()
    }

    pub fn erlaubt(&self, recht: Recht) -> bool {
        self.erlaubt.contains(&recht)
    }

    pub fn verweigert(&self, recht: Recht) -> bool {
        self.verweigert.contains(&recht)
    }
}

/// Eine Anweisung an die Algebra
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Direktive {
    pub ziele: Vec<EntitaetId>,
    pub erlauben: Vec<Recht>,
    pub verweigern: Vec<Recht>,
    pub entfernen: Vec<Recht>,
}

impl Direktive {
    /// Startet eine Direktive fuer die gegebenen Ziele
    pub fn fuer(ziele: impl IntoIterator<Item = EntitaetId>) -> Self {
        Self {
            ziele: ziele.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn erlauben(mut self, rechte: &[Recht]) -> Self {
        self.erlauben.extend_from_slice(rechte);
        self
    }

    pub fn verweigern(mut self, rechte: &[Recht]) -> Self {
        self.verweigern.extend_from_slice(rechte);
        self
    }

    pub fn entfernen(mut self, rechte: &[Recht]) -> Self {
        self.entfernen.extend_from_slice(rechte);
        self
    }
}

/// Entitaeten, die nie Ziel einer Direktive sein duerfen
///
/// Typischerweise der Automations-Account selbst und eine Rolle, die
/// immer Zugriff behalten muss.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeschuetzteEntitaeten(BTreeSet<EntitaetId>);

impl GeschuetzteEntitaeten {
    pub fn neu(ids: impl IntoIterator<Item = EntitaetId>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn enthaelt(&self, id: &EntitaetId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitaetId> {
        self.0.iter()
    }
}

/// Wendet Direktiven auf eine Overwrite-Liste an und gibt die neue, minimale Liste zurueck
pub fn overwrites_anwenden(
    aktuell: &[OverwriteEintrag],
    direktiven: &[Direktive],
    geschuetzt: &GeschuetzteEntitaeten,
) -> Vec<OverwriteEintrag> {
    let mut eintraege: Vec<OverwriteEintrag> = aktuell.to_vec();

    for direktive in direktiven {
        for ziel in &direktive.ziele {
            if geschuetzt.enthaelt(ziel) {
                continue;
            }

            let index = match eintraege.iter().position(|e| e.id == *ziel) {
                Some(i) => i,
                None => {
                    eintraege.push(OverwriteEintrag::leer(*ziel));
                    eintraege.len() - 1
                }
            };
            let eintrag = &mut eintraege[index];

            for recht in &direktive.erlauben {
                eintrag.verweigert.remove(recht);
                eintrag.erlaubt.insert(*recht);
            }
            for recht in &direktive.verweigern {
                eintrag.erlaubt.remove(recht);
                eintrag.verweigert.insert(*recht);
            }
            for recht in &direktive.entfernen {
                eintrag.erlaubt.remove(recht);
                eintrag.verweigert.remove(recht);
            }
        }
    }

    eintraege.retain(|e| !e.ist_leer());
    eintraege
}

/// Sucht den Eintrag einer Entitaet
pub fn eintrag_von(eintraege: &[OverwriteEintrag], id: EntitaetId) -> Option<&OverwriteEintrag> {
    eintraege.iter().find(|e| e.id == id)
}

/// Alle Entitaeten mit explizitem Allow fuer `recht`
pub fn ids_mit_erlaubnis(eintraege: &[OverwriteEintrag], recht: Recht) -> Vec<EntitaetId> {
    eintraege
        .iter()
        .filter(|e| e.erlaubt(recht))
        .map(|e| e.id)
        .collect()
}

/// Alle Entitaeten mit explizitem Deny fuer `recht`
pub fn ids_mit_verweigerung(eintraege: &[OverwriteEintrag], recht: Recht) -> Vec<EntitaetId> {
    eintraege
        .iter()
        .filter(|e| e.verweigert(recht))
        .map(|e| e.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id() -> EntitaetId {
        EntitaetId(Uuid::new_v4())
    }

    fn keine() -> GeschuetzteEntitaeten {
        GeschuetzteEntitaeten::default()
    }

    #[test]
    fn erlauben_entfernt_aus_deny() {
        let a = id();
        let aktuell = vec![OverwriteEintrag::mit(a, &[], &[Recht::Verbinden])];
        let neu = overwrites_anwenden(
            &aktuell,
            &[Direktive::fuer([a]).erlauben(&[Recht::Verbinden])],
            &keine(),
        );
        assert_eq!(neu, vec![OverwriteEintrag::mit(a, &[Recht::Verbinden], &[])]);
    }

    #[test]
    fn spaetere_direktive_gewinnt() {
        let a = id();
        let neu = overwrites_anwenden(
            &[],
            &[
                Direktive::fuer([a]).erlauben(&[Recht::Sprechen]),
                Direktive::fuer([a]).verweigern(&[Recht::Sprechen]),
            ],
            &keine(),
        );
        assert_eq!(neu, vec![OverwriteEintrag::mit(a, &[], &[Recht::Sprechen])]);
    }

    #[test]
    fn entfernen_verwirft_leeren_eintrag() {
        let a = id();
        let b = id();
        let aktuell = vec![
            OverwriteEintrag::mit(a, &[Recht::Verbinden], &[]),
            OverwriteEintrag::mit(b, &[Recht::Verbinden], &[Recht::Video]),
        ];
        let neu = overwrites_anwenden(
            &aktuell,
            &[Direktive::fuer([a, b]).entfernen(&[Recht::Verbinden])],
            &keine(),
        );
        assert_eq!(neu, vec![OverwriteEintrag::mit(b, &[], &[Recht::Video])]);
    }

    #[test]
    fn geschuetzte_entitaet_wird_uebersprungen() {
        let bot = id();
        let a = id();
        let aktuell = vec![OverwriteEintrag::mit(bot, &[Recht::Verbinden], &[])];
        let geschuetzt = GeschuetzteEntitaeten::neu([bot]);
        let neu = overwrites_anwenden(
            &aktuell,
            &[
                Direktive::fuer([bot, a]).entfernen(&Recht::ALLE),
                Direktive::fuer([bot]).verweigern(&[Recht::Verbinden]),
            ],
            &geschuetzt,
        );
        assert_eq!(neu, aktuell);
    }

    #[test]
    fn bestehende_reihenfolge_bleibt_neue_werden_angehaengt() {
        let a = id();
        let b = id();
        let c = id();
        let aktuell = vec![
            OverwriteEintrag::mit(a, &[Recht::Sprechen], &[]),
            OverwriteEintrag::mit(b, &[Recht::Sprechen], &[]),
        ];
        let neu = overwrites_anwenden(
            &aktuell,
            &[Direktive::fuer([c, a]).erlauben(&[Recht::Verbinden])],
            &keine(),
        );
        let ids: Vec<EntitaetId> = neu.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn ergebnis_enthaelt_nie_leere_eintraege() {
        let ids: Vec<EntitaetId> = (0..4).map(|_| id()).collect();
        // Vorhandener leerer Eintrag wird ebenfalls bereinigt
        let aktuell = vec![OverwriteEintrag::leer(ids[3])];
        let direktiven_folgen = vec![
            vec![Direktive::fuer(ids.clone()).erlauben(&[Recht::Verbinden])],
            vec![
                Direktive::fuer(ids.clone()).erlauben(&[Recht::Sprechen]),
                Direktive::fuer(ids.clone()).entfernen(&[Recht::Sprechen]),
            ],
            vec![
                Direktive::fuer(ids[..2].to_vec()).verweigern(&Recht::ALLE),
                Direktive::fuer(ids[1..].to_vec()).entfernen(&Recht::ALLE),
            ],
            vec![Direktive::fuer(ids.clone())],
        ];

        for direktiven in direktiven_folgen {
            let neu = overwrites_anwenden(&aktuell, &direktiven, &keine());
            assert!(neu.iter().all(|e| !e.ist_leer()), "Leerer Eintrag in {neu:?}");
            let mut gesehen = BTreeSet::new();
            assert!(neu.iter().all(|e| gesehen.insert(e.id)), "Doppelter Eintrag");
        }
    }

    #[test]
    fn erneutes_anwenden_ist_idempotent() {
        let a = id();
        let b = id();
        let default = id();
        let aktuell = vec![
            OverwriteEintrag::mit(a, &[Recht::Sprechen], &[]),
            OverwriteEintrag::mit(default, &[], &[Recht::Video]),
        ];
        let direktiven = vec![
            Direktive::fuer([a, b]).erlauben(&[Recht::Verbinden, Recht::NachrichtenSenden]),
            Direktive::fuer([default]).verweigern(&[Recht::Verbinden, Recht::NachrichtenSenden]),
            Direktive::fuer([a]).entfernen(&[Recht::Sprechen]),
        ];
        let einmal = overwrites_anwenden(&aktuell, &direktiven, &keine());
        let zweimal = overwrites_anwenden(&einmal, &direktiven, &keine());
        assert_eq!(einmal, zweimal);
    }

    #[test]
    fn hilfsfunktionen_finden_erlaubnis_und_verweigerung() {
        let a = id();
        let b = id();
        let eintraege = vec![
            OverwriteEintrag::mit(a, &[Recht::Verbinden], &[]),
            OverwriteEintrag::mit(b, &[], &[Recht::Verbinden]),
        ];
        assert_eq!(ids_mit_erlaubnis(&eintraege, Recht::Verbinden), vec![a]);
        assert_eq!(ids_mit_verweigerung(&eintraege, Recht::Verbinden), vec![b]);
        assert!(eintrag_von(&eintraege, b).is_some());
        assert!(eintrag_von(&eintraege, id()).is_none());
    }
}
