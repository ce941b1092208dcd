//! Vergabebuch: welche Rechte eine laufende Sperre selbst erteilt hat
//!
//! Sperren vergibt nur Rechte, die ein Eintrag noch nicht regelt, und
//! vermerkt sie hier. Entsperren nimmt genau diese Vergaben zurueck, so dass
//! vorher bestehende Allows und Denies unberuehrt bleiben. Delegationen
//! waehrend der Sperre werden ebenfalls vermerkt und beim Entsperren
//! zurueckgenommen.
//!
//! Fehlt ein Vermerk (z.B. nach einem Neustart), faellt Entsperren auf das
//! Entfernen aller expliziten Erlaubnisse zurueck.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use voxhall_core::types::{ChannelId, EntitaetId};

use crate::overwrite::{eintrag_von, OverwriteEintrag, Recht};

/// Rechte, die eine Zutritts-Sperre regelt
pub const ZUTRITT: [Recht; 2] = [Recht::Verbinden, Recht::NachrichtenSenden];

/// Rechte, die eine Stream-Sperre regelt
pub const STREAM: [Recht; 1] = [Recht::Sprechen];

/// Je Entitaet die von einer Sperre erteilten Rechte
///
/// Beim Default-Eintrag sind es die hinzugefuegten Denies, bei allen
/// anderen die hinzugefuegten Allows.
pub type Vergaben = BTreeMap<EntitaetId, BTreeSet<Recht>>;

/// Art der Sperre, unter der eine Vergabe vermerkt ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sperrart {
    Zutritt,
    Stream,
}

impl Sperrart {
    pub fn rechte(self) -> &'static [Recht] {
        match self {
            Self::Zutritt => &ZUTRITT,
            Self::Stream => &STREAM,
        }
    }
}

/// Rechte aus `rechte`, die der Eintrag von `id` weder erlaubt noch verweigert
pub fn offene_rechte(eintraege: &[OverwriteEintrag], id: EntitaetId, rechte: &[Recht]) -> Vec<Recht> {
    match eintrag_von(eintraege, id) {
        Some(e) => rechte
            .iter()
            .copied()
            .filter(|r| !e.erlaubt(*r) && !e.verweigert(*r))
            .collect(),
        None => rechte.to_vec(),
    }
}

#[derive(Debug, Default)]
pub struct Vergabebuch {
    offen: DashMap<(ChannelId, Sperrart), Vergaben>,
}

impl Vergabebuch {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Vermerkt die Vergaben einer frisch gesetzten Sperre
    pub fn eroeffnen(&self, raum: ChannelId, art: Sperrart, vergaben: Vergaben) {
        self.offen.insert((raum, art), vergaben);
    }

    /// Ergaenzt eine Delegation, sofern fuer den Raum eine Sperre vermerkt ist
    pub fn vermerken(&self, raum: ChannelId, art: Sperrart, id: EntitaetId, rechte: &[Recht]) {
        if let Some(mut vergaben) = self.offen.get_mut(&(raum, art)) {
            vergaben.entry(id).or_default().extend(rechte.iter().copied());
        }
    }

    /// Streicht Vergaben einer Entitaet, die anderweitig entfernt wurden
    pub fn streichen(&self, raum: ChannelId, id: EntitaetId, rechte: &[Recht]) {
        for art in [Sperrart::Zutritt, Sperrart::Stream] {
            if let Some(mut vergaben) = self.offen.get_mut(&(raum, art)) {
                if let Some(eigene) = vergaben.get_mut(&id) {
                    for recht in rechte {
                        eigene.remove(recht);
                    }
                    if eigene.is_empty() {
                        vergaben.remove(&id);
                    }
                }
            }
        }
    }

    pub fn ansehen(&self, raum: ChannelId, art: Sperrart) -> Option<Vergaben> {
        self.offen.get(&(raum, art)).map(|v| v.clone())
    }

    pub fn schliessen(&self, raum: ChannelId, art: Sperrart) {
        self.offen.remove(&(raum, art));
    }

    /// Vergisst alle Vermerke eines geloeschten Raums
    pub fn raum_vergessen(&self, raum: ChannelId) {
        self.offen.retain(|(r, _), _| *r != raum);
    }

    pub fn len(&self) -> usize {
        self.offen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id() -> EntitaetId {
        EntitaetId(Uuid::new_v4())
    }

    #[test]
    fn offene_rechte_lassen_geregelte_aus() {
        let a = id();
        let b = id();
        let eintraege = vec![
            OverwriteEintrag::mit(a, &[Recht::Verbinden], &[]),
            OverwriteEintrag::mit(b, &[], &[Recht::NachrichtenSenden]),
        ];
        assert_eq!(offene_rechte(&eintraege, a, &ZUTRITT), vec![Recht::NachrichtenSenden]);
        assert_eq!(offene_rechte(&eintraege, b, &ZUTRITT), vec![Recht::Verbinden]);
        assert_eq!(offene_rechte(&eintraege, id(), &ZUTRITT), ZUTRITT.to_vec());
    }

    #[test]
    fn vermerken_nur_bei_offener_sperre() {
        let buch = Vergabebuch::neu();
        let raum = ChannelId::new();
        let a = id();

        buch.vermerken(raum, Sperrart::Zutritt, a, &ZUTRITT);
        assert!(buch.ansehen(raum, Sperrart::Zutritt).is_none());

        buch.eroeffnen(raum, Sperrart::Zutritt, Vergaben::new());
        buch.vermerken(raum, Sperrart::Zutritt, a, &ZUTRITT);
        let vergaben = buch.ansehen(raum, Sperrart::Zutritt).unwrap();
        assert_eq!(vergaben[&a], BTreeSet::from(ZUTRITT));
        assert!(buch.ansehen(raum, Sperrart::Stream).is_none());
    }

    #[test]
    fn streichen_und_raum_vergessen() {
        let buch = Vergabebuch::neu();
        let raum = ChannelId::new();
        let anderer = ChannelId::new();
        let a = id();
        buch.eroeffnen(raum, Sperrart::Zutritt, Vergaben::from([(a, ZUTRITT.into())]));
        buch.eroeffnen(raum, Sperrart::Stream, Vergaben::from([(a, STREAM.into())]));
        buch.eroeffnen(anderer, Sperrart::Zutritt, Vergaben::new());

        buch.streichen(raum, a, &Recht::ALLE);
        assert!(buch.ansehen(raum, Sperrart::Zutritt).unwrap().is_empty());
        assert!(buch.ansehen(raum, Sperrart::Stream).unwrap().is_empty());

        buch.raum_vergessen(raum);
        assert_eq!(buch.len(), 1);
        buch.schliessen(anderer, Sperrart::Zutritt);
        assert!(buch.is_empty());
    }
}
