//! Raum-Aktionen: Sperren, Stummschalten, Delegation und Kick
//!
//! Jede Aktion laeuft nach demselben Muster ab:
//!   1. Guards gegen den aktuellen Zustand und die Rechte des Aufrufers
//!   2. ggf. Ziel-Aufloesung (direkt oder ueber eine Auswahl)
//!   3. Commit-Schleife: frischen Schnappschuss lesen, Idempotenz pruefen,
//!      Direktiven berechnen, atomar ersetzen (Compare-and-Swap)
//!
//! Ein Aufruf schreibt hoechstens einmal erfolgreich; bei einem
//! Versionskonflikt wird mit frischem Schnappschuss wiederholt.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;
use voxhall_core::types::{AufrufId, ChannelId, EntitaetId, NachrichtId, UserId};
use voxhall_observability::{aktion_span, RaumMetriken};

use crate::config::RaumConfig;
use crate::error::{RaumFehler, RaumResult};
use crate::gateway::{Antwort, AntwortKontext, OverwriteSchnappschuss, RaumGateway, RechtePruefer};
use crate::kontrollflaeche::erwaehnung;
use crate::overwrite::{eintrag_von, ids_mit_erlaubnis, overwrites_anwenden, Direktive, OverwriteEintrag, Recht};
use crate::vergabe::{offene_rechte, Sperrart, Vergabebuch, Vergaben, ZUTRITT};
use crate::zustand::{versuchen, Einzelversuch, Politik, Sperrzustand, Umschaltung, Versuch, Wiederherstellung};
use crate::ziel::{Aufloesung, ZielAufloeser, Zielquelle};

/// Maximale Anzahl Schreibversuche bei Versionskonflikten
pub const MAX_COMMIT_VERSUCHE: u32 = 3;

pub const MELDUNG_FEHLER: &str = "Da ist etwas schiefgelaufen.";
pub const MELDUNG_ZEITUEBERSCHREITUNG: &str = "Ich habe zu lange auf eine Auswahl gewartet.";

// ---------------------------------------------------------------------------
// Aufruf
// ---------------------------------------------------------------------------

/// Art des Aufrufs, bestimmt Ziel-Quelle und Wiederholungs-Politik
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AufrufArt {
    /// Slash-Befehl, Ziel steht optional im Befehl
    Direkt { ziel: Option<UserId> },
    /// Knopf auf der Kontrollflaeche
    Interaktiv { nachricht: NachrichtId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aufruf {
    pub id: AufrufId,
    pub benutzer: UserId,
    pub art: AufrufArt,
}

impl Aufruf {
    pub fn direkt(id: AufrufId, benutzer: UserId, ziel: Option<UserId>) -> Self {
        Self {
            id,
            benutzer,
            art: AufrufArt::Direkt { ziel },
        }
    }

    pub fn interaktiv(id: AufrufId, benutzer: UserId, nachricht: NachrichtId) -> Self {
        Self {
            id,
            benutzer,
            art: AufrufArt::Interaktiv { nachricht },
        }
    }

    pub fn politik(&self) -> Politik {
        match self.art {
            AufrufArt::Direkt { .. } => Politik::OhneGegenversuch,
            AufrufArt::Interaktiv { .. } => Politik::MitGegenversuch,
        }
    }

    pub fn zielquelle(&self) -> Zielquelle {
        match self.art {
            AufrufArt::Direkt { ziel } => Zielquelle::Direkt(ziel),
            AufrufArt::Interaktiv { .. } => Zielquelle::Auswahl,
        }
    }

    pub fn kontext(&self) -> AntwortKontext {
        match self.art {
            AufrufArt::Direkt { .. } => AntwortKontext::fuer_befehl(self.id),
            AufrufArt::Interaktiv { nachricht } => AntwortKontext::fuer_knopf(self.id, nachricht),
        }
    }
}

// ---------------------------------------------------------------------------
// Ergebnis
// ---------------------------------------------------------------------------

/// Die acht Raum-Aktionen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aktion {
    Sperren,
    Entsperren,
    StreamSperren,
    StreamEntsperren,
    UserErlauben,
    StreamErlauben,
    StreamVerbieten,
    UserKicken,
}

impl Aktion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sperren => "sperren",
            Self::Entsperren => "entsperren",
            Self::StreamSperren => "stream_sperren",
            Self::StreamEntsperren => "stream_entsperren",
            Self::UserErlauben => "user_erlauben",
            Self::StreamErlauben => "stream_erlauben",
            Self::StreamVerbieten => "stream_verbieten",
            Self::UserKicken => "user_kicken",
        }
    }

    /// Erfolgsmeldung fuer den Aufrufer
    pub fn erfolg(&self, ziel: Option<UserId>) -> String {
        let wer = ziel.map(erwaehnung).unwrap_or_else(|| "Das Mitglied".into());
        match self {
            Self::Sperren => "Kanal gesperrt 🔒".into(),
            Self::Entsperren => "Kanal entsperrt 🔓".into(),
            Self::StreamSperren => "Kanal stummgeschaltet 🔇".into(),
            Self::StreamEntsperren => "Kanal wieder laut 🔊".into(),
            Self::UserErlauben => format!("{wer} darf jetzt beitreten."),
            Self::StreamErlauben => format!("{wer} darf jetzt sprechen."),
            Self::StreamVerbieten => format!("{wer} darf nicht mehr sprechen."),
            Self::UserKicken => format!("{wer} wurde aus dem Kanal entfernt."),
        }
    }
}

impl From<Umschaltung> for Aktion {
    fn from(u: Umschaltung) -> Self {
        match u {
            Umschaltung::Sperren => Self::Sperren,
            Umschaltung::Entsperren => Self::Entsperren,
            Umschaltung::StreamSperren => Self::StreamSperren,
            Umschaltung::StreamEntsperren => Self::StreamEntsperren,
        }
    }
}

/// Grund, warum eine Aktion nicht ausgefuehrt wurde
///
/// Keine Fehler: der Text wird dem Aufrufer direkt angezeigt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ablehnung {
    BereitsGesperrt,
    NichtGesperrt,
    BereitsStreamGesperrt,
    NichtStreamGesperrt,
    /// Aufrufer darf selbst nicht sprechen
    KeinRederecht,
    ZielFehlt,
    ZielDarfBereitsBeitreten(UserId),
    ZielDarfBereitsSprechen(UserId),
    ZielDarfNichtSprechen(UserId),
    SelbstVerbieten,
    ZielNichtImRaum(UserId),
    /// Bot oder immer erlaubte Rolle
    ZielGeschuetzt(UserId),
    /// Knopf gedrueckt ohne mit dem Raum verbunden zu sein
    NichtImRaum,
    /// Befehl ohne aktuellen Voice-Raum
    KeinRaum,
}

impl std::fmt::Display for Ablehnung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BereitsGesperrt => write!(f, "Der Kanal ist bereits gesperrt."),
            Self::NichtGesperrt => write!(f, "Der Kanal ist nicht gesperrt."),
            Self::BereitsStreamGesperrt => write!(f, "Der Kanal ist bereits stummgeschaltet."),
            Self::NichtStreamGesperrt => write!(f, "Der Kanal ist nicht stummgeschaltet."),
            Self::KeinRederecht => write!(f, "Dafuer musst du selbst sprechen duerfen."),
            Self::ZielFehlt => write!(f, "Du hast kein Mitglied ausgewaehlt."),
            Self::ZielDarfBereitsBeitreten(z) => {
                write!(f, "{} darf bereits beitreten.", erwaehnung(*z))
            }
            Self::ZielDarfBereitsSprechen(z) => {
                write!(f, "{} darf bereits sprechen.", erwaehnung(*z))
            }
            Self::ZielDarfNichtSprechen(z) => {
                write!(f, "{} darf ohnehin nicht sprechen.", erwaehnung(*z))
            }
            Self::SelbstVerbieten => write!(f, "Du kannst dir nicht selbst das Sprechen verbieten."),
            Self::ZielNichtImRaum(z) => write!(f, "{} ist nicht in diesem Kanal.", erwaehnung(*z)),
            Self::ZielGeschuetzt(z) => write!(f, "{} kann nicht gekickt werden.", erwaehnung(*z)),
            Self::NichtImRaum => write!(f, "Du musst mit diesem Kanal verbunden sein."),
            Self::KeinRaum => write!(f, "Du bist in keinem Voice-Kanal."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ergebnis {
    Angewendet(Versuch),
    Abgelehnt(Ablehnung),
    /// Auswahl ist abgelaufen
    Abgebrochen,
}

/// Ausgang einer Raum-Aktion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aktionsausgang {
    pub aktion: Aktion,
    pub ergebnis: Ergebnis,
    /// Wo weiter geantwortet wird (ggf. inkl. Auswahl)
    pub kontext: AntwortKontext,
    pub ziel: Option<UserId>,
}

impl Aktionsausgang {
    fn neu(aktion: Aktion, ergebnis: Ergebnis, kontext: AntwortKontext) -> Self {
        Self {
            aktion,
            ergebnis,
            kontext,
            ziel: None,
        }
    }

    pub fn ist_angewendet(&self) -> bool {
        matches!(self.ergebnis, Ergebnis::Angewendet(_))
    }

    /// Text fuer den Aufrufer
    pub fn meldung(&self) -> String {
        match &self.ergebnis {
            Ergebnis::Angewendet(Versuch::Angewendet) => self.aktion.erfolg(self.ziel),
            Ergebnis::Angewendet(Versuch::BereitsImZustand {
                wiederhergestellt_durch: Wiederherstellung::Gegenaktion,
            }) => match umschaltung_von(self.aktion) {
                Some(u) => Aktion::from(u.gegenteil()).erfolg(None),
                None => self.aktion.erfolg(self.ziel),
            },
            Ergebnis::Abgelehnt(ablehnung) => ablehnung.to_string(),
            Ergebnis::Abgebrochen => MELDUNG_ZEITUEBERSCHREITUNG.into(),
        }
    }

    fn ergebnis_label(&self) -> &'static str {
        match self.ergebnis {
            Ergebnis::Angewendet(Versuch::Angewendet) => "angewendet",
            Ergebnis::Angewendet(Versuch::BereitsImZustand { .. }) => "gegenaktion",
            Ergebnis::Abgelehnt(_) => "abgelehnt",
            Ergebnis::Abgebrochen => "abgebrochen",
        }
    }
}

fn umschaltung_von(aktion: Aktion) -> Option<Umschaltung> {
    match aktion {
        Aktion::Sperren => Some(Umschaltung::Sperren),
        Aktion::Entsperren => Some(Umschaltung::Entsperren),
        Aktion::StreamSperren => Some(Umschaltung::StreamSperren),
        Aktion::StreamEntsperren => Some(Umschaltung::StreamEntsperren),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Direktiven
// ---------------------------------------------------------------------------

/// Geplante Direktiven einer Umschaltung samt der dabei erteilten Rechte
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Umschaltplan {
    pub direktiven: Vec<Direktive>,
    /// Nur beim Sperren gefuellt, wird im Vergabebuch vermerkt
    pub vergaben: Vergaben,
}

fn sperrart_von(aktion: Umschaltung) -> Sperrart {
    match aktion {
        Umschaltung::Sperren | Umschaltung::Entsperren => Sperrart::Zutritt,
        Umschaltung::StreamSperren | Umschaltung::StreamEntsperren => Sperrart::Stream,
    }
}

/// Plant eine Umschaltung auf Basis des aktuellen Schnappschusses
///
/// Sperren vergibt den Mitgliedern (beim Stream-Sperren nur dem Aufrufer)
/// ausschliesslich Rechte, die ihr Eintrag noch nicht regelt; bestehende
/// Denies bleiben stehen. Entsperren nimmt die `vermerkt`en Vergaben zurueck,
/// soweit sie noch bestehen. Ohne Vermerk werden alle expliziten
/// Erlaubnisse der Sperrart entfernt.
pub fn umschalt_plan(
    aktion: Umschaltung,
    eintraege: &[OverwriteEintrag],
    default: EntitaetId,
    mitglieder: &[UserId],
    aufrufer: UserId,
    vermerkt: Option<&Vergaben>,
) -> Umschaltplan {
    let rechte = sperrart_von(aktion).rechte();
    let mut plan = Umschaltplan::default();

    match aktion {
        Umschaltung::Sperren | Umschaltung::StreamSperren => {
            let beguenstigte: Vec<EntitaetId> = match aktion {
                Umschaltung::Sperren => mitglieder.iter().map(|m| EntitaetId::from(*m)).collect(),
                _ => vec![aufrufer.into()],
            };
            for id in beguenstigte {
                let offen = offene_rechte(eintraege, id, rechte);
                if offen.is_empty() {
                    continue;
                }
                plan.direktiven.push(Direktive::fuer([id]).erlauben(&offen));
                plan.vergaben.insert(id, offen.into_iter().collect());
            }

            let default_eintrag = eintrag_von(eintraege, default);
            let neu_verweigert: BTreeSet<Recht> = rechte
                .iter()
                .copied()
                .filter(|r| !default_eintrag.is_some_and(|e| e.verweigert(*r)))
                .collect();
            plan.direktiven.push(Direktive::fuer([default]).verweigern(rechte));
            if !neu_verweigert.is_empty() {
                plan.vergaben.insert(default, neu_verweigert);
            }
        }
        Umschaltung::Entsperren | Umschaltung::StreamEntsperren => match vermerkt {
            Some(vergaben) => {
                for (id, erteilt) in vergaben {
                    let eintrag = eintrag_von(eintraege, *id);
                    let zurueck: Vec<Recht> = erteilt
                        .iter()
                        .copied()
                        .filter(|r| {
                            eintrag.is_some_and(|e| {
                                if *id == default {
                                    e.verweigert(*r)
                                } else {
                                    e.erlaubt(*r)
                                }
                            })
                        })
                        .collect();
                    if !zurueck.is_empty() {
                        plan.direktiven.push(Direktive::fuer([*id]).entfernen(&zurueck));
                    }
                }
                // Der Sperrzustand haengt am ersten Recht des Defaults
                plan.direktiven.push(Direktive::fuer([default]).entfernen(&rechte[..1]));
            }
            None => {
                let mut ziele = ids_mit_erlaubnis(eintraege, rechte[0]);
                ziele.push(default);
                plan.direktiven.push(Direktive::fuer(ziele).entfernen(rechte));
            }
        },
    }
    plan
}

fn hat_erlaubnis(eintraege: &[OverwriteEintrag], benutzer: UserId, recht: Recht) -> bool {
    eintrag_von(eintraege, benutzer.into()).is_some_and(|e| e.erlaubt(recht))
}

// ---------------------------------------------------------------------------
// RaumAktionen
// ---------------------------------------------------------------------------

/// Fuehrt Raum-Aktionen gegen ein Gateway aus
pub struct RaumAktionen<G: RaumGateway, P: RechtePruefer> {
    gateway: Arc<G>,
    rechte: Arc<P>,
    config: Arc<RaumConfig>,
    ziele: ZielAufloeser<G>,
    vergaben: Vergabebuch,
    metriken: RaumMetriken,
}

impl<G: RaumGateway, P: RechtePruefer> RaumAktionen<G, P> {
    pub fn neu(gateway: Arc<G>, rechte: Arc<P>, config: Arc<RaumConfig>, metriken: RaumMetriken) -> Self {
        let ziele = ZielAufloeser::neu(gateway.clone(), metriken.clone());
        Self::mit_aufloeser(gateway, rechte, config, metriken, ziele)
    }

    pub fn mit_aufloeser(
        gateway: Arc<G>,
        rechte: Arc<P>,
        config: Arc<RaumConfig>,
        metriken: RaumMetriken,
        ziele: ZielAufloeser<G>,
    ) -> Self {
        Self {
            gateway,
            rechte,
            config,
            ziele,
            vergaben: Vergabebuch::neu(),
            metriken,
        }
    }

    pub fn ziele(&self) -> &ZielAufloeser<G> {
        &self.ziele
    }

    pub fn vergaben(&self) -> &Vergabebuch {
        &self.vergaben
    }

    /// Vergisst die Sperr-Vermerke eines geloeschten Raums
    pub fn raum_vergessen(&self, raum: ChannelId) {
        self.vergaben.raum_vergessen(raum);
    }

    /// Aktueller Sperrzustand eines Raums
    pub async fn zustand(&self, raum: ChannelId) -> RaumResult<Sperrzustand> {
        let schnappschuss = self.gateway.overwrites_laden(raum).await?;
        Ok(Sperrzustand::aus_overwrites(
            &schnappschuss.eintraege,
            self.config.default_entitaet(),
        ))
    }

    // --- Umschaltungen ---

    pub async fn sperren(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.umschalten(aufruf, raum, Umschaltung::Sperren).await
    }

    pub async fn entsperren(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.umschalten(aufruf, raum, Umschaltung::Entsperren).await
    }

    pub async fn stream_sperren(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.umschalten(aufruf, raum, Umschaltung::StreamSperren).await
    }

    pub async fn stream_entsperren(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.umschalten(aufruf, raum, Umschaltung::StreamEntsperren).await
    }

    async fn umschalten(
        &self,
        aufruf: &Aufruf,
        raum: ChannelId,
        aktion: Umschaltung,
    ) -> RaumResult<Aktionsausgang> {
        let intern = async {
            versuchen(aktion, aufruf.politik(), |a| {
                self.einmal_umschalten(raum, a, aufruf.benutzer)
            })
            .await
            .map(|versuch| {
                let ergebnis = match versuch {
                    Ok(v) => Ergebnis::Angewendet(v),
                    Err(ablehnung) => Ergebnis::Abgelehnt(ablehnung),
                };
                Aktionsausgang::neu(aktion.into(), ergebnis, aufruf.kontext())
            })
        };
        self.ausfuehren(aktion.into(), aufruf, raum, intern).await
    }

    /// Genau eine Umschaltung gegen frisch gelesenen Zustand
    async fn einmal_umschalten(
        &self,
        raum: ChannelId,
        aktion: Umschaltung,
        aufrufer: UserId,
    ) -> RaumResult<Einzelversuch> {
        if aktion == Umschaltung::StreamEntsperren {
            if aktion.ist_erfuellt(self.zustand(raum).await?) {
                return Ok(Einzelversuch::BereitsImZustand(aktion.bereits_ablehnung()));
            }
            if !self.rechte.hat_recht(raum, aufrufer, Recht::Sprechen).await? {
                return Ok(Einzelversuch::Abgelehnt(Ablehnung::KeinRederecht));
            }
        }

        let mitglieder = match aktion {
            Umschaltung::Sperren => self.gateway.mitglieder(raum).await?,
            _ => vec![],
        };
        let art = sperrart_von(aktion);
        let vermerkt = self.vergaben.ansehen(raum, art);
        let default = self.config.default_entitaet();
        let mut vergeben = Vergaben::new();

        let commit = self
            .festschreiben(raum, |s| {
                let zustand = Sperrzustand::aus_overwrites(&s.eintraege, default);
                if aktion.ist_erfuellt(zustand) {
                    return Err(aktion.bereits_ablehnung());
                }
                let plan = umschalt_plan(aktion, &s.eintraege, default, &mitglieder, aufrufer, vermerkt.as_ref());
                vergeben = plan.vergaben;
                Ok(plan.direktiven)
            })
            .await?;

        Ok(match commit {
            Ok(()) => {
                match aktion {
                    Umschaltung::Sperren | Umschaltung::StreamSperren => {
                        self.vergaben.eroeffnen(raum, art, vergeben)
                    }
                    Umschaltung::Entsperren | Umschaltung::StreamEntsperren => {
                        self.vergaben.schliessen(raum, art)
                    }
                }
                Einzelversuch::Angewendet
            }
            Err(ablehnung) => Einzelversuch::BereitsImZustand(ablehnung),
        })
    }

    // --- Delegation ---

    /// Erlaubt einem Mitglied den Zutritt zu einem gesperrten Raum
    pub async fn user_erlauben(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.ausfuehren(Aktion::UserErlauben, aufruf, raum, self.user_erlauben_intern(aufruf, raum))
            .await
    }

    async fn user_erlauben_intern(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        let aktion = Aktion::UserErlauben;
        if !self.zustand(raum).await?.verbindung_gesperrt {
            return Ok(abgelehnt(aktion, aufruf, Ablehnung::NichtGesperrt));
        }

        let (ziel, kontext) = match self.ziel_bestimmen(aufruf, "Wer darf beitreten?").await? {
            Ok(aufgeloest) => aufgeloest,
            Err(ausgang) => return Ok(Aktionsausgang { aktion, ..ausgang }),
        };
        let default = self.config.default_entitaet();
        let mut neu_erlaubt: Vec<Recht> = Vec::new();

        let commit = self
            .festschreiben(raum, |s| {
                if !Sperrzustand::aus_overwrites(&s.eintraege, default).verbindung_gesperrt {
                    return Err(Ablehnung::NichtGesperrt);
                }
                if hat_erlaubnis(&s.eintraege, ziel, Recht::Verbinden) {
                    return Err(Ablehnung::ZielDarfBereitsBeitreten(ziel));
                }
                neu_erlaubt = ZUTRITT
                    .into_iter()
                    .filter(|r| !hat_erlaubnis(&s.eintraege, ziel, *r))
                    .collect();
                Ok(vec![Direktive::fuer([ziel.into()]).erlauben(&ZUTRITT)])
            })
            .await?;

        if commit.is_ok() {
            self.vergaben
                .vermerken(raum, Sperrart::Zutritt, ziel.into(), &neu_erlaubt);
            self.beitritts_hinweis(raum, ziel).await;
        }
        Ok(mit_ziel(aktion, commit, kontext, ziel))
    }

    /// Postet den Beitritts-Hinweis und loescht ihn nach `hinweis_dauer` wieder
    async fn beitritts_hinweis(&self, raum: ChannelId, ziel: UserId) {
        let text = format!("{}, du kannst jetzt beitreten!", erwaehnung(ziel));
        match self.gateway.nachricht_senden(raum, Antwort::text(text)).await {
            Ok(nachricht) => {
                let gateway = self.gateway.clone();
                let dauer = self.config.hinweis_dauer();
                tokio::spawn(async move {
                    tokio::time::sleep(dauer).await;
                    if let Err(e) = gateway.nachricht_loeschen(raum, nachricht).await {
                        tracing::debug!(raum = %raum, fehler = %e, "Beitritts-Hinweis nicht geloescht");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(raum = %raum, fehler = %e, "Beitritts-Hinweis konnte nicht gesendet werden");
            }
        }
    }

    /// Erlaubt einem Mitglied das Sprechen in einem stummgeschalteten Raum
    pub async fn stream_erlauben(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.ausfuehren(Aktion::StreamErlauben, aufruf, raum, self.stream_erlauben_intern(aufruf, raum))
            .await
    }

    async fn stream_erlauben_intern(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        let aktion = Aktion::StreamErlauben;
        if let Some(ablehnung) = self.stream_guards(aufruf, raum).await? {
            return Ok(abgelehnt(aktion, aufruf, ablehnung));
        }

        let (ziel, kontext) = match self.ziel_bestimmen(aufruf, "Wer darf sprechen?").await? {
            Ok(aufgeloest) => aufgeloest,
            Err(ausgang) => return Ok(Aktionsausgang { aktion, ..ausgang }),
        };
        let default = self.config.default_entitaet();

        let commit = self
            .festschreiben(raum, |s| {
                if !Sperrzustand::aus_overwrites(&s.eintraege, default).sprechen_gesperrt {
                    return Err(Ablehnung::NichtStreamGesperrt);
                }
                if hat_erlaubnis(&s.eintraege, ziel, Recht::Sprechen) {
                    return Err(Ablehnung::ZielDarfBereitsSprechen(ziel));
                }
                Ok(vec![Direktive::fuer([ziel.into()]).erlauben(&[Recht::Sprechen])])
            })
            .await?;
        if commit.is_ok() {
            self.vergaben
                .vermerken(raum, Sperrart::Stream, ziel.into(), &[Recht::Sprechen]);
        }

        Ok(mit_ziel(aktion, commit, kontext, ziel))
    }

    /// Entzieht einem Mitglied die explizite Sprecherlaubnis
    pub async fn stream_verbieten(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.ausfuehren(Aktion::StreamVerbieten, aufruf, raum, self.stream_verbieten_intern(aufruf, raum))
            .await
    }

    async fn stream_verbieten_intern(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        let aktion = Aktion::StreamVerbieten;
        if let Some(ablehnung) = self.stream_guards(aufruf, raum).await? {
            return Ok(abgelehnt(aktion, aufruf, ablehnung));
        }

        let (ziel, kontext) = match self.ziel_bestimmen(aufruf, "Wer soll nicht mehr sprechen?").await? {
            Ok(aufgeloest) => aufgeloest,
            Err(ausgang) => return Ok(Aktionsausgang { aktion, ..ausgang }),
        };
        if ziel == aufruf.benutzer {
            return Ok(mit_ziel(aktion, Err(Ablehnung::SelbstVerbieten), kontext, ziel));
        }
        let default = self.config.default_entitaet();

        let commit = self
            .festschreiben(raum, |s| {
                if !Sperrzustand::aus_overwrites(&s.eintraege, default).sprechen_gesperrt {
                    return Err(Ablehnung::NichtStreamGesperrt);
                }
                if !hat_erlaubnis(&s.eintraege, ziel, Recht::Sprechen) {
                    return Err(Ablehnung::ZielDarfNichtSprechen(ziel));
                }
                Ok(vec![Direktive::fuer([ziel.into()]).entfernen(&[Recht::Sprechen])])
            })
            .await?;
        if commit.is_ok() {
            self.vergaben.streichen(raum, ziel.into(), &[Recht::Sprechen]);
        }

        Ok(mit_ziel(aktion, commit, kontext, ziel))
    }

    /// Raum muss stummgeschaltet sein, Aufrufer muss sprechen duerfen
    async fn stream_guards(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Option<Ablehnung>> {
        if !self.zustand(raum).await?.sprechen_gesperrt {
            return Ok(Some(Ablehnung::NichtStreamGesperrt));
        }
        if !self.rechte.hat_recht(raum, aufruf.benutzer, Recht::Sprechen).await? {
            return Ok(Some(Ablehnung::KeinRederecht));
        }
        Ok(None)
    }

    // --- Kick ---

    /// Entfernt den Overwrite-Eintrag eines Mitglieds und trennt es vom Raum
    pub async fn user_kicken(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        self.ausfuehren(Aktion::UserKicken, aufruf, raum, self.user_kicken_intern(aufruf, raum))
            .await
    }

    async fn user_kicken_intern(&self, aufruf: &Aufruf, raum: ChannelId) -> RaumResult<Aktionsausgang> {
        let aktion = Aktion::UserKicken;
        if !self.rechte.hat_recht(raum, aufruf.benutzer, Recht::Sprechen).await? {
            return Ok(abgelehnt(aktion, aufruf, Ablehnung::KeinRederecht));
        }

        let (ziel, kontext) = match self.ziel_bestimmen(aufruf, "Wen moechtest du kicken?").await? {
            Ok(aufgeloest) => aufgeloest,
            Err(ausgang) => return Ok(Aktionsausgang { aktion, ..ausgang }),
        };
        if self.config.geschuetzt().enthaelt(&ziel.into()) {
            return Ok(mit_ziel(aktion, Err(Ablehnung::ZielGeschuetzt(ziel)), kontext, ziel));
        }
        if !self.gateway.mitglieder(raum).await?.contains(&ziel) {
            return Ok(mit_ziel(aktion, Err(Ablehnung::ZielNichtImRaum(ziel)), kontext, ziel));
        }

        // Erst trennen: scheitert das, bleiben die Overwrites unangetastet
        self.gateway
            .trennen(raum, ziel)
            .await
            .map_err(|quelle| RaumFehler::TrennenFehlgeschlagen {
                raum,
                benutzer: ziel,
                quelle,
            })?;

        let commit = self
            .festschreiben(raum, |_| {
                Ok(vec![Direktive::fuer([ziel.into()]).entfernen(&Recht::ALLE)])
            })
            .await?;
        if commit.is_ok() {
            self.vergaben.streichen(raum, ziel.into(), &Recht::ALLE);
        }

        Ok(mit_ziel(aktion, commit, kontext, ziel))
    }

    // --- Gemeinsame Bausteine ---

    /// Loest das Ziel auf; `Err` traegt den fertigen Ausgang (abgebrochen/kein Ziel)
    async fn ziel_bestimmen(
        &self,
        aufruf: &Aufruf,
        platzhalter: &str,
    ) -> RaumResult<Result<(UserId, AntwortKontext), Aktionsausgang>> {
        let aufloesung = self
            .ziele
            .aufloesen(aufruf.zielquelle(), aufruf.benutzer, aufruf.kontext(), platzhalter)
            .await?;

        // Platzhalter-Aktion, wird vom Aufrufer ueberschrieben
        let platzhalter_aktion = Aktion::UserErlauben;
        Ok(match aufloesung {
            Aufloesung::Aufgeloest {
                ziel: Some(ziel),
                kontext,
            } => Ok((ziel, kontext)),
            Aufloesung::Aufgeloest { ziel: None, kontext } => Err(Aktionsausgang::neu(
                platzhalter_aktion,
                Ergebnis::Abgelehnt(Ablehnung::ZielFehlt),
                kontext,
            )),
            Aufloesung::Abgebrochen => Err(Aktionsausgang::neu(
                platzhalter_aktion,
                Ergebnis::Abgebrochen,
                aufruf.kontext(),
            )),
        })
    }

    /// Commit-Schleife mit Compare-and-Swap
    ///
    /// `planen` sieht jeweils den frisch gelesenen Schnappschuss und prueft dort
    /// die Idempotenz-Bedingungen, unmittelbar vor dem Schreiben. Aendert die
    /// Algebra nichts, wird nicht geschrieben.
    async fn festschreiben<F>(
        &self,
        raum: ChannelId,
        mut planen: F,
    ) -> RaumResult<Result<(), Ablehnung>>
    where
        F: FnMut(&OverwriteSchnappschuss) -> Result<Vec<Direktive>, Ablehnung>,
    {
        let geschuetzt = self.config.geschuetzt();

        for versuch in 1..=MAX_COMMIT_VERSUCHE {
            let schnappschuss = self.gateway.overwrites_laden(raum).await?;
            let direktiven = match planen(&schnappschuss) {
                Ok(d) => d,
                Err(ablehnung) => return Ok(Err(ablehnung)),
            };

            let neu = overwrites_anwenden(&schnappschuss.eintraege, &direktiven, &geschuetzt);
            if neu == schnappschuss.eintraege {
                return Ok(Ok(()));
            }

            match self
                .gateway
                .overwrites_ersetzen(raum, schnappschuss.version, neu)
                .await
            {
                Ok(version) => {
                    tracing::debug!(raum = %raum, version, versuch, "Overwrites geschrieben");
                    return Ok(Ok(()));
                }
                Err(e) if e.ist_konflikt() => {
                    self.metriken.commit_konflikte_total.inc();
                    tracing::debug!(raum = %raum, versuch, "Versionskonflikt, neuer Versuch");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RaumFehler::KonfliktErschoepft {
            raum,
            versuche: MAX_COMMIT_VERSUCHE,
        })
    }

    /// Fuehrt eine Aktion im eigenen Span aus und schliesst sie ab
    async fn ausfuehren<F>(
        &self,
        aktion: Aktion,
        aufruf: &Aufruf,
        raum: ChannelId,
        intern: F,
    ) -> RaumResult<Aktionsausgang>
    where
        F: Future<Output = RaumResult<Aktionsausgang>>,
    {
        let span = aktion_span(aktion.name(), raum, aufruf.benutzer);
        async {
            let ergebnis = intern.await;
            self.abschliessen(aktion, ergebnis)
        }
        .instrument(span)
        .await
    }

    /// Protokolliert und zaehlt das Ergebnis einer Aktion
    ///
    /// Raum, Aufrufer und Aktion stehen im umgebenden Span.
    fn abschliessen(&self, aktion: Aktion, ergebnis: RaumResult<Aktionsausgang>) -> RaumResult<Aktionsausgang> {
        match &ergebnis {
            Ok(ausgang) => {
                self.metriken
                    .aktion_zaehlen(aktion.name(), ausgang.ergebnis_label());
                match &ausgang.ergebnis {
                    Ergebnis::Abgelehnt(ablehnung) => {
                        tracing::debug!(grund = %ablehnung, "Aktion abgelehnt")
                    }
                    _ => tracing::info!(ergebnis = ausgang.ergebnis_label(), "Aktion abgeschlossen"),
                }
            }
            Err(e) => {
                self.metriken.aktion_zaehlen(aktion.name(), "fehler");
                tracing::warn!(fehler = %e, "Aktion fehlgeschlagen");
            }
        }
        ergebnis
    }
}

fn abgelehnt(aktion: Aktion, aufruf: &Aufruf, ablehnung: Ablehnung) -> Aktionsausgang {
    Aktionsausgang::neu(aktion, Ergebnis::Abgelehnt(ablehnung), aufruf.kontext())
}

fn mit_ziel(
    aktion: Aktion,
    commit: Result<(), Ablehnung>,
    kontext: AntwortKontext,
    ziel: UserId,
) -> Aktionsausgang {
    let ergebnis = match commit {
        Ok(()) => Ergebnis::Angewendet(Versuch::Angewendet),
        Err(ablehnung) => Ergebnis::Abgelehnt(ablehnung),
    };
    Aktionsausgang {
        aktion,
        ergebnis,
        kontext,
        ziel: Some(ziel),
    }
}
