//! Dispatcher: Plattform-Ereignisse auf Raum-Aktionen und Pool abbilden
//!
//! Einziger Ort, an dem Aufrufe beantwortet werden. Ablehnungen und
//! Zeitueberschreitungen werden als normale Antwort angezeigt,
//! Gateway-Fehler als generische Fehlermeldung.

use std::sync::Arc;
use voxhall_core::event::{Belegungsaenderung, KnopfId, Unterbefehl, VoxhallEreignis};
use voxhall_core::types::{AufrufId, ChannelId, KorrelationsId, NachrichtId, UserId};
use voxhall_observability::RaumMetriken;

use crate::aktionen::{Ablehnung, Aktionsausgang, Aufruf, Ergebnis, RaumAktionen, MELDUNG_FEHLER};
use crate::config::RaumConfig;
use crate::error::{GatewayFehler, RaumFehler, RaumResult};
use crate::gateway::{Antwort, AntwortKontext, RaumGateway, RechtePruefer};
use crate::kontrollflaeche::{kontrollflaeche_rendern, Kontrollflaeche};
use crate::pool::{PoolVerwalter, Wartungsbericht};

/// Verbindet Ereignisse, Raum-Aktionen und Raum-Pool
pub struct Dispatcher<G: RaumGateway, P: RechtePruefer> {
    gateway: Arc<G>,
    config: Arc<RaumConfig>,
    aktionen: RaumAktionen<G, P>,
    pool: PoolVerwalter<G>,
}

impl<G: RaumGateway, P: RechtePruefer> Dispatcher<G, P> {
    pub fn neu(gateway: Arc<G>, rechte: Arc<P>, config: RaumConfig, metriken: RaumMetriken) -> Self {
        let config = Arc::new(config);
        let aktionen = RaumAktionen::neu(gateway.clone(), rechte, config.clone(), metriken.clone());
        let pool = PoolVerwalter::neu(gateway.clone(), config.clone(), metriken);
        Self::aus_teilen(gateway, config, aktionen, pool)
    }

    pub fn aus_teilen(
        gateway: Arc<G>,
        config: Arc<RaumConfig>,
        aktionen: RaumAktionen<G, P>,
        pool: PoolVerwalter<G>,
    ) -> Self {
        Self {
            gateway,
            config,
            aktionen,
            pool,
        }
    }

    pub fn aktionen(&self) -> &RaumAktionen<G, P> {
        &self.aktionen
    }

    pub fn pool(&self) -> &PoolVerwalter<G> {
        &self.pool
    }

    /// Verarbeitet ein beliebiges Plattform-Ereignis
    ///
    /// Fehler von Aktionen werden bereits beantwortet; zurueckgegeben werden
    /// nur Fehler automatischer Pool-Durchlaeufe.
    pub async fn ereignis_verarbeiten(&self, ereignis: VoxhallEreignis) -> RaumResult<()> {
        match ereignis {
            VoxhallEreignis::Bereit => {
                let bericht = self.pool.bereit().await?;
                self.nachbereiten(bericht.as_ref());
            }
            VoxhallEreignis::Belegung(aenderung) => {
                self.belegung(&aenderung).await?;
            }
            VoxhallEreignis::Befehl {
                aufruf,
                benutzer,
                unterbefehl,
                ziel,
                ..
            } => {
                self.befehl_ausfuehren(aufruf, benutzer, unterbefehl, ziel)
                    .await;
            }
            VoxhallEreignis::Knopf {
                aufruf,
                benutzer,
                raum,
                nachricht,
                knopf,
            } => {
                self.knopf_gedrueckt(aufruf, benutzer, raum, nachricht, knopf)
                    .await;
            }
            VoxhallEreignis::Auswahl {
                korrelation,
                benutzer,
                gewaehlt,
            } => {
                self.auswahl_empfangen(korrelation, benutzer, gewaehlt);
            }
        }
        Ok(())
    }

    async fn belegung(&self, aenderung: &Belegungsaenderung) -> RaumResult<()> {
        tracing::debug!(
            benutzer = %aenderung.benutzer,
            vorher = ?aenderung.vorher,
            nachher = ?aenderung.nachher,
            "Belegungsaenderung"
        );
        let bericht = self.pool.belegung_geaendert(aenderung).await?;
        self.nachbereiten(bericht.as_ref());
        Ok(())
    }

    /// Sperr-Vermerke geloeschter Raeume verwerfen
    fn nachbereiten(&self, bericht: Option<&Wartungsbericht>) {
        for raum in bericht.into_iter().flat_map(|b| &b.geloescht) {
            self.aktionen.raum_vergessen(*raum);
        }
    }

    /// Antwort auf ein Auswahl-Element weiterreichen
    pub fn auswahl_empfangen(
        &self,
        korrelation: KorrelationsId,
        benutzer: UserId,
        gewaehlt: Option<UserId>,
    ) -> bool {
        self.aktionen
            .ziele()
            .auswahl_empfangen(korrelation, benutzer, gewaehlt)
    }

    // -----------------------------------------------------------------------
    // Knoepfe
    // -----------------------------------------------------------------------

    /// Knopfdruck auf der Kontrollflaeche eines Raums
    ///
    /// Der Druecker muss mit dem Raum verbunden sein, zu dem die
    /// Kontrollflaeche gehoert.
    pub async fn knopf_gedrueckt(
        &self,
        aufruf_id: AufrufId,
        benutzer: UserId,
        raum: ChannelId,
        nachricht: NachrichtId,
        knopf: KnopfId,
    ) {
        let aufruf = Aufruf::interaktiv(aufruf_id, benutzer, nachricht);
        let kontext = aufruf.kontext();

        let ergebnis = self.knopf_intern(&aufruf, raum, knopf).await;
        self.ausgang_beantworten(&kontext, raum, benutzer, ergebnis)
            .await;
    }

    async fn knopf_intern(
        &self,
        aufruf: &Aufruf,
        raum: ChannelId,
        knopf: KnopfId,
    ) -> RaumResult<Option<Aktionsausgang>> {
        if self.gateway.aktueller_raum(aufruf.benutzer).await? != Some(raum) {
            self.ablehnen(&aufruf.kontext(), Ablehnung::NichtImRaum).await?;
            return Ok(None);
        }

        let ausgang = match knopf {
            KnopfId::Sperren => self.aktionen.sperren(aufruf, raum).await?,
            KnopfId::Entsperren => self.aktionen.entsperren(aufruf, raum).await?,
            KnopfId::StreamSperren => self.aktionen.stream_sperren(aufruf, raum).await?,
            KnopfId::StreamEntsperren => self.aktionen.stream_entsperren(aufruf, raum).await?,
            KnopfId::UserErlauben => self.aktionen.user_erlauben(aufruf, raum).await?,
            KnopfId::StreamErlauben => self.aktionen.stream_erlauben(aufruf, raum).await?,
            KnopfId::StreamVerbieten => self.aktionen.stream_verbieten(aufruf, raum).await?,
            KnopfId::UserKicken => self.aktionen.user_kicken(aufruf, raum).await?,
            KnopfId::Aktualisieren => {
                let flaeche = self.flaeche(raum, Some(aufruf.benutzer)).await?;
                self.gateway
                    .antwort_bearbeiten(&aufruf.kontext(), Antwort::flaeche(flaeche))
                    .await?;
                return Ok(None);
            }
        };
        Ok(Some(ausgang))
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    /// `/voice <unterbefehl> [user]` im aktuellen Voice-Raum des Aufrufers
    pub async fn befehl_ausfuehren(
        &self,
        aufruf_id: AufrufId,
        benutzer: UserId,
        unterbefehl: Unterbefehl,
        ziel: Option<UserId>,
    ) {
        let kontext = AntwortKontext::fuer_befehl(aufruf_id);
        let ergebnis = self.befehl_intern(aufruf_id, benutzer, unterbefehl, ziel).await;

        match ergebnis {
            Ok(antwort) => {
                if let Err(e) = self.gateway.antwort_bearbeiten(&kontext, antwort).await {
                    tracing::warn!(aufruf = %aufruf_id, fehler = %e, "Antwort konnte nicht gesendet werden");
                }
            }
            Err(e) => self.fehler_melden(&kontext, e).await,
        }
    }

    async fn befehl_intern(
        &self,
        aufruf_id: AufrufId,
        benutzer: UserId,
        unterbefehl: Unterbefehl,
        ziel: Option<UserId>,
    ) -> RaumResult<Antwort> {
        tracing::debug!(benutzer = %benutzer, befehl = unterbefehl.name(), "Befehl empfangen");

        // Die Aktualisierung braucht keinen eigenen Voice-Raum
        if unterbefehl == Unterbefehl::Aktualisieren {
            return self.aktualisieren().await;
        }

        let Some(raum) = self.gateway.aktueller_raum(benutzer).await? else {
            return Ok(Antwort::text(Ablehnung::KeinRaum.to_string()));
        };
        let ohne_ziel = Aufruf::direkt(aufruf_id, benutzer, None);
        let mit_ziel = Aufruf::direkt(aufruf_id, benutzer, ziel);

        let antwort = match unterbefehl {
            Unterbefehl::Sperren => {
                let gesperrt = self.aktionen.sperren(&ohne_ziel, raum).await?;
                if ziel.is_some() && vorstufe_erfuellt(&gesperrt, &Ablehnung::BereitsGesperrt) {
                    let erlaubt = self.aktionen.user_erlauben(&mit_ziel, raum).await?;
                    Antwort::text(kombinieren(&gesperrt, &erlaubt))
                } else {
                    Antwort::text(gesperrt.meldung())
                }
            }
            Unterbefehl::StreamSperren => {
                let gesperrt = self.aktionen.stream_sperren(&ohne_ziel, raum).await?;
                if ziel.is_some() && vorstufe_erfuellt(&gesperrt, &Ablehnung::BereitsStreamGesperrt) {
                    let erlaubt = self.aktionen.stream_erlauben(&mit_ziel, raum).await?;
                    Antwort::text(kombinieren(&gesperrt, &erlaubt))
                } else {
                    Antwort::text(gesperrt.meldung())
                }
            }
            Unterbefehl::Entsperren => {
                Antwort::text(self.aktionen.entsperren(&ohne_ziel, raum).await?.meldung())
            }
            Unterbefehl::StreamEntsperren => Antwort::text(
                self.aktionen
                    .stream_entsperren(&ohne_ziel, raum)
                    .await?
                    .meldung(),
            ),
            Unterbefehl::Kicken => {
                Antwort::text(self.aktionen.user_kicken(&mit_ziel, raum).await?.meldung())
            }
            Unterbefehl::Kontrollen => {
                let flaeche = self.flaeche(raum, None).await?;
                self.gateway
                    .nachricht_senden(raum, Antwort::flaeche(flaeche))
                    .await?;
                Antwort::text("Kontrollen wurden in den Kanal-Chat gesendet.")
            }
            Unterbefehl::Aktualisieren => self.aktualisieren().await?,
        };
        Ok(antwort)
    }

    async fn aktualisieren(&self) -> RaumResult<Antwort> {
        let bericht = self.pool.aktualisieren().await?;
        self.nachbereiten(Some(&bericht));
        Ok(Antwort::text(format!(
            "Kanaele aktualisiert: {} erstellt, {} geloescht.",
            bericht.erstellt.len(),
            bericht.geloescht.len()
        )))
    }

    // -----------------------------------------------------------------------
    // Antworten
    // -----------------------------------------------------------------------

    async fn flaeche(&self, raum: ChannelId, betrachter: Option<UserId>) -> RaumResult<Kontrollflaeche> {
        let info = self
            .gateway
            .raum_laden(raum)
            .await?
            .ok_or(GatewayFehler::RaumNichtGefunden(raum))?;
        let schnappschuss = self.gateway.overwrites_laden(raum).await?;
        Ok(kontrollflaeche_rendern(
            &info,
            &schnappschuss.eintraege,
            betrachter,
            &self.config,
        ))
    }

    async fn ablehnen(&self, kontext: &AntwortKontext, ablehnung: Ablehnung) -> RaumResult<()> {
        tracing::debug!(aufruf = %kontext.aufruf, grund = %ablehnung, "Aufruf abgelehnt");
        self.gateway
            .antwort_bearbeiten(kontext, Antwort::text(ablehnung.to_string()))
            .await?;
        Ok(())
    }

    /// Beantwortet den Ausgang eines Knopfdrucks
    ///
    /// Nach einer Aenderung wird die Kontrollflaeche neu gerendert.
    async fn ausgang_beantworten(
        &self,
        kontext: &AntwortKontext,
        raum: ChannelId,
        benutzer: UserId,
        ergebnis: RaumResult<Option<Aktionsausgang>>,
    ) {
        let ausgang = match ergebnis {
            Ok(Some(ausgang)) => ausgang,
            Ok(None) => return,
            Err(e) => return self.fehler_melden(kontext, e).await,
        };

        let antwort = if ausgang.ist_angewendet() {
            match self.flaeche(raum, Some(benutzer)).await {
                Ok(flaeche) => Antwort::flaeche(flaeche).mit_text(ausgang.meldung()),
                Err(e) => {
                    tracing::warn!(raum = %raum, fehler = %e, "Kontrollflaeche nicht gerendert");
                    Antwort::text(ausgang.meldung())
                }
            }
        } else {
            Antwort::text(ausgang.meldung())
        };

        if let Err(e) = self.gateway.antwort_bearbeiten(&ausgang.kontext, antwort).await {
            tracing::warn!(aufruf = %kontext.aufruf, fehler = %e, "Antwort konnte nicht gesendet werden");
        }
    }

    async fn fehler_melden(&self, kontext: &AntwortKontext, fehler: RaumFehler) {
        tracing::warn!(aufruf = %kontext.aufruf, fehler = %fehler, "Aufruf fehlgeschlagen");
        if let Err(e) = self
            .gateway
            .antwort_bearbeiten(kontext, Antwort::text(MELDUNG_FEHLER))
            .await
        {
            tracing::warn!(aufruf = %kontext.aufruf, fehler = %e, "Fehlermeldung konnte nicht gesendet werden");
        }
    }
}

/// Darf der zweite Schritt eines zusammengesetzten Befehls folgen?
fn vorstufe_erfuellt(ausgang: &Aktionsausgang, bereits: &Ablehnung) -> bool {
    match &ausgang.ergebnis {
        Ergebnis::Angewendet(_) => true,
        Ergebnis::Abgelehnt(a) => a == bereits,
        Ergebnis::Abgebrochen => false,
    }
}

fn kombinieren(erster: &Aktionsausgang, zweiter: &Aktionsausgang) -> String {
    if erster.ist_angewendet() {
        format!("{}\n{}", erster.meldung(), zweiter.meldung())
    } else {
        zweiter.meldung()
    }
}
