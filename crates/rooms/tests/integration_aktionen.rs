//! Integration-Tests fuer RaumAktionen (In-Memory-Gateway)

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use voxhall_core::types::{AufrufId, ChannelId, KategorieId, NachrichtId, ServerId, UserId};
use voxhall_observability::RaumMetriken;
use voxhall_rooms::{
    overwrite::eintrag_von, Ablehnung, Aufruf, Ergebnis, OverwriteEintrag, RaumAktionen,
    RaumConfig, RaumFehler, RaumGateway, RechtePruefer, Recht, SpeicherGateway, Sperrzustand, Versuch,
    Wiederherstellung,
};

const ZUTRITT: [Recht; 2] = [Recht::Verbinden, Recht::NachrichtenSenden];

struct Umgebung {
    gateway: Arc<SpeicherGateway>,
    aktionen: Arc<RaumAktionen<SpeicherGateway, SpeicherGateway>>,
    config: Arc<RaumConfig>,
    raum: ChannelId,
}

impl Umgebung {
    fn neu() -> Self {
        let config = Arc::new(RaumConfig {
            server_id: ServerId::new(),
            kategorie_id: KategorieId::new(),
            bot_id: UserId::new(),
            ..Default::default()
        });
        let gateway = Arc::new(SpeicherGateway::neu(config.server_id));
        let raum = gateway.raum_anlegen(Some(config.kategorie_id), "Salon (64 kbps)", 64);
        let aktionen = Arc::new(RaumAktionen::neu(
            gateway.clone(),
            gateway.clone(),
            config.clone(),
            RaumMetriken::neu().unwrap(),
        ));
        Self {
            gateway,
            aktionen,
            config,
            raum,
        }
    }

    fn mitglied(&self) -> UserId {
        let u = UserId::new();
        self.gateway.verbindung_setzen(u, Some(self.raum));
        u
    }

    fn zustand(&self) -> Sperrzustand {
        Sperrzustand::aus_overwrites(
            &self.gateway.eintraege(self.raum),
            self.config.default_entitaet(),
        )
    }

    fn eintrag(&self, id: impl Into<voxhall_core::types::EntitaetId>) -> Option<OverwriteEintrag> {
        eintrag_von(&self.gateway.eintraege(self.raum), id.into()).cloned()
    }
}

fn menge(rechte: &[Recht]) -> BTreeSet<Recht> {
    rechte.iter().copied().collect()
}

fn direkt(benutzer: UserId, ziel: Option<UserId>) -> Aufruf {
    Aufruf::direkt(AufrufId::new(), benutzer, ziel)
}

fn interaktiv(benutzer: UserId) -> Aufruf {
    Aufruf::interaktiv(AufrufId::new(), benutzer, NachrichtId::new())
}

fn angewendet(ergebnis: &Ergebnis) -> bool {
    *ergebnis == Ergebnis::Angewendet(Versuch::Angewendet)
}

// ---------------------------------------------------------------------------
// Sperren / Entsperren
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sperren_mit_zwei_mitgliedern() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let x = env.mitglied();

    let ausgang = env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));

    let default = env.eintrag(env.config.default_entitaet()).unwrap();
    assert_eq!(default.verweigert, menge(&ZUTRITT));
    assert!(default.erlaubt.is_empty());
    for m in [u, x] {
        let e = env.eintrag(m).unwrap();
        assert_eq!(e.erlaubt, menge(&ZUTRITT));
        assert!(e.verweigert.is_empty());
    }
    assert!(env.zustand().verbindung_gesperrt);
    assert_eq!(env.gateway.commits(env.raum), 1);
}

#[tokio::test]
async fn zweimal_sperren_wird_abgelehnt_ohne_commit() {
    let env = Umgebung::neu();
    let u = env.mitglied();

    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    let vorher = env.gateway.eintraege(env.raum);

    let ausgang = env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::BereitsGesperrt));
    assert_eq!(env.gateway.commits(env.raum), 1);
    assert_eq!(env.gateway.eintraege(env.raum), vorher);
}

#[tokio::test]
async fn sperren_und_entsperren_stellt_ausgangszustand_her() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.mitglied();

    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    let ausgang = env.aktionen.entsperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert!(env.gateway.eintraege(env.raum).is_empty());
    assert_eq!(env.zustand(), Sperrzustand::default());
}

#[tokio::test]
async fn sperren_und_entsperren_erhaelt_bestehende_eintraege() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let stumm = env.mitglied();
    let freund = env.mitglied();
    let vorher = vec![
        OverwriteEintrag::mit(stumm.into(), &[], &[Recht::NachrichtenSenden]),
        OverwriteEintrag::mit(freund.into(), &[Recht::Verbinden, Recht::Sprechen], &[]),
    ];
    env.gateway.overwrites_setzen(env.raum, vorher.clone());

    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    // Das Schreibverbot gilt waehrend der Sperre weiter
    let e = env.eintrag(stumm).unwrap();
    assert!(e.erlaubt(Recht::Verbinden));
    assert!(e.verweigert(Recht::NachrichtenSenden));
    assert!(!env.gateway.hat_recht(env.raum, stumm, Recht::NachrichtenSenden).await.unwrap());

    let ausgang = env.aktionen.entsperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert_eq!(env.gateway.eintraege(env.raum), vorher);
    assert!(env.aktionen.vergaben().is_empty());
}

#[tokio::test]
async fn entsperren_nimmt_delegationen_zurueck() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let gast = UserId::new();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    env.aktionen.user_erlauben(&direkt(u, Some(gast)), env.raum).await.unwrap();
    assert!(env.eintrag(gast).is_some());

    env.aktionen.entsperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(env.gateway.eintraege(env.raum).is_empty());
}

#[tokio::test]
async fn entsperren_eines_offenen_raums_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let ausgang = env.aktionen.entsperren(&direkt(u, None), env.raum).await.unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::NichtGesperrt));
    assert_eq!(env.gateway.commits(env.raum), 0);
}

#[tokio::test]
async fn knopf_auf_gesperrtem_raum_schaltet_um() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();

    let ausgang = env.aktionen.sperren(&interaktiv(u), env.raum).await.unwrap();
    assert_eq!(
        ausgang.ergebnis,
        Ergebnis::Angewendet(Versuch::BereitsImZustand {
            wiederhergestellt_durch: Wiederherstellung::Gegenaktion
        })
    );
    assert!(!env.zustand().verbindung_gesperrt);
    assert_eq!(ausgang.meldung(), "Kanal entsperrt 🔓");
}

#[tokio::test]
async fn geschuetzte_eintraege_bleiben_unberuehrt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let bot_eintrag = OverwriteEintrag::mit(env.config.bot_id.into(), &[Recht::Verbinden], &[]);
    env.gateway.overwrites_setzen(env.raum, vec![bot_eintrag.clone()]);
    env.gateway.verbindung_setzen(env.config.bot_id, Some(env.raum));

    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    assert_eq!(env.eintrag(env.config.bot_id), Some(bot_eintrag.clone()));

    env.aktionen.entsperren(&direkt(u, None), env.raum).await.unwrap();
    assert_eq!(env.gateway.eintraege(env.raum), vec![bot_eintrag]);
}

// ---------------------------------------------------------------------------
// Stream-Sperre
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_sperre_laesst_nur_aufrufer_sprechen() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let x = env.mitglied();

    env.aktionen.stream_sperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(env.zustand().sprechen_gesperrt);
    assert!(env.gateway.hat_recht(env.raum, u, Recht::Sprechen).await.unwrap());
    assert!(!env.gateway.hat_recht(env.raum, x, Recht::Sprechen).await.unwrap());

    // Wer nicht sprechen darf, kann nicht entsperren
    let ausgang = env.aktionen.stream_entsperren(&direkt(x, None), env.raum).await.unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::KeinRederecht));
    assert!(env.zustand().sprechen_gesperrt);

    let ausgang = env.aktionen.stream_entsperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert!(env.gateway.eintraege(env.raum).is_empty());
}

#[tokio::test]
async fn stream_erlauben_und_verbieten() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let x = env.mitglied();
    env.aktionen.stream_sperren(&direkt(u, None), env.raum).await.unwrap();

    let ausgang = env.aktionen.stream_erlauben(&direkt(u, Some(x)), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert_eq!(ausgang.ziel, Some(x));
    assert!(env.gateway.hat_recht(env.raum, x, Recht::Sprechen).await.unwrap());

    let nochmal = env.aktionen.stream_erlauben(&direkt(u, Some(x)), env.raum).await.unwrap();
    assert_eq!(nochmal.ergebnis, Ergebnis::Abgelehnt(Ablehnung::ZielDarfBereitsSprechen(x)));

    let ausgang = env.aktionen.stream_verbieten(&direkt(u, Some(x)), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert!(!env.gateway.hat_recht(env.raum, x, Recht::Sprechen).await.unwrap());
    assert!(env.eintrag(x).is_none());

    let nochmal = env.aktionen.stream_verbieten(&direkt(u, Some(x)), env.raum).await.unwrap();
    assert_eq!(nochmal.ergebnis, Ergebnis::Abgelehnt(Ablehnung::ZielDarfNichtSprechen(x)));
}

#[tokio::test]
async fn stream_verbieten_gegen_sich_selbst_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.aktionen.stream_sperren(&direkt(u, None), env.raum).await.unwrap();

    let ausgang = env.aktionen.stream_verbieten(&direkt(u, Some(u)), env.raum).await.unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::SelbstVerbieten));
    assert!(env.gateway.hat_recht(env.raum, u, Recht::Sprechen).await.unwrap());
}

#[tokio::test]
async fn stream_erlauben_ohne_stream_sperre_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let ausgang = env
        .aktionen
        .stream_erlauben(&direkt(u, Some(UserId::new())), env.raum)
        .await
        .unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::NichtStreamGesperrt));
}

// ---------------------------------------------------------------------------
// Nutzer erlauben
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn user_erlauben_postet_und_loescht_hinweis() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let gast = UserId::new();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();

    let ausgang = env.aktionen.user_erlauben(&direkt(u, Some(gast)), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert_eq!(env.eintrag(gast).unwrap().erlaubt, menge(&ZUTRITT));

    let hinweise = env.gateway.nachrichten_in(env.raum);
    assert_eq!(hinweise.len(), 1);
    assert!(hinweise[0]
        .inhalt
        .as_deref()
        .unwrap()
        .ends_with("du kannst jetzt beitreten!"));

    tokio::time::sleep(env.config.hinweis_dauer() + Duration::from_secs(1)).await;
    assert!(env.gateway.nachrichten_in(env.raum).is_empty());

    let nochmal = env.aktionen.user_erlauben(&direkt(u, Some(gast)), env.raum).await.unwrap();
    assert_eq!(nochmal.ergebnis, Ergebnis::Abgelehnt(Ablehnung::ZielDarfBereitsBeitreten(gast)));
}

#[tokio::test]
async fn user_erlauben_in_offenem_raum_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let ausgang = env
        .aktionen
        .user_erlauben(&direkt(u, Some(UserId::new())), env.raum)
        .await
        .unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::NichtGesperrt));
    assert_eq!(env.gateway.commits(env.raum), 0);
}

#[tokio::test]
async fn direkter_aufruf_ohne_ziel_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    let ausgang = env.aktionen.user_erlauben(&direkt(u, None), env.raum).await.unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::ZielFehlt));
}

#[tokio::test(start_paused = true)]
async fn interaktives_erlauben_ueber_auswahl() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let gast = UserId::new();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();

    let aktionen = env.aktionen.clone();
    let raum = env.raum;
    let laufend = tokio::spawn(async move { aktionen.user_erlauben(&interaktiv(u), raum).await });

    let korrelation = loop {
        if let Some(k) = env.gateway.offene_auswahlen().first().copied() {
            break k;
        }
        tokio::task::yield_now().await;
    };
    assert!(env.aktionen.ziele().auswahl_empfangen(korrelation, u, Some(gast)));

    let ausgang = laufend.await.unwrap().unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert_eq!(ausgang.kontext.auswahl, Some(korrelation));
    assert!(env.eintrag(gast).is_some());
    assert!(env.gateway.offene_auswahlen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abgelaufene_auswahl_bricht_ohne_commit_ab() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.mitglied();

    let ausgang = env.aktionen.user_kicken(&interaktiv(u), env.raum).await.unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgebrochen);
    assert_eq!(env.gateway.commits(env.raum), 0);
    assert!(env.gateway.offene_auswahlen().is_empty());
}

// ---------------------------------------------------------------------------
// Kick
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kick_entfernt_eintrag_und_trennt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let x = env.mitglied();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(env.eintrag(x).is_some());

    let ausgang = env.aktionen.user_kicken(&direkt(u, Some(x)), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert!(env.eintrag(x).is_none());
    assert_eq!(env.gateway.aktueller_raum(x).await.unwrap(), None);
    // Nach dem Kick kommt x nicht mehr in den gesperrten Raum
    assert!(!env.gateway.hat_recht(env.raum, x, Recht::Verbinden).await.unwrap());
}

#[tokio::test]
async fn kick_eines_abwesenden_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let abwesend = UserId::new();
    let ausgang = env
        .aktionen
        .user_kicken(&direkt(u, Some(abwesend)), env.raum)
        .await
        .unwrap();
    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::ZielNichtImRaum(abwesend)));
}

// ---------------------------------------------------------------------------
// Versionskonflikte
// ---------------------------------------------------------------------------

#[tokio::test]
async fn konflikt_wird_mit_frischem_schnappschuss_wiederholt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.gateway.konflikte_einstreuen(2);

    let ausgang = env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    assert!(angewendet(&ausgang.ergebnis));
    assert_eq!(env.gateway.commits(env.raum), 1);
    assert!(env.zustand().verbindung_gesperrt);
}

#[tokio::test]
async fn zu_viele_konflikte_ergeben_fehler() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    env.gateway.konflikte_einstreuen(3);

    let fehler = env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap_err();
    assert!(matches!(fehler, RaumFehler::KonfliktErschoepft { versuche: 3, .. }));
    assert_eq!(env.gateway.commits(env.raum), 0);
}

#[tokio::test]
async fn kick_eines_geschuetzten_ziels_wird_abgelehnt() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let bot = env.config.bot_id;
    env.gateway.verbindung_setzen(bot, Some(env.raum));

    let ausgang = env.aktionen.user_kicken(&direkt(u, Some(bot)), env.raum).await.unwrap();

    assert_eq!(ausgang.ergebnis, Ergebnis::Abgelehnt(Ablehnung::ZielGeschuetzt(bot)));
    assert_eq!(env.gateway.aktueller_raum(bot).await.unwrap(), Some(env.raum));
    assert_eq!(env.gateway.commits(env.raum), 0);
}

#[tokio::test]
async fn gescheitertes_trennen_laesst_overwrites_unveraendert() {
    let env = Umgebung::neu();
    let u = env.mitglied();
    let x = env.mitglied();
    env.aktionen.sperren(&direkt(u, None), env.raum).await.unwrap();
    let vorher = env.gateway.eintraege(env.raum);
    env.gateway.trennen_verweigern(true);

    let fehler = env.aktionen.user_kicken(&direkt(u, Some(x)), env.raum).await.unwrap_err();

    assert!(matches!(
        fehler,
        RaumFehler::TrennenFehlgeschlagen { benutzer, .. } if benutzer == x
    ));
    assert_eq!(env.gateway.eintraege(env.raum), vorher);
    assert_eq!(env.gateway.commits(env.raum), 1);
    assert_eq!(env.gateway.aktueller_raum(x).await.unwrap(), Some(env.raum));
}
