//! # voxhall-rooms
//!
//! Raum-Engine fuer voxhall: temporaere Voice-Raeume, die Mitglieder
//! sperren, stummschalten, an andere delegieren und aus denen sie kicken
//! koennen. Ein Pool-Verwalter haelt leere Raeume bereit und raeumt
//! verlassene auf.
//!
//! ## Architektur
//!
//! ```text
//! VoxhallEreignis ──> Dispatcher ──┬──> RaumAktionen ──> ZielAufloeser
//!                                  │        │
//!                                  │        └──> overwrites_anwenden (rein)
//!                                  └──> PoolVerwalter
//!                                            │
//!                    RaumGateway / RechtePruefer (Capabilities)
//! ```
//!
//! Die Engine kennt keine konkrete Plattform. [`speicher::SpeicherGateway`]
//! implementiert die Capabilities im Arbeitsspeicher.

pub mod aktionen;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod kontrollflaeche;
pub mod overwrite;
pub mod pool;
pub mod speicher;
pub mod vergabe;
pub mod ziel;
pub mod zustand;

pub use aktionen::{Ablehnung, Aktion, Aktionsausgang, Aufruf, AufrufArt, Ergebnis, RaumAktionen};
pub use config::RaumConfig;
pub use dispatcher::Dispatcher;
pub use error::{GatewayFehler, GatewayResult, RaumFehler, RaumResult};
pub use gateway::{Antwort, AntwortKontext, NeuerRaum, OverwriteSchnappschuss, RaumGateway, RaumInfo, RechtePruefer};
pub use kontrollflaeche::{kontrollflaeche_rendern, Kontrollflaeche};
pub use overwrite::{overwrites_anwenden, Direktive, GeschuetzteEntitaeten, OverwriteEintrag, Recht};
pub use pool::{Ausloeser, PoolVerwalter, Wartungsbericht};
pub use speicher::SpeicherGateway;
pub use vergabe::{Sperrart, Vergabebuch, Vergaben};
pub use ziel::{Aufloesung, ZielAufloeser, Zielquelle, AUSWAHL_TIMEOUT};
pub use zustand::{Politik, Sperrzustand, Umschaltung, Versuch, Wiederherstellung};
