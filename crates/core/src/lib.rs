//! voxhall-core – Gemeinsame Typen fuer voxhall
//!
//! Dieses Crate stellt die ID-Newtypes und das Ereignis-Modell der
//! Chat-Plattform bereit, die von allen anderen voxhall-Crates gemeinsam
//! genutzt werden.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::{Belegungsaenderung, KnopfId, Unterbefehl, VoxhallEreignis};
pub use types::{
    AufrufId, ChannelId, EntitaetId, KategorieId, KorrelationsId, NachrichtId, RolleId, ServerId,
    UserId,
};
