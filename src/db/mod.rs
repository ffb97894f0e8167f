mod hit_store;
mod migrations;
mod open;

pub use hit_store::{HitStore, PersistedRead, StoreCounts, StoredProtein};
pub use open::{open_db, open_db_in_memory};
