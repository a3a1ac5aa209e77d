pub mod rows;
pub mod service;
pub mod sheets;

pub use service::{InitialSyncReport, SyncService, SyncStatus, SyncTask, DEFAULT_POLL_INTERVAL};
pub use sheets::{SheetsClient, SheetsConfig};
