//! tripsync-core - Core library for tripsync
//!
//! This crate contains the schedule models, the on-device store, the remote
//! gateway abstraction and the sync engine that reconciles the two. Clients
//! (CLI, mobile shells) drive it through [`SyncEngine`] and [`LocalStore`].

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{ConflictPolicy, SyncSettings};
pub use error::{Error, Result};
pub use gateway::{HttpGateway, HttpGatewayConfig, MemoryGateway, RemoteError, RemoteGateway, WakeHint};
pub use models::{EntryId, MutationKind, PendingMutation, ScheduleEntry, SyncConflict, SyncCursor};
pub use services::LocalStore;
pub use state::{CyclePhase, SyncState};
pub use sync::{NotificationTrigger, SyncEngine, SyncError, SyncOutcome, SyncWorker};
