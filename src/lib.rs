//! # Warpact - Faction Conflict Coordination
//!
//! Warpact coordinates time-gated conflicts ("wars") between faction
//! leaders in a persistent multi-user simulation: declaration, grace
//! periods, two-party consensus grace bypass, ally opt-in with
//! independent grace clocks, tick-driven privilege activation, and
//! crash-safe persistence with legacy-format migration.
//!
//! ## Core Concepts
//!
//! - **Conflict**: a directional (initiator, target) dispute between two
//!   leader-equivalent principals
//! - **Grace period**: fixed delay after declaration before elevated
//!   privileges are granted
//! - **Bypass**: the elevated privilege state, reached by elapsed grace
//!   or by both parties consenting early
//! - **Ally**: a third party attached to one side, serving their own
//!   grace period starting at first login after joining
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::{Arc, Mutex};
//! use warpact::{JsonSnapshotArchive, SystemClock, TickDriver, WarConfig, WarStore};
//!
//! let store = WarStore::open(
//!     WarConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(my_oracle),
//!     Arc::new(my_gateway),
//!     Arc::new(JsonSnapshotArchive::new("wars.json")),
//! )?;
//! let store = Arc::new(Mutex::new(store));
//! let driver = TickDriver::new(Arc::clone(&store));
//! // host scheduler: driver.tick() once per tick
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod command;
pub mod conflict;
pub mod error;
pub mod gateway;
pub mod oracle;
pub mod persist;
pub mod principal;
pub mod rank;
pub mod runtime;
pub mod store;

// Re-export primary types at crate root for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{dispatch, Command, CommandOutcome};
pub use conflict::{BypassStatus, Conflict, ConflictKey, ConflictView, Side};
pub use error::{ConflictError, PersistError, WarError, WarResult};
pub use gateway::{PermissionSync, PointsSource, PrivilegeGateway};
pub use oracle::IdentityOracle;
pub use persist::{ConflictSeed, JsonSnapshotArchive, MemoryArchive, SnapshotArchive};
pub use principal::{FactionId, PrincipalId};
pub use rank::Rank;
pub use runtime::{ReconcileConfig, ReconcileWorker, SharedStore, TickDriver};
pub use store::{WarConfig, WarStore};
