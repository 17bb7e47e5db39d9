//! Migration execution engine.
//!
//! Sources discover migrations, a [`StateStore`](tidemark_db::StateStore)
//! remembers which ones ran, and the up/down executors reconcile the two
//! under a run lock. [`Engine`] bundles the pieces for callers that don't
//! need to wire them by hand.

pub mod down;
pub mod engine;
pub mod guard;
pub mod interrupt;
mod reconcile;
pub mod source;
pub mod status;
pub mod up;

pub use down::{DownMode, DownReport, run_down};
pub use engine::{Engine, EngineOptions};
pub use guard::RunLock;
pub use interrupt::Interrupt;
pub use source::{CodeSource, DirectorySource, MigrationSource};
pub use status::{MigrationState, StatusEntry, StatusReport, run_status};
pub use up::{UpReport, run_up};
