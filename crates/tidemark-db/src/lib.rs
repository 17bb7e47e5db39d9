pub mod schema;
pub mod state_store;
pub mod store;
pub mod target;

pub use schema::StateTables;
pub use state_store::SqliteStateStore;
pub use store::{LockAttempt, LockHolder, LockStore, StateStore};
pub use target::SqliteTarget;
