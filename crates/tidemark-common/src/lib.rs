pub mod error;
pub mod migration;
pub mod types;

pub use error::{Direction, Error, MigrationRef, Result, RunFailure};
pub use migration::{ActionFn, AppliedRecord, Migration, MigrationAction, Target};
pub use types::{Version, checksum};
