//! Infrastructure layer: repository operations, storage sessions, backends.
//!
//! ```ignore
//! let repo = Repository::new(RepositoryConfig::from_env()?)
//!     .with_logger(Arc::new(TracingOperationLogger));
//! let mut session = Session::new(PostgresBackend::new(pool));
//! let cancel = CancellationSignal::new();
//!
//! let stored = repo.add_item(&mut session, customer, &cancel).await?;
//! let found = repo
//!     .get_by_id::<Customer, _>(&mut session, &id, TrackingMode::default(), &cancel)
//!     .await?;
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod predicate;
pub mod record;
pub mod repository;
pub mod session;
pub mod tracking;

#[cfg(test)]
mod test_support;

pub use cancel::CancellationSignal;
pub use config::RepositoryConfig;
pub use error::{RepositoryError, RepositoryResult, StorageError, StorageResult};
pub use logging::{LogSeverity, OperationLogger, TracingOperationLogger};
pub use predicate::{CompareOp, Filter, Predicate};
pub use record::Record;
pub use repository::Repository;
pub use session::{
    InMemoryBackend, InMemoryDatabase, PostgresBackend, Query, Session, StorageBackend,
};
pub use tracking::{EntryState, TrackingMode};
