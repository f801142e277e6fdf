//! Generic CRUD operations over identified records.
//!
//! Every operation runs against a caller-owned [`Session`] and honours the
//! repository's [`RepositoryConfig`]:
//!
//! - `check_found`: by-id reads, updates and deletes fail with
//!   [`RepositoryError::NotFound`] when the record is absent
//! - `log_level`: severity of the one record each mutating call emits
//!
//! Zero affected rows is reported as `None` / `0`, never as an error.

use core::fmt;
use std::sync::Arc;

use idrepo_core::{EntityId, IntegerId, describe_identified};

use crate::cancel::CancellationSignal;
use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, RepositoryResult};
use crate::logging::{OPERATION_TEMPLATE, OperationLogger};
use crate::predicate::Predicate;
use crate::record::{Record, id_key};
use crate::session::{ChangeToken, Query, Session, StorageBackend};
use crate::tracking::TrackingMode;

/// Entry point for repository operations.
///
/// Cheap to clone; clones share the logger.
#[derive(Clone, Default)]
pub struct Repository {
    config: RepositoryConfig,
    logger: Option<Arc<dyn OperationLogger>>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

impl Repository {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn OperationLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Composable query over `T`; nothing runs until it is executed.
    pub fn query<'s, T, B>(&self, session: &'s mut Session<B>, tracking: TrackingMode) -> Query<'s, T, B>
    where
        T: Record,
        B: StorageBackend,
    {
        session.set::<T>().tracking(tracking)
    }

    /// First `T` whose id equals `id`.
    pub async fn get_by_id<T, B>(
        &self,
        session: &mut Session<B>,
        id: &T::Id,
        tracking: TrackingMode,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<Option<Arc<T>>>
    where
        T: Record,
        B: StorageBackend,
    {
        self.get_by_id_with::<T, B, _>(session, id, tracking, |query| query, cancel)
            .await
    }

    /// [`get_by_id`](Self::get_by_id) with a caller-supplied shaping step
    /// applied to the query before the id filter.
    pub async fn get_by_id_with<T, B, F>(
        &self,
        session: &mut Session<B>,
        id: &T::Id,
        tracking: TrackingMode,
        include: F,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<Option<Arc<T>>>
    where
        T: Record,
        B: StorageBackend,
        F: for<'s> FnOnce(Query<'s, T, B>) -> Query<'s, T, B>,
    {
        let query = include(self.query::<T, B>(session, tracking));
        let found = query.filter(Predicate::id_eq(id)).first(cancel).await?;

        if found.is_none() && self.config.check_found {
            return Err(not_found::<T>(id));
        }
        Ok(found)
    }

    /// Insert `item` and save. Returns the stored entity, carrying any
    /// store-generated id, or `None` when nothing was written.
    pub async fn add_item<T, B>(
        &self,
        session: &mut Session<B>,
        item: T,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<Option<T>>
    where
        T: Record,
        B: StorageBackend,
    {
        cancel.check()?;
        let description = describe_identified(&item);

        let token = session.add(item)?;
        let affected = save_or_discard(session, token, cancel).await?;
        self.log("add_item", &description, affected);

        Ok(if affected > 0 {
            session.take_inserted::<T>(token)
        } else {
            None
        })
    }

    /// Overwrite the stored `T` with `item` and save.
    pub async fn update_item<T, B>(
        &self,
        session: &mut Session<B>,
        item: T,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<Option<T>>
    where
        T: Record,
        B: StorageBackend,
    {
        require_id(&item)?;
        if self.config.check_found {
            self.get_by_id::<T, B>(session, item.id(), TrackingMode::default(), cancel)
                .await?;
        }
        cancel.check()?;

        let description = describe_identified(&item);
        let token = session.attach_modified(item.clone())?;
        let affected = save_or_discard(session, token, cancel).await?;
        self.log("update_item", &description, affected);

        Ok((affected > 0).then_some(item))
    }

    /// Delete the `T` with `id` through the change tracker and save.
    pub async fn delete_item<T, B>(
        &self,
        session: &mut Session<B>,
        id: T::Id,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<u64>
    where
        T: Record + Default,
        B: StorageBackend,
    {
        if id.is_unset() {
            return Err(RepositoryError::invalid_argument(format!(
                "{} has no id",
                T::entity_name()
            )));
        }
        if self.config.check_found {
            self.get_by_id::<T, B>(session, &id, TrackingMode::default(), cancel)
                .await?;
        }
        cancel.check()?;

        let mut placeholder = T::default();
        placeholder.set_id(id);

        let description = describe_identified(&placeholder);
        let token = session.mark_deleted(placeholder)?;
        let affected = save_or_discard(session, token, cancel).await?;
        self.log("delete_item", &description, affected);

        Ok(affected)
    }

    /// Set-based delete of the `T` with integer `id`.
    ///
    /// Not available on backends without set-based delete.
    pub async fn delete_item_execute<T, B>(
        &self,
        session: &mut Session<B>,
        id: T::Id,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<u64>
    where
        T: Record,
        T::Id: IntegerId,
        B: StorageBackend,
    {
        if self.config.check_found {
            self.get_by_id::<T, B>(session, &id, TrackingMode::default(), cancel)
                .await?;
        }
        self.execute_delete("delete_item_execute", session, Predicate::<T>::id_eq(&id), cancel)
            .await
    }

    /// Set-based delete of every `T` matching `predicate`.
    ///
    /// Runs directly against the backend; entities already loaded in the
    /// session are left as they are.
    pub async fn delete_items_execute<T, B>(
        &self,
        session: &mut Session<B>,
        predicate: Predicate<T>,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<u64>
    where
        T: Record,
        B: StorageBackend,
    {
        self.execute_delete("delete_items_execute", session, predicate, cancel)
            .await
    }

    async fn execute_delete<T, B>(
        &self,
        method: &'static str,
        session: &mut Session<B>,
        predicate: Predicate<T>,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<u64>
    where
        T: Record,
        B: StorageBackend,
    {
        let affected = session.execute_delete(&predicate, cancel).await?;
        self.log(method, &predicate, affected);
        Ok(affected)
    }

    fn log(&self, method: &str, input: &dyn fmt::Display, affected: u64) {
        if let Some(logger) = &self.logger {
            logger.log(self.config.log_level, OPERATION_TEMPLATE, &[&method, input, &affected]);
        }
    }
}

/// Save `session`; on failure drop the change registered under `token` so it
/// is not replayed by later saves.
async fn save_or_discard<B: StorageBackend>(
    session: &mut Session<B>,
    token: ChangeToken,
    cancel: &CancellationSignal,
) -> RepositoryResult<u64> {
    match session.save_changes(cancel).await {
        Ok(affected) => Ok(affected),
        Err(err) => {
            session.discard(token);
            Err(err)
        }
    }
}

fn require_id<T: Record>(item: &T) -> RepositoryResult<()> {
    if item.has_id() {
        Ok(())
    } else {
        Err(RepositoryError::invalid_argument(format!(
            "{} has no id",
            T::entity_name()
        )))
    }
}

fn not_found<T: Record>(id: &T::Id) -> RepositoryError {
    RepositoryError::not_found(T::entity_name(), id_key(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::logging::LogSeverity;
    use crate::test_support::{CapturingLogger, Customer, memory_session, seed};

    fn repository(check_found: bool) -> (Repository, Arc<CapturingLogger>) {
        let logger = Arc::new(CapturingLogger::default());
        let config = RepositoryConfig::default().with_check_found(check_found);
        (Repository::new(config).with_logger(logger.clone()), logger)
    }

    #[tokio::test]
    async fn get_by_id_returns_none_or_not_found() {
        let (_, mut session) = memory_session();
        let cancel = CancellationSignal::new();

        let (lenient, _) = repository(false);
        let found = lenient
            .get_by_id::<Customer, _>(&mut session, &9, TrackingMode::default(), &cancel)
            .await
            .unwrap();
        assert!(found.is_none());

        let (strict, _) = repository(true);
        let err = strict
            .get_by_id::<Customer, _>(&mut session, &9, TrackingMode::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "entity of type Customer with id 9 not found");
    }

    #[tokio::test]
    async fn include_shapes_the_query() {
        let (db, mut session) = memory_session();
        seed(&db, &[(1, "Ada")]);
        let (repo, _) = repository(false);

        let found = repo
            .get_by_id_with::<Customer, _, _>(
                &mut session,
                &1,
                TrackingMode::NoTracking,
                |query| query.filter(Predicate::eq("name", "Bob")),
                &CancellationSignal::new(),
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn mutating_calls_log_once() {
        let (_, mut session) = memory_session();
        let cancel = CancellationSignal::new();
        let (repo, logger) = repository(false);

        let stored = repo
            .add_item(&mut session, Customer::new(0, "Ada"), &cancel)
            .await
            .unwrap()
            .unwrap();
        repo.delete_item::<Customer, _>(&mut session, stored.id, &cancel)
            .await
            .unwrap();

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, LogSeverity::Debug);
        assert_eq!(records[0].1, "add_item(Customer #0) result=1");
        assert_eq!(
            records[1].1,
            format!("delete_item(Customer #{}) result=1", stored.id)
        );
    }

    #[tokio::test]
    async fn failed_save_does_not_poison_the_session() {
        let (db, mut session) = memory_session();
        seed(&db, &[(1, "Ada")]);
        let cancel = CancellationSignal::new();
        let (repo, logger) = repository(false);

        let err = repo
            .add_item(&mut session, Customer::new(1, "Dup"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage(StorageError::Constraint(_))));
        assert!(!session.has_pending_changes());

        let stored = repo
            .add_item(&mut session, Customer::new(0, "Valid"), &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, 2);
        assert_eq!(db.row_count("customers"), 2);
        assert_eq!(logger.records().len(), 1);
    }

    #[tokio::test]
    async fn no_logger_is_a_no_op() {
        let (_, mut session) = memory_session();
        let repo = Repository::default();
        let stored = repo
            .add_item(&mut session, Customer::new(0, "Ada"), &CancellationSignal::new())
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn update_requires_an_id() {
        let (_, mut session) = memory_session();
        let (repo, logger) = repository(false);
        let err = repo
            .update_item(&mut session, Customer::new(0, "Ada"), &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidArgument(_)));
        assert!(logger.records().is_empty());
    }
}
