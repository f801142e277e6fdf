use core::marker::PhantomData;
use std::sync::Arc;

use crate::cancel::CancellationSignal;
use crate::error::RepositoryResult;
use crate::predicate::{Filter, Predicate};
use crate::record::Record;
use crate::tracking::TrackingMode;

use super::{CountRequest, Direction, FetchRequest, Session, StorageBackend};

/// Lazily evaluated query over the rows of `T`.
///
/// Nothing reaches the backend until [`fetch_all`](Query::fetch_all),
/// [`first`](Query::first) or [`count`](Query::count) runs.
pub struct Query<'s, T, B> {
    session: &'s mut Session<B>,
    tracking: TrackingMode,
    filter: Filter,
    order_by: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
    _record: PhantomData<fn() -> T>,
}

impl<'s, T: Record, B: StorageBackend> Query<'s, T, B> {
    pub(crate) fn new(session: &'s mut Session<B>) -> Self {
        Self {
            session,
            tracking: TrackingMode::default(),
            filter: Filter::All,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            _record: PhantomData,
        }
    }

    /// Narrow the query; successive filters are combined with AND.
    pub fn filter(mut self, predicate: Predicate<T>) -> Self {
        self.filter = self.filter.and(predicate.into_filter());
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn tracking(mut self, tracking: TrackingMode) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        self.tracking
    }

    pub fn to_request(&self) -> FetchRequest {
        FetchRequest {
            table: T::TABLE,
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }

    pub async fn fetch_all(self, cancel: &CancellationSignal) -> RepositoryResult<Vec<Arc<T>>> {
        let request = self.to_request();
        let rows = self.session.fetch_rows(&request, cancel).await?;
        rows.into_iter()
            .map(|row| self.session.resolve::<T>(row, self.tracking))
            .collect()
    }

    pub async fn first(self, cancel: &CancellationSignal) -> RepositoryResult<Option<Arc<T>>> {
        let mut all = self.limit(1).fetch_all(cancel).await?;
        Ok(if all.is_empty() { None } else { Some(all.swap_remove(0)) })
    }

    /// Number of matching rows. Ordering and paging are ignored.
    pub async fn count(self, cancel: &CancellationSignal) -> RepositoryResult<u64> {
        let request = CountRequest {
            table: T::TABLE,
            filter: self.filter,
        };
        self.session.count_rows(&request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Customer, memory_session, seed};
    use crate::tracking::EntryState;

    #[tokio::test]
    async fn filters_order_and_page() {
        let (db, mut session) = memory_session();
        seed(&db, &[(1, "Ada"), (2, "Bob"), (3, "Cyd"), (4, "Dee")]);
        let cancel = CancellationSignal::new();

        let names: Vec<String> = session
            .set::<Customer>()
            .filter(Predicate::gt("id", 1))
            .order_by("name", Direction::Desc)
            .offset(1)
            .limit(2)
            .fetch_all(&cancel)
            .await
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["Cyd", "Bob"]);

        let count = session
            .set::<Customer>()
            .filter(Predicate::le("id", 2))
            .limit(1)
            .count(&cancel)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn identity_resolution_reuses_instances() {
        let (db, mut session) = memory_session();
        seed(&db, &[(1, "Ada")]);
        let cancel = CancellationSignal::new();

        let a = session.set::<Customer>().first(&cancel).await.unwrap().unwrap();
        let b = session.set::<Customer>().first(&cancel).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(session.entry_state::<Customer>(&1), EntryState::Detached);
    }

    #[tokio::test]
    async fn no_tracking_yields_fresh_instances() {
        let (db, mut session) = memory_session();
        seed(&db, &[(1, "Ada")]);
        let cancel = CancellationSignal::new();

        let a = session
            .set::<Customer>()
            .tracking(TrackingMode::NoTracking)
            .first(&cancel)
            .await
            .unwrap()
            .unwrap();
        let b = session
            .set::<Customer>()
            .tracking(TrackingMode::NoTracking)
            .first(&cancel)
            .await
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
    }

    #[tokio::test]
    async fn track_all_registers_unchanged() {
        let (db, mut session) = memory_session();
        seed(&db, &[(1, "Ada")]);

        session
            .set::<Customer>()
            .tracking(TrackingMode::TrackAll)
            .fetch_all(&CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(session.entry_state::<Customer>(&1), EntryState::Unchanged);
    }

    #[tokio::test]
    async fn empty_result_yields_none() {
        let (_, mut session) = memory_session();
        let found = session
            .set::<Customer>()
            .filter(Predicate::id_eq(&9))
            .first(&CancellationSignal::new())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
