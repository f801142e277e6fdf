//! Storage session: unit of work over a [`StorageBackend`].
//!
//! A [`Session`] collects pending inserts, updates and deletes and applies them
//! atomically on [`Session::save_changes`]. It also keeps:
//!
//! - a change tracker (per-entry [`EntryState`]); entities read with
//!   [`TrackingMode::TrackAll`] keep their original row, and edits made
//!   through [`Session::tracked_mut`] are saved as updates
//! - an identity map, so reads that resolve identity return the same
//!   `Arc<T>` for one id within the session
//!
//! Backends only see JSON rows and untyped [`Filter`]s; typing stays on the
//! session side.

mod in_memory;
mod postgres;
mod query;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use idrepo_core::{EntityId, IdGeneration};

use crate::cancel::CancellationSignal;
use crate::error::{RepositoryError, RepositoryResult, StorageError, StorageResult};
use crate::predicate::{Filter, Predicate};
use crate::record::{Record, from_row, id_key, json_key, to_row};
use crate::tracking::{EntryState, TrackingMode};

pub use in_memory::{InMemoryBackend, InMemoryDatabase};
pub use postgres::PostgresBackend;
pub use query::Query;

/// Sort direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Row read request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub table: &'static str,
    pub filter: Filter,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Row count request.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRequest {
    pub table: &'static str,
    pub filter: Filter,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change in a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub table: &'static str,
    pub id_column: &'static str,
    pub kind: ChangeKind,
    /// Id column value; `None` for inserts whose key the store assigns.
    pub key: Option<JsonValue>,
    /// Key strategy for inserts without a key.
    pub generation: IdGeneration,
    /// Largest key a `Sequence` may assign.
    pub sequence_max: i64,
    pub row: JsonValue,
}

/// Outcome of one [`Change`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeResult {
    pub affected: u64,
    /// Row as stored, when the backend reports it.
    pub row: Option<JsonValue>,
}

/// Relational store reached by a session.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name used in errors.
    fn name(&self) -> &'static str;

    async fn fetch(&self, request: &FetchRequest) -> StorageResult<Vec<JsonValue>>;

    async fn count(&self, request: &CountRequest) -> StorageResult<u64>;

    /// Apply `changes` atomically: either every change is applied or none is.
    ///
    /// Returns one result per change, in order.
    async fn apply(&self, changes: &[Change]) -> StorageResult<Vec<ChangeResult>>;

    /// Set-based delete of every row matching `filter`.
    ///
    /// Backends without set-based delete return `StorageError::Unsupported`.
    async fn execute_delete(&self, table: &'static str, filter: &Filter) -> StorageResult<u64>;
}

#[async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn fetch(&self, request: &FetchRequest) -> StorageResult<Vec<JsonValue>> {
        (**self).fetch(request).await
    }

    async fn count(&self, request: &CountRequest) -> StorageResult<u64> {
        (**self).count(request).await
    }

    async fn apply(&self, changes: &[Change]) -> StorageResult<Vec<ChangeResult>> {
        (**self).apply(changes).await
    }

    async fn execute_delete(&self, table: &'static str, filter: &Filter) -> StorageResult<u64> {
        (**self).execute_delete(table, filter).await
    }
}

/// Handle for a change registered with a [`Session`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken(u64);

type Instance = Arc<dyn Any + Send + Sync>;
type Materializer = fn(JsonValue) -> RepositoryResult<Instance>;
type Snapshotter = fn(&(dyn Any + Send + Sync)) -> RepositoryResult<Option<JsonValue>>;

fn materialize<T: Record>(row: JsonValue) -> RepositoryResult<Instance> {
    let instance: Instance = Arc::new(from_row::<T>(row)?);
    Ok(instance)
}

fn snapshot<T: Record>(instance: &(dyn Any + Send + Sync)) -> RepositoryResult<Option<JsonValue>> {
    instance.downcast_ref::<T>().map(to_row::<T>).transpose()
}

/// Table mapping and typed hooks of one record type, usable behind `dyn Any`.
#[derive(Clone, Copy)]
struct RecordShape {
    type_id: TypeId,
    table: &'static str,
    id_column: &'static str,
    generation: IdGeneration,
    sequence_max: i64,
    materialize: Materializer,
    snapshot: Snapshotter,
}

impl RecordShape {
    fn of<T: Record>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            table: T::TABLE,
            id_column: T::ID_COLUMN,
            generation: <T::Id as EntityId>::GENERATION,
            sequence_max: <T::Id as EntityId>::SEQUENCE_MAX,
            materialize: materialize::<T>,
            snapshot: snapshot::<T>,
        }
    }

    fn change(&self, kind: ChangeKind, key: Option<JsonValue>, row: JsonValue) -> Change {
        Change {
            table: self.table,
            id_column: self.id_column,
            kind,
            key,
            generation: self.generation,
            sequence_max: self.sequence_max,
            row,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    type_id: TypeId,
    key: String,
}

impl EntryKey {
    fn of<T: Record>(key: String) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key,
        }
    }
}

struct PendingChange {
    token: ChangeToken,
    /// `None` until the store assigns a key.
    entry: Option<EntryKey>,
    change: Change,
    shape: RecordShape,
}

/// An entry whose instance is watched for changes.
struct TrackedEntry {
    shape: RecordShape,
    key: JsonValue,
    /// Row form of the instance as last read or saved.
    original: JsonValue,
}

/// Unit of work over a storage backend.
pub struct Session<B> {
    backend: B,
    pending: Vec<PendingChange>,
    tracked: HashMap<EntryKey, TrackedEntry>,
    identity_map: HashMap<EntryKey, Instance>,
    inserted: HashMap<ChangeToken, Instance>,
    next_token: u64,
}

impl<B: StorageBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pending: Vec::new(),
            tracked: HashMap::new(),
            identity_map: HashMap::new(),
            inserted: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start a query over `T` with the default tracking mode.
    pub fn set<T: Record>(&mut self) -> Query<'_, T, B> {
        Query::new(self)
    }

    /// Register `item` for insertion.
    ///
    /// Items with an unset id get a store-assigned key on save; read it back
    /// with [`Session::take_inserted`].
    pub fn add<T: Record>(&mut self, item: T) -> RepositoryResult<ChangeToken> {
        let key = item.has_id().then(|| item.id().to_json());
        let entry = item.has_id().then(|| EntryKey::of::<T>(id_key(item.id())));
        let shape = RecordShape::of::<T>();
        let change = shape.change(ChangeKind::Insert, key, to_row(&item)?);
        Ok(self.register(entry, change, shape))
    }

    /// Register `item` as modified, attaching it if the session does not know it.
    pub fn attach_modified<T: Record>(&mut self, item: T) -> RepositoryResult<ChangeToken> {
        let entry = require_entry(&item, "update")?;
        let shape = RecordShape::of::<T>();
        let change = shape.change(ChangeKind::Update, Some(item.id().to_json()), to_row(&item)?);
        Ok(self.register(Some(entry), change, shape))
    }

    /// Register `item` for deletion. Only its id is used.
    pub fn mark_deleted<T: Record>(&mut self, item: T) -> RepositoryResult<ChangeToken> {
        let entry = require_entry(&item, "delete")?;
        let shape = RecordShape::of::<T>();
        let change = shape.change(ChangeKind::Delete, Some(item.id().to_json()), to_row(&item)?);
        Ok(self.register(Some(entry), change, shape))
    }

    fn register(&mut self, entry: Option<EntryKey>, change: Change, shape: RecordShape) -> ChangeToken {
        let token = ChangeToken(self.next_token);
        self.next_token += 1;

        let existing = entry
            .as_ref()
            .and_then(|e| self.pending.iter().position(|p| p.entry.as_ref() == Some(e)));

        match existing {
            Some(idx) => {
                let current = &mut self.pending[idx];
                match (current.change.kind, change.kind) {
                    // Still an insert, with the latest values.
                    (ChangeKind::Insert, ChangeKind::Update) => current.change.row = change.row,
                    // Never reached the store: nothing to delete.
                    (ChangeKind::Insert, ChangeKind::Delete) => {
                        self.pending.remove(idx);
                    }
                    _ => {
                        current.token = token;
                        current.change = change;
                    }
                }
            }
            None => self.pending.push(PendingChange {
                token,
                entry,
                change,
                shape,
            }),
        }
        token
    }

    /// Drop the pending change registered under `token`.
    ///
    /// Returns false when it is no longer pending (saved, merged into an
    /// earlier insert, or already dropped).
    pub fn discard(&mut self, token: ChangeToken) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.token != token);
        self.pending.len() != before
    }

    /// Whether a save would write anything, including edits to tracked instances.
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
            || self
                .tracked
                .keys()
                .any(|entry| matches!(self.is_edited(entry), Some(Ok(true))))
    }

    /// Apply every pending change in one atomic unit of work.
    ///
    /// Tracked instances that were edited since they were read are saved as
    /// updates. Returns the total number of affected rows. On failure the
    /// pending changes are kept and the store is left untouched.
    pub async fn save_changes(&mut self, cancel: &CancellationSignal) -> RepositoryResult<u64> {
        cancel.check()?;
        self.detect_changes()?;
        if self.pending.is_empty() {
            return Ok(0);
        }

        let changes: Vec<Change> = self.pending.iter().map(|p| p.change.clone()).collect();
        let results = cancel.run(self.backend.apply(&changes)).await?;
        if results.len() != changes.len() {
            return Err(StorageError::state(format!(
                "{} returned {} results for {} changes",
                self.backend.name(),
                results.len(),
                changes.len()
            ))
            .into());
        }

        let mut affected = 0;
        let mut first_error = None;
        for (pending, result) in std::mem::take(&mut self.pending).into_iter().zip(results) {
            affected += result.affected;
            if let Err(err) = self.settle(pending, result) {
                tracing::warn!(error = %err, "failed to refresh entry after save");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(affected),
        }
    }

    /// Whether the tracked instance behind `entry` differs from its original row.
    fn is_edited(&self, entry: &EntryKey) -> Option<RepositoryResult<bool>> {
        let tracked = self.tracked.get(entry)?;
        let instance = self.identity_map.get(entry)?;
        if self.pending.iter().any(|p| p.entry.as_ref() == Some(entry)) {
            return None;
        }
        Some((tracked.shape.snapshot)(&**instance).map(|row| {
            row.is_some_and(|row| row != tracked.original)
        }))
    }

    /// Queue an update for every tracked instance edited since it was read.
    fn detect_changes(&mut self) -> RepositoryResult<()> {
        let mut edited = Vec::new();
        for (entry, tracked) in &self.tracked {
            if self.pending.iter().any(|p| p.entry.as_ref() == Some(entry)) {
                continue;
            }
            let Some(instance) = self.identity_map.get(entry) else {
                continue;
            };
            let Some(row) = (tracked.shape.snapshot)(&**instance)? else {
                continue;
            };
            if row != tracked.original {
                let change = tracked
                    .shape
                    .change(ChangeKind::Update, Some(tracked.key.clone()), row);
                edited.push((entry.clone(), change, tracked.shape));
            }
        }
        for (entry, change, shape) in edited {
            tracing::debug!(table = change.table, key = %entry.key, "tracked entity edited");
            self.register(Some(entry), change, shape);
        }
        Ok(())
    }

    fn settle(&mut self, pending: PendingChange, result: ChangeResult) -> RepositoryResult<()> {
        let PendingChange {
            token,
            entry,
            change,
            shape,
        } = pending;

        match change.kind {
            ChangeKind::Insert => {
                if result.affected == 0 {
                    return Ok(());
                }
                let row = result.row.unwrap_or(change.row);
                let key = row.get(change.id_column).cloned();
                let entry = match entry {
                    Some(entry) => Some(entry),
                    None => key.as_ref().and_then(json_key).map(|key| EntryKey {
                        type_id: shape.type_id,
                        key,
                    }),
                };
                let instance = (shape.materialize)(row)?;
                if let (Some(entry), Some(key)) = (entry, key) {
                    self.track(entry, shape, key, instance.clone())?;
                }
                self.inserted.insert(token, instance);
            }
            ChangeKind::Update => {
                let (Some(entry), Some(key)) = (entry, change.key) else {
                    return Ok(());
                };
                if result.affected == 0 {
                    self.forget(&entry);
                    return Ok(());
                }
                let instance = (shape.materialize)(result.row.unwrap_or(change.row))?;
                self.track(entry, shape, key, instance)?;
            }
            ChangeKind::Delete => {
                if let Some(entry) = entry {
                    self.forget(&entry);
                }
            }
        }
        Ok(())
    }

    fn track(
        &mut self,
        entry: EntryKey,
        shape: RecordShape,
        key: JsonValue,
        instance: Instance,
    ) -> RepositoryResult<()> {
        let original = (shape.snapshot)(&*instance)?.unwrap_or(JsonValue::Null);
        self.tracked.insert(
            entry.clone(),
            TrackedEntry {
                shape,
                key,
                original,
            },
        );
        self.identity_map.insert(entry, instance);
        Ok(())
    }

    fn forget(&mut self, entry: &EntryKey) {
        self.tracked.remove(entry);
        self.identity_map.remove(entry);
    }

    /// Stored form of an insert applied by the last successful save.
    ///
    /// Carries the store-assigned id. Each token can be taken once.
    pub fn take_inserted<T: Record>(&mut self, token: ChangeToken) -> Option<T> {
        let instance = self.inserted.remove(&token)?;
        instance.downcast_ref::<T>().cloned()
    }

    /// Mutable access to the tracked `T` with the given id.
    ///
    /// Edits are picked up by the next [`save_changes`](Self::save_changes).
    /// `Arc`s handed out by earlier reads keep the value they were read with;
    /// later reads through the session see the edited instance.
    pub fn tracked_mut<T: Record>(&mut self, id: &T::Id) -> Option<&mut T> {
        let entry = EntryKey::of::<T>(id_key(id));
        if !self.tracked.contains_key(&entry) {
            return None;
        }
        let slot = self.identity_map.get_mut(&entry)?;
        if Arc::get_mut(slot).is_none() {
            let copy: Instance = Arc::new((**slot).downcast_ref::<T>()?.clone());
            *slot = copy;
        }
        Arc::get_mut(slot)?.downcast_mut::<T>()
    }

    /// Set-based delete of the rows of `T` matching `predicate`.
    ///
    /// Runs directly against the backend: the change tracker and identity map
    /// are not consulted or updated.
    pub async fn execute_delete<T: Record>(
        &mut self,
        predicate: &Predicate<T>,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<u64> {
        cancel
            .run(self.backend.execute_delete(T::TABLE, predicate.filter()))
            .await
    }

    /// Persistence state of the `T` with the given id.
    pub fn entry_state<T: Record>(&self, id: &T::Id) -> EntryState {
        let entry = EntryKey::of::<T>(id_key(id));
        if let Some(pending) = self.pending.iter().find(|p| p.entry.as_ref() == Some(&entry)) {
            return match pending.change.kind {
                ChangeKind::Insert => EntryState::Added,
                ChangeKind::Update => EntryState::Modified,
                ChangeKind::Delete => EntryState::Deleted,
            };
        }
        match self.is_edited(&entry) {
            Some(Ok(true)) => EntryState::Modified,
            Some(_) => EntryState::Unchanged,
            None if self.tracked.contains_key(&entry) => EntryState::Unchanged,
            None => EntryState::Detached,
        }
    }

    /// Stop tracking the `T` with the given id, dropping any pending change.
    pub fn detach<T: Record>(&mut self, id: &T::Id) {
        let entry = EntryKey::of::<T>(id_key(id));
        self.pending.retain(|p| p.entry.as_ref() != Some(&entry));
        self.forget(&entry);
    }

    /// Drop every pending change, tracked entry and cached instance.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.tracked.clear();
        self.identity_map.clear();
        self.inserted.clear();
    }

    pub(crate) async fn fetch_rows(
        &self,
        request: &FetchRequest,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<Vec<JsonValue>> {
        cancel.run(self.backend.fetch(request)).await
    }

    pub(crate) async fn count_rows(
        &self,
        request: &CountRequest,
        cancel: &CancellationSignal,
    ) -> RepositoryResult<u64> {
        cancel.run(self.backend.count(request)).await
    }

    /// Turn a fetched row into an instance according to `tracking`.
    pub(crate) fn resolve<T: Record>(
        &mut self,
        row: JsonValue,
        tracking: TrackingMode,
    ) -> RepositoryResult<Arc<T>> {
        let key_value = match row.get(T::ID_COLUMN) {
            Some(value) if tracking.resolves_identity() => value.clone(),
            _ => return Ok(Arc::new(from_row::<T>(row)?)),
        };
        let Some(key) = json_key(&key_value) else {
            return Ok(Arc::new(from_row::<T>(row)?));
        };
        let entry = EntryKey::of::<T>(key);

        let cached = self
            .identity_map
            .get(&entry)
            .and_then(|instance| instance.clone().downcast::<T>().ok());
        let instance = match cached {
            Some(instance) => instance,
            None => {
                let instance = Arc::new(from_row::<T>(row)?);
                self.identity_map.insert(entry.clone(), instance.clone());
                instance
            }
        };

        if tracking == TrackingMode::TrackAll
            && !self.tracked.contains_key(&entry)
            && !self.pending.iter().any(|p| p.entry.as_ref() == Some(&entry))
        {
            let original = to_row(&*instance)?;
            self.tracked.insert(
                entry,
                TrackedEntry {
                    shape: RecordShape::of::<T>(),
                    key: key_value,
                    original,
                },
            );
        }
        Ok(instance)
    }
}

fn require_entry<T: Record>(item: &T, operation: &str) -> RepositoryResult<EntryKey> {
    if !item.has_id() {
        return Err(RepositoryError::invalid_argument(format!(
            "cannot {operation} {} without an id",
            T::entity_name()
        )));
    }
    Ok(EntryKey::of::<T>(id_key(item.id())))
}
