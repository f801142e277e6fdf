use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use idrepo_core::IdGeneration;

use crate::error::{StorageError, StorageResult};
use crate::predicate::Filter;
use crate::record::json_key;

use super::{
    Change, ChangeKind, ChangeResult, CountRequest, Direction, FetchRequest, StorageBackend,
};

const BACKEND: &str = "in-memory";

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<String, JsonValue>,
    last_sequence: i64,
}

impl Table {
    fn next_key(&mut self, change: &Change) -> StorageResult<JsonValue> {
        match change.generation {
            IdGeneration::Sequence => {
                let next = self
                    .last_sequence
                    .checked_add(1)
                    .filter(|next| *next <= change.sequence_max)
                    .ok_or_else(|| {
                        StorageError::constraint(format!(
                            "sequence exhausted for {}.{}",
                            change.table, change.id_column
                        ))
                    })?;
                self.last_sequence = next;
                Ok(JsonValue::from(next))
            }
            IdGeneration::Random => Ok(JsonValue::from(Uuid::now_v7().to_string())),
            IdGeneration::Manual => Err(StorageError::constraint(format!(
                "{}.{} requires an explicit value",
                change.table, change.id_column
            ))),
        }
    }

    fn apply(&mut self, change: &Change) -> StorageResult<ChangeResult> {
        match change.kind {
            ChangeKind::Insert => {
                let key_value = match &change.key {
                    Some(key) => key.clone(),
                    None => self.next_key(change)?,
                };
                let key = row_key(change, &key_value)?;
                if self.rows.contains_key(&key) {
                    return Err(StorageError::constraint(format!(
                        "duplicate key {key} in {}",
                        change.table
                    )));
                }
                if let Some(n) = key_value.as_i64() {
                    self.last_sequence = self.last_sequence.max(n);
                }
                let row = with_key(&change.row, change.id_column, key_value);
                self.rows.insert(key, row.clone());
                Ok(ChangeResult {
                    affected: 1,
                    row: Some(row),
                })
            }
            ChangeKind::Update => {
                let key_value = require_key(change)?;
                let key = row_key(change, key_value)?;
                match self.rows.get_mut(&key) {
                    Some(stored) => {
                        *stored = with_key(&change.row, change.id_column, key_value.clone());
                        Ok(ChangeResult {
                            affected: 1,
                            row: Some(stored.clone()),
                        })
                    }
                    None => Ok(ChangeResult::default()),
                }
            }
            ChangeKind::Delete => {
                let key = row_key(change, require_key(change)?)?;
                let affected = u64::from(self.rows.remove(&key).is_some());
                Ok(ChangeResult {
                    affected,
                    row: None,
                })
            }
        }
    }
}

fn require_key(change: &Change) -> StorageResult<&JsonValue> {
    change
        .key
        .as_ref()
        .ok_or_else(|| StorageError::query(format!("{:?} without a key in {}", change.kind, change.table)))
}

fn row_key(change: &Change, value: &JsonValue) -> StorageResult<String> {
    json_key(value).ok_or_else(|| {
        StorageError::query(format!(
            "{}.{} cannot be keyed by {value}",
            change.table, change.id_column
        ))
    })
}

fn with_key(row: &JsonValue, id_column: &str, key: JsonValue) -> JsonValue {
    let mut row = row.clone();
    if let Some(object) = row.as_object_mut() {
        object.insert(id_column.to_string(), key);
    }
    row
}

/// Shared in-memory tables of JSON rows.
///
/// Clones share the same tables, so several sessions (and the test asserting
/// on them) see one store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables
            .read()
            .map_err(|_| StorageError::state("lock poisoned"))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|_| StorageError::state("lock poisoned"))
    }

    /// Number of rows in `table` (0 for unknown tables or a poisoned lock).
    pub fn row_count(&self, table: &str) -> usize {
        self.read()
            .map(|tables| tables.get(table).map_or(0, |t| t.rows.len()))
            .unwrap_or(0)
    }

    /// Insert or replace a row keyed by its `id` property, bypassing any session.
    pub fn put(&self, table: &str, row: JsonValue) -> StorageResult<()> {
        let key_value = row.get("id").cloned().unwrap_or(JsonValue::Null);
        let key = json_key(&key_value)
            .ok_or_else(|| StorageError::query(format!("row in {table} has no usable id")))?;
        let mut tables = self.write()?;
        let entry = tables.entry(table.to_string()).or_default();
        if let Some(n) = key_value.as_i64() {
            entry.last_sequence = entry.last_sequence.max(n);
        }
        entry.rows.insert(key, row);
        Ok(())
    }
}

/// [`StorageBackend`] over an [`InMemoryDatabase`].
///
/// Intended for tests/dev. Units of work are staged on a copy of the tables
/// and swapped in only when every change succeeds.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    db: InMemoryDatabase,
    bulk_delete: bool,
}

impl InMemoryBackend {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self {
            db,
            bulk_delete: true,
        }
    }

    /// Reject set-based deletes, like providers that cannot run them.
    pub fn without_bulk_delete(mut self) -> Self {
        self.bulk_delete = false;
        self
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn fetch(&self, request: &FetchRequest) -> StorageResult<Vec<JsonValue>> {
        let tables = self.db.read()?;
        let Some(table) = tables.get(request.table) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<JsonValue> = table
            .rows
            .values()
            .filter(|row| request.filter.matches(row))
            .cloned()
            .collect();
        drop(tables);

        if !request.order_by.is_empty() {
            rows.sort_by(|a, b| {
                request
                    .order_by
                    .iter()
                    .map(|(field, direction)| {
                        let ordering = sort_cmp(a.get(field), b.get(field));
                        match direction {
                            Direction::Asc => ordering,
                            Direction::Desc => ordering.reverse(),
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let offset = request.offset.unwrap_or(0) as usize;
        let limit = request.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, request: &CountRequest) -> StorageResult<u64> {
        let tables = self.db.read()?;
        let count = tables.get(request.table).map_or(0, |table| {
            table
                .rows
                .values()
                .filter(|row| request.filter.matches(row))
                .count()
        });
        Ok(count as u64)
    }

    async fn apply(&self, changes: &[Change]) -> StorageResult<Vec<ChangeResult>> {
        let mut tables = self.db.write()?;
        let mut staged = tables.clone();

        let mut results = Vec::with_capacity(changes.len());
        for change in changes {
            let table = staged.entry(change.table.to_string()).or_default();
            results.push(table.apply(change)?);
        }

        *tables = staged;
        Ok(results)
    }

    async fn execute_delete(&self, table: &'static str, filter: &Filter) -> StorageResult<u64> {
        if !self.bulk_delete {
            return Err(StorageError::unsupported(BACKEND, "execute_delete"));
        }

        let mut tables = self.db.write()?;
        let Some(table) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|_, row| !filter.matches(row));
        Ok((before - table.rows.len()) as u64)
    }
}

/// Ordering for ORDER BY: nulls sort last ascending, mixed kinds compare equal.
fn sort_cmp(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y))
                .unwrap_or(Ordering::Equal),
        },
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
