//! Postgres-backed storage backend.
//!
//! Rows cross the boundary as JSON: reads select `row_to_json(t)`, writes feed
//! the row object through `jsonb_populate_record` so column types come from
//! the table definition. Filters and key matches compare each column with a
//! bound value cast to the column's own type, keeping indexes usable.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StorageError |
//! |------------|----------------------|--------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (other) | Any other | `Query` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Connection` |
//! | Other | N/A | `Query` |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use idrepo_core::IdGeneration;

use crate::error::{StorageError, StorageResult};
use crate::predicate::{CompareOp, Filter};

use super::{Change, ChangeKind, ChangeResult, CountRequest, FetchRequest, StorageBackend};

const BACKEND: &str = "postgres";

/// Postgres [`StorageBackend`].
///
/// Uses the SQLx connection pool, which is thread-safe. Every unit of work runs
/// in one transaction.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: Arc<PgPool>,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, request), fields(table = request.table, row_count = tracing::field::Empty), err)]
    async fn fetch(&self, request: &FetchRequest) -> StorageResult<Vec<JsonValue>> {
        let mut qb = fetch_query(request);
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;

        let rows = rows
            .iter()
            .map(|row| {
                row.try_get::<JsonValue, _>("data")
                    .map_err(|e| StorageError::query(format!("failed to decode row: {e}")))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Span::current().record("row_count", rows.len());
        Ok(rows)
    }

    #[instrument(skip(self, request), fields(table = request.table), err)]
    async fn count(&self, request: &CountRequest) -> StorageResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
        qb.push(quote_ident(request.table));
        qb.push(" AS t WHERE ");
        push_filter(&mut qb, request.table, &request.filter);

        let row = qb
            .build()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| StorageError::query(format!("failed to read count: {e}")))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, changes), fields(change_count = changes.len()), err)]
    async fn apply(&self, changes: &[Change]) -> StorageResult<Vec<ChangeResult>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let mut results = Vec::with_capacity(changes.len());
        for change in changes {
            // Dropping `tx` on error rolls the unit of work back.
            results.push(apply_change(&mut tx, change).await?);
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(results)
    }

    #[instrument(skip(self, filter), fields(filter = %filter), err)]
    async fn execute_delete(&self, table: &'static str, filter: &Filter) -> StorageResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
        qb.push(quote_ident(table));
        qb.push(" AS t WHERE ");
        push_filter(&mut qb, table, filter);

        let done = qb
            .build()
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("execute_delete", e))?;
        Ok(done.rows_affected())
    }
}

fn fetch_query(request: &FetchRequest) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS data FROM ");
    qb.push(quote_ident(request.table));
    qb.push(" AS t WHERE ");
    push_filter(&mut qb, request.table, &request.filter);

    for (idx, (field, direction)) in request.order_by.iter().enumerate() {
        qb.push(if idx == 0 { " ORDER BY " } else { ", " });
        qb.push(format!("t.{} {}", quote_ident(field), direction.as_sql()));
    }
    if let Some(limit) = request.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
    }
    if let Some(offset) = request.offset {
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);
    }
    qb
}

async fn apply_change(
    tx: &mut Transaction<'static, Postgres>,
    change: &Change,
) -> StorageResult<ChangeResult> {
    match change.kind {
        ChangeKind::Insert => {
            let mut qb = insert_query(change)?;
            let row = qb
                .build()
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert", e))?;
            let stored = row
                .try_get::<JsonValue, _>("data")
                .map_err(|e| StorageError::query(format!("failed to decode row: {e}")))?;
            Ok(ChangeResult {
                affected: 1,
                row: Some(stored),
            })
        }
        ChangeKind::Update => {
            let mut qb = update_query(change)?;
            let row = qb
                .build()
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("update", e))?;
            match row {
                Some(row) => {
                    let stored = row
                        .try_get::<JsonValue, _>("data")
                        .map_err(|e| StorageError::query(format!("failed to decode row: {e}")))?;
                    Ok(ChangeResult {
                        affected: 1,
                        row: Some(stored),
                    })
                }
                None => Ok(ChangeResult::default()),
            }
        }
        ChangeKind::Delete => {
            let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
            qb.push(quote_ident(change.table));
            qb.push(" AS t WHERE ");
            push_key_match(&mut qb, change)?;
            let done = qb
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("delete", e))?;
            Ok(ChangeResult {
                affected: done.rows_affected(),
                row: None,
            })
        }
    }
}

/// Row to insert and whether it carries the id column.
///
/// Unset keys are left to the column default for sequences and generated here
/// for random ids; manual ids must be supplied.
fn insert_row(change: &Change) -> StorageResult<(JsonValue, bool)> {
    match (&change.key, change.generation) {
        (Some(_), _) => Ok((change.row.clone(), true)),
        (None, IdGeneration::Sequence) => Ok((change.row.clone(), false)),
        (None, IdGeneration::Random) => {
            let mut row = change.row.clone();
            if let Some(object) = row.as_object_mut() {
                object.insert(
                    change.id_column.to_string(),
                    JsonValue::from(Uuid::now_v7().to_string()),
                );
            }
            Ok((row, true))
        }
        (None, IdGeneration::Manual) => Err(StorageError::constraint(format!(
            "{}.{} requires an explicit value",
            change.table, change.id_column
        ))),
    }
}

/// Quoted columns of `row`, skipping the id column unless `with_id`.
fn write_columns(row: &JsonValue, id_column: &str, with_id: bool) -> Vec<String> {
    row.as_object()
        .map(|object| {
            object
                .keys()
                .filter(|k| with_id || k.as_str() != id_column)
                .map(|k| quote_ident(k))
                .collect()
        })
        .unwrap_or_default()
}

fn insert_query(change: &Change) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let table = quote_ident(change.table);
    let (row, with_id) = insert_row(change)?;
    let columns = write_columns(&row, change.id_column, with_id);

    let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} AS t "));
    if columns.is_empty() {
        qb.push("DEFAULT VALUES");
    } else {
        let list = columns.join(", ");
        qb.push(format!("({list}) SELECT {list} FROM jsonb_populate_record(NULL::{table}, "));
        qb.push_bind(row);
        qb.push(")");
    }
    qb.push(" RETURNING row_to_json(t) AS data");
    Ok(qb)
}

fn update_query(change: &Change) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let table = quote_ident(change.table);
    let columns = write_columns(&change.row, change.id_column, false);

    let mut qb = if columns.is_empty() {
        QueryBuilder::<Postgres>::new(format!("SELECT row_to_json(t) AS data FROM {table} AS t WHERE "))
    } else {
        let list = columns.join(", ");
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {table} AS t SET ({list}) = (SELECT {list} FROM jsonb_populate_record(NULL::{table}, "
        ));
        qb.push_bind(change.row.clone());
        qb.push(")) WHERE ");
        qb
    };
    push_key_match(&mut qb, change)?;
    if !columns.is_empty() {
        qb.push(" RETURNING row_to_json(t) AS data");
    }
    Ok(qb)
}

fn push_key_match(qb: &mut QueryBuilder<'static, Postgres>, change: &Change) -> StorageResult<()> {
    let key = change
        .key
        .as_ref()
        .ok_or_else(|| StorageError::query(format!("{:?} without a key in {}", change.kind, change.table)))?;
    qb.push(format!("t.{} = ", quote_ident(change.id_column)));
    push_column_value(qb, change.table, change.id_column, key);
    Ok(())
}

/// Push `value` typed as `table.column`, via `jsonb_populate_record`.
fn push_column_value(
    qb: &mut QueryBuilder<'static, Postgres>,
    table: &str,
    column: &str,
    value: &JsonValue,
) {
    let mut object = Map::new();
    object.insert(column.to_string(), value.clone());
    qb.push(format!("(jsonb_populate_record(NULL::{}, ", quote_ident(table)));
    qb.push_bind(JsonValue::Object(object));
    qb.push(format!(")).{}", quote_ident(column)));
}

/// Render `filter` as a boolean SQL expression over alias `t`.
fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, table: &str, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Compare { field, op, value } => push_compare(qb, table, field, *op, value),
        Filter::In { field, values } => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("(");
            for (idx, value) in values.iter().enumerate() {
                if idx > 0 {
                    qb.push(" OR ");
                }
                push_compare(qb, table, field, CompareOp::Eq, value);
            }
            qb.push(")");
        }
        Filter::IsNull(field) => {
            qb.push(format!("t.{} IS NULL", quote_ident(field)));
        }
        Filter::And(parts) => push_joined(qb, table, parts, " AND ", "TRUE"),
        Filter::Or(parts) => push_joined(qb, table, parts, " OR ", "FALSE"),
        Filter::Not(inner) => {
            qb.push("NOT (");
            push_filter(qb, table, inner);
            qb.push(")");
        }
    }
}

fn push_joined(
    qb: &mut QueryBuilder<'static, Postgres>,
    table: &str,
    parts: &[Filter],
    sep: &str,
    empty: &str,
) {
    if parts.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            qb.push(sep);
        }
        push_filter(qb, table, part);
    }
    qb.push(")");
}

fn push_compare(
    qb: &mut QueryBuilder<'static, Postgres>,
    table: &str,
    field: &str,
    op: CompareOp,
    value: &JsonValue,
) {
    let column = format!("t.{}", quote_ident(field));
    let op = op.as_sql();
    match value {
        JsonValue::Null => {
            qb.push(format!("({column} {op} NULL)"));
        }
        JsonValue::Bool(b) => {
            qb.push(format!("{column} {op} "));
            qb.push_bind(*b);
        }
        JsonValue::Number(n) => {
            qb.push(format!("{column} {op} "));
            if let Some(i) = n.as_i64() {
                qb.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                qb.push_bind(f);
            } else {
                qb.push(format!("CAST({n} AS NUMERIC)"));
            }
        }
        // Strings may hold text, uuid or enum columns; let the column decide.
        other => {
            qb.push(format!("{column} {op} "));
            push_column_value(qb, table, field, other);
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map SQLx errors to StorageError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // unique, foreign key, check
                Some("23505") | Some("23503") | Some("23514") => StorageError::constraint(msg),
                _ => StorageError::query(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StorageError::connection(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StorageError::connection(format!("i/o error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StorageError::connection(format!("tls error in {operation}: {e}")),
        other => StorageError::query(format!("sqlx error in {operation}: {other}")),
    }
}
