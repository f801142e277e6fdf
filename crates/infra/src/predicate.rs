//! Typed predicates over record rows.
//!
//! A [`Predicate<T>`] is a typed handle on an untyped [`Filter`] tree. Backends
//! either evaluate the tree against JSON rows ([`Filter::matches`]) or render it
//! to SQL. Field names are the serialized column names of `T`.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Not;
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use idrepo_core::EntityId;

use crate::record::Record;

/// Comparison operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// Untyped filter expression over row columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every row.
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: JsonValue,
    },
    In {
        field: String,
        values: Vec<JsonValue>,
    },
    IsNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Conjunction; `All` is the identity and nested conjunctions are flattened.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Disjunction; nested disjunctions are flattened.
    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, _) | (_, Filter::All) => Filter::All,
            (Filter::Or(mut a), Filter::Or(b)) => {
                a.extend(b);
                Filter::Or(a)
            }
            (Filter::Or(mut a), f) => {
                a.push(f);
                Filter::Or(a)
            }
            (f, Filter::Or(mut b)) => {
                b.insert(0, f);
                Filter::Or(b)
            }
            (a, b) => Filter::Or(vec![a, b]),
        }
    }

    /// Whether `row` satisfies the filter.
    ///
    /// Uses SQL three-valued logic: a comparison involving null (or a missing
    /// column) is unknown, and unknown rows do not match.
    pub fn matches(&self, row: &JsonValue) -> bool {
        self.eval(row) == Some(true)
    }

    fn eval(&self, row: &JsonValue) -> Option<bool> {
        match self {
            Filter::All => Some(true),
            Filter::Compare { field, op, value } => {
                let left = column(row, field)?;
                if value.is_null() {
                    return None;
                }
                compare(left, *op, value)
            }
            Filter::In { field, values } => {
                let left = column(row, field)?;
                let mut unknown = false;
                for value in values {
                    match compare(left, CompareOp::Eq, value) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Filter::IsNull(field) => Some(column(row, field).is_none()),
            Filter::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(row) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown { None } else { Some(true) }
            }
            Filter::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(row) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Filter::Not(inner) => inner.eval(row).map(|b| !b),
        }
    }
}

fn column<'a>(row: &'a JsonValue, field: &str) -> Option<&'a JsonValue> {
    row.get(field).filter(|v| !v.is_null())
}

fn compare(left: &JsonValue, op: CompareOp, right: &JsonValue) -> Option<bool> {
    let ordering = match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?)?,
        },
        (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => a.cmp(b),
        (JsonValue::Null, _) | (_, JsonValue::Null) => return None,
        // Values of different kinds are never equal and have no order.
        _ => {
            return match op {
                CompareOp::Eq => Some(false),
                CompareOp::Ne => Some(true),
                _ => None,
            };
        }
    };
    Some(op.accepts(ordering))
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("TRUE"),
            Filter::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.as_sql())
            }
            Filter::In { field, values } => {
                write!(f, "{field} IN (")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Filter::IsNull(field) => write!(f, "{field} IS NULL"),
            Filter::And(parts) => join(f, parts, " AND ", "TRUE"),
            Filter::Or(parts) => join(f, parts, " OR ", "FALSE"),
            Filter::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Filter], sep: &str, empty: &str) -> fmt::Result {
    if parts.is_empty() {
        return f.write_str(empty);
    }
    f.write_str("(")?;
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

/// Filter over rows of `T`.
pub struct Predicate<T> {
    filter: Filter,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self::from_filter(self.filter.clone())
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.filter).finish()
    }
}

impl<T> Predicate<T> {
    /// Wrap an untyped filter. Field names are not checked against `T`.
    pub fn from_filter(filter: Filter) -> Self {
        Self {
            filter,
            _marker: PhantomData,
        }
    }

    pub fn all() -> Self {
        Self::from_filter(Filter::All)
    }

    fn compare(field: &str, op: CompareOp, value: impl Into<JsonValue>) -> Self {
        Self::from_filter(Filter::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(field: &str, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: &str, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: &str, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn lt(field: &str, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: &str, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn is_in<V, I>(field: &str, values: I) -> Self
    where
        V: Into<JsonValue>,
        I: IntoIterator<Item = V>,
    {
        Self::from_filter(Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn is_null(field: &str) -> Self {
        Self::from_filter(Filter::IsNull(field.to_string()))
    }

    pub fn and(self, other: Predicate<T>) -> Self {
        Self::from_filter(self.filter.and(other.filter))
    }

    pub fn or(self, other: Predicate<T>) -> Self {
        Self::from_filter(self.filter.or(other.filter))
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn into_filter(self) -> Filter {
        self.filter
    }
}

impl<T: Record> Predicate<T> {
    /// `T::ID_COLUMN = id`.
    pub fn id_eq(id: &T::Id) -> Self {
        Self::eq(T::ID_COLUMN, id.to_json())
    }
}

impl<T> Not for Predicate<T> {
    type Output = Predicate<T>;

    fn not(self) -> Self::Output {
        let filter = match self.filter {
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        };
        Self::from_filter(filter)
    }
}

impl<T> fmt::Display for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.filter.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Customer;
    use proptest::prelude::*;
    use serde_json::json;

    fn row() -> JsonValue {
        json!({"id": 7, "name": "Ada", "credit": 120, "email": null})
    }

    #[test]
    fn comparisons_follow_operator() {
        let row = row();
        assert!(Predicate::<Customer>::eq("name", "Ada").filter().matches(&row));
        assert!(Predicate::<Customer>::ne("name", "Bob").filter().matches(&row));
        assert!(Predicate::<Customer>::gt("credit", 100).filter().matches(&row));
        assert!(Predicate::<Customer>::le("credit", 120).filter().matches(&row));
        assert!(!Predicate::<Customer>::lt("credit", 120).filter().matches(&row));
        assert!(Predicate::<Customer>::ge("credit", 119.5).filter().matches(&row));
    }

    #[test]
    fn null_comparisons_are_unknown() {
        let row = row();
        let eq_null = Predicate::<Customer>::eq("email", "x");
        assert!(!eq_null.filter().matches(&row));
        // NOT(unknown) stays unknown.
        assert!(!(!eq_null).filter().matches(&row));
        assert!(Predicate::<Customer>::is_null("email").filter().matches(&row));
        assert!(Predicate::<Customer>::is_null("missing").filter().matches(&row));
        assert!(!Predicate::<Customer>::ne("missing", 1).filter().matches(&row));
    }

    #[test]
    fn in_list_and_combinators() {
        let row = row();
        let p = Predicate::<Customer>::is_in("id", [1, 7, 9])
            .and(Predicate::eq("name", "Ada"))
            .or(Predicate::eq("name", "Zed"));
        assert!(p.filter().matches(&row));
        assert!(!Predicate::<Customer>::is_in("id", Vec::<i64>::new()).filter().matches(&row));
    }

    #[test]
    fn id_eq_uses_id_column() {
        let p = Predicate::<Customer>::id_eq(&7);
        assert_eq!(p.to_string(), "id = 7");
        assert!(p.filter().matches(&row()));
    }

    #[test]
    fn conjunctions_flatten_and_render() {
        let p = Predicate::<Customer>::all()
            .and(Predicate::gt("credit", 10))
            .and(Predicate::eq("name", "Ada"))
            .and(Predicate::is_null("email"));
        assert_eq!(
            p.to_string(),
            r#"(credit > 10 AND name = "Ada" AND email IS NULL)"#
        );
        assert_eq!(Predicate::<Customer>::all().to_string(), "TRUE");
        assert_eq!(
            (!Predicate::<Customer>::is_in("id", [1, 2])).to_string(),
            "NOT (id IN (1, 2))"
        );
    }

    #[test]
    fn mixed_kinds_never_equal() {
        let row = json!({"id": "7"});
        assert!(!Predicate::<Customer>::eq("id", 7).filter().matches(&row));
        assert!(Predicate::<Customer>::ne("id", 7).filter().matches(&row));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn gt_and_le_partition_non_null_rows(value in any::<i64>(), threshold in any::<i64>()) {
            let row = json!({"credit": value});
            let gt = Predicate::<Customer>::gt("credit", threshold).filter().matches(&row);
            let le = Predicate::<Customer>::le("credit", threshold).filter().matches(&row);
            prop_assert!(gt != le);
        }

        #[test]
        fn double_negation_is_identity(value in any::<i64>(), threshold in any::<i64>()) {
            let row = json!({"credit": value});
            let p = Predicate::<Customer>::eq("credit", threshold);
            prop_assert_eq!(
                (!!p.clone()).filter().matches(&row),
                p.filter().matches(&row)
            );
        }
    }
}
