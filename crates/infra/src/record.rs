//! Table mapping for identified entities.
//!
//! Records travel between the session and its backend as JSON objects, one
//! property per column. The id column value is the identifier's
//! [`EntityId::to_json`] projection.

use idrepo_core::{EntityId, IdentifiedEntity};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{RepositoryError, RepositoryResult};

/// An identified entity stored in a table.
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Customer { id: i64, name: String }
///
/// impl Entity for Customer {}
/// impl IdentifiedEntity for Customer { /* id / set_id */ }
/// impl Record for Customer { const TABLE: &'static str = "customers"; }
/// ```
pub trait Record: IdentifiedEntity + Clone + Serialize + DeserializeOwned {
    /// Table holding rows of this type.
    const TABLE: &'static str;

    /// Primary key column; must match the serialized name of the id field.
    const ID_COLUMN: &'static str = "id";
}

/// Canonical string key of an id column value.
///
/// Strings map to themselves, numbers to their decimal form; anything else
/// cannot be a key.
pub fn json_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Canonical string key of an identifier.
pub fn id_key<I: EntityId>(id: &I) -> String {
    json_key(&id.to_json()).unwrap_or_else(|| id.to_string())
}

/// Serialize a record into its row object.
pub fn to_row<T: Record>(record: &T) -> RepositoryResult<JsonValue> {
    let row = serde_json::to_value(record)?;
    if !row.is_object() {
        return Err(RepositoryError::serialization(format!(
            "{} must serialize to an object, got {row}",
            T::entity_name()
        )));
    }
    Ok(row)
}

/// Deserialize a row object into a record.
pub fn from_row<T: Record>(row: JsonValue) -> RepositoryResult<T> {
    serde_json::from_value(row).map_err(|e| {
        RepositoryError::serialization(format!("{}: {e}", T::entity_name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Customer;
    use serde_json::json;

    #[test]
    fn keys_are_canonical() {
        assert_eq!(json_key(&json!(42)), Some("42".to_string()));
        assert_eq!(json_key(&json!("abc")), Some("abc".to_string()));
        assert_eq!(json_key(&json!(null)), None);
        assert_eq!(id_key(&42i64), "42");
    }

    #[test]
    fn records_round_trip_through_rows() {
        let customer = Customer::new(3, "Ada");
        let row = to_row(&customer).unwrap();
        assert_eq!(row["id"], json!(3));
        assert_eq!(row["name"], json!("Ada"));

        let back: Customer = from_row(row).unwrap();
        assert_eq!(back.name, "Ada");
    }

    #[test]
    fn malformed_rows_are_serialization_errors() {
        let err = from_row::<Customer>(json!({"id": "not a number"})).unwrap_err();
        assert!(matches!(err, RepositoryError::Serialization(ref msg) if msg.starts_with("Customer")));
    }
}
