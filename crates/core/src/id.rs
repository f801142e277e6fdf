//! Identifier types for persisted entities.
//!
//! An [`EntityId`] is any comparable value that can distinguish persisted
//! instances of one entity type. Each identifier type defines its own
//! "unset" sentinel (zero, empty string, nil UUID) instead of relying on a
//! shared notion of default.

use core::fmt;
use core::hash::Hash;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ModelError;

/// How a store produces a key for a record inserted with an unset id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdGeneration {
    /// Next value of a per-table sequence (identity / auto-increment column).
    Sequence,
    /// A fresh random (time-ordered) UUID.
    Random,
    /// The caller must supply the key; inserting an unset id is rejected.
    Manual,
}

/// Identifier of a persisted entity.
///
/// Identifiers must support equality and ordering and must define an unset
/// sentinel. `to_json` is the value stored in the id column and compared by
/// predicates; it must agree with the type's `serde` representation.
pub trait EntityId:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Key generation strategy used when a record is inserted with an unset id.
    const GENERATION: IdGeneration;

    /// Largest sequence value the identifier can hold.
    const SEQUENCE_MAX: i64 = i64::MAX;

    /// The "not yet assigned" value for this identifier type.
    fn unset() -> Self;

    /// Returns true if this is the unset sentinel.
    fn is_unset(&self) -> bool {
        *self == Self::unset()
    }

    /// JSON projection of the identifier (column value).
    fn to_json(&self) -> JsonValue;
}

/// Marker for integer identifiers (set-based delete by id is restricted to these).
pub trait IntegerId: EntityId + Copy {}

macro_rules! impl_integer_id {
    ($($t:ty),* $(,)?) => {
        $(
            impl EntityId for $t {
                const GENERATION: IdGeneration = IdGeneration::Sequence;

                const SEQUENCE_MAX: i64 = if (<$t>::MAX as u64) < i64::MAX as u64 {
                    <$t>::MAX as i64
                } else {
                    i64::MAX
                };

                fn unset() -> Self {
                    0
                }

                fn to_json(&self) -> JsonValue {
                    JsonValue::from(*self)
                }
            }

            impl IntegerId for $t {}
        )*
    };
}

impl_integer_id!(i16, i32, i64, u32, u64);

impl EntityId for String {
    const GENERATION: IdGeneration = IdGeneration::Manual;

    fn unset() -> Self {
        String::new()
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::String(self.clone())
    }
}

impl EntityId for Uuid {
    const GENERATION: IdGeneration = IdGeneration::Random;

    fn unset() -> Self {
        Uuid::nil()
    }

    fn is_unset(&self) -> bool {
        self.is_nil()
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::String(self.to_string())
    }
}

/// Declare a UUID-backed identifier newtype.
///
/// ```ignore
/// idrepo_core::define_id!(CustomerId, "CustomerId");
/// let id = CustomerId::new();
/// ```
#[macro_export]
macro_rules! define_id {
    ($t:ident, $name:literal) => {
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            $crate::__private::serde::Serialize,
            $crate::__private::serde::Deserialize,
        )]
        #[serde(transparent, crate = "idrepo_core::__private::serde")]
        pub struct $t($crate::__private::uuid::Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self($crate::__private::uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: $crate::__private::uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &$crate::__private::uuid::Uuid {
                &self.0
            }
        }

        impl core::default::Default for $t {
            fn default() -> Self {
                Self($crate::__private::uuid::Uuid::nil())
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$crate::__private::uuid::Uuid> for $t {
            fn from(value: $crate::__private::uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $crate::__private::uuid::Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::str::FromStr for $t {
            type Err = $crate::ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $crate::id::parse_uuid(s, $name).map(Self)
            }
        }

        impl $crate::EntityId for $t {
            const GENERATION: $crate::IdGeneration = $crate::IdGeneration::Random;

            fn unset() -> Self {
                <Self as core::default::Default>::default()
            }

            fn is_unset(&self) -> bool {
                self.0.is_nil()
            }

            fn to_json(&self) -> $crate::__private::serde_json::Value {
                $crate::__private::serde_json::Value::String(self.0.to_string())
            }
        }
    };
}

#[doc(hidden)]
pub fn parse_uuid(s: &str, name: &str) -> Result<Uuid, ModelError> {
    Uuid::from_str(s).map_err(|e| ModelError::invalid_id(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::define_id!(WidgetId, "WidgetId");

    #[test]
    fn integer_ids_are_unset_at_zero() {
        assert!(0i64.is_unset());
        assert!(!7i64.is_unset());
        assert!(0u32.is_unset());
        assert_eq!(i32::GENERATION, IdGeneration::Sequence);
        assert_eq!(42i64.to_json(), serde_json::json!(42));
    }

    #[test]
    fn sequence_max_fits_the_integer_type() {
        assert_eq!(<i16 as EntityId>::SEQUENCE_MAX, i16::MAX as i64);
        assert_eq!(<u32 as EntityId>::SEQUENCE_MAX, u32::MAX as i64);
        assert_eq!(<i64 as EntityId>::SEQUENCE_MAX, i64::MAX);
        assert_eq!(<u64 as EntityId>::SEQUENCE_MAX, i64::MAX);
    }

    #[test]
    fn string_ids_are_unset_when_empty() {
        assert!(String::new().is_unset());
        assert!(!"sku-1".to_string().is_unset());
        assert_eq!(String::GENERATION, IdGeneration::Manual);
    }

    #[test]
    fn uuid_ids_are_unset_when_nil() {
        assert!(Uuid::nil().is_unset());
        assert!(!Uuid::now_v7().is_unset());
    }

    #[test]
    fn defined_id_round_trips_through_str() {
        let id = WidgetId::new();
        let parsed: WidgetId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(!id.is_unset());
        assert!(WidgetId::default().is_unset());
        assert_eq!(id.to_json(), serde_json::to_value(id).unwrap());
    }

    #[test]
    fn defined_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<WidgetId>().unwrap_err();
        assert!(matches!(err, ModelError::InvalidId(ref msg) if msg.starts_with("WidgetId")));
    }
}
