//! Entity traits: identity + continuity across state changes.
//!
//! Equality of identified entities is derived from the concrete type and the
//! identifier, never from field values:
//!
//! - entities of different concrete types are never equal, even with equal ids
//! - two entities with an unset id are never equal, not even to themselves
//!
//! The second rule keeps unsaved entities from collapsing into one another
//! inside collections. It also means identity equality is not reflexive, so
//! types using [`impl_identity!`](crate::impl_identity) get `PartialEq` and
//! `Hash` but not `Eq`.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::id::EntityId;

/// Hash fed to the hasher for entities whose id is unset.
pub const UNSET_ID_HASH: u64 = 0;

/// Entity marker + diagnostic display binding.
pub trait Entity: Send + Sync + 'static {
    /// Display template used first by [`describe`](crate::describe).
    const DISPLAY_NAME: Option<&'static str> = None;

    /// Debug-format template used when no display name is declared.
    ///
    /// May reference the entity's fields as `{field}` (resolved through
    /// [`Entity::field_value`]) and the type name as `{type}`.
    const DEBUG_TEMPLATE: Option<&'static str> = None;

    /// Value of a named field for template interpolation.
    fn field_value(&self, name: &str) -> Option<String> {
        let _ = name;
        None
    }

    /// Short name of the concrete entity type.
    fn entity_name() -> &'static str
    where
        Self: Sized,
    {
        crate::display::short_type_name::<Self>()
    }
}

/// An entity carrying a strongly-typed identifier.
pub trait IdentifiedEntity: Entity {
    type Id: EntityId;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Replaces the entity identifier (used when the store assigns keys).
    fn set_id(&mut self, id: Self::Id);

    /// Returns true if the identifier has been assigned.
    fn has_id(&self) -> bool {
        !self.id().is_unset()
    }
}

/// Identity equality between two entities, possibly of different types.
///
/// True iff both have the same concrete type, `a`'s id is set, and the ids
/// are equal.
pub fn identity_eq<A, B>(a: &A, b: &B) -> bool
where
    A: IdentifiedEntity,
    B: IdentifiedEntity,
{
    if TypeId::of::<A>() != TypeId::of::<B>() {
        return false;
    }
    if a.id().is_unset() {
        return false;
    }
    match (b.id() as &dyn Any).downcast_ref::<A::Id>() {
        Some(other) => a.id() == other,
        None => false,
    }
}

/// Feed an entity's identity hash into `state`.
///
/// Only the id participates; unset ids all hash to [`UNSET_ID_HASH`].
pub fn identity_hash<E, H>(entity: &E, state: &mut H)
where
    E: IdentifiedEntity,
    H: Hasher,
{
    if entity.id().is_unset() {
        UNSET_ID_HASH.hash(state);
    } else {
        entity.id().hash(state);
    }
}

/// Identity hash code of an entity (std `DefaultHasher`).
pub fn identity_hash_code<E: IdentifiedEntity>(entity: &E) -> u64 {
    let mut hasher = DefaultHasher::new();
    identity_hash(entity, &mut hasher);
    hasher.finish()
}

/// Derive `PartialEq` and `Hash` for an entity type from its identity.
///
/// ```ignore
/// impl_identity!(Customer);
/// ```
#[macro_export]
macro_rules! impl_identity {
    ($($t:ty),+ $(,)?) => {
        $(
            impl core::cmp::PartialEq for $t {
                fn eq(&self, other: &Self) -> bool {
                    $crate::identity_eq(self, other)
                }
            }

            impl core::hash::Hash for $t {
                fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
                    $crate::identity_hash(self, state)
                }
            }
        )+
    };
}
