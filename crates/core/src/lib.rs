//! `idrepo-core`: identity model for persisted entities.
//!
//! This crate contains **pure model** primitives (no storage concerns):
//! entity traits, identifier types, identity equality/hashing, and
//! diagnostic descriptions.

extern crate self as idrepo_core;

pub mod display;
pub mod entity;
pub mod error;
pub mod id;

pub use display::{describe, describe_identified, render_template, short_type_name};
pub use entity::{
    identity_eq, identity_hash, identity_hash_code, Entity, IdentifiedEntity, UNSET_ID_HASH,
};
pub use error::{ModelError, ModelResult};
pub use id::{EntityId, IdGeneration, IntegerId};

#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use serde_json;
    pub use uuid;
}
