//! Identity model error types.

use thiserror::Error;

/// Result type used across the identity model.
pub type ModelResult<T> = Result<T, ModelError>;

/// Identity-model error.
///
/// Template errors only ever surface from [`render_template`](crate::render_template);
/// [`describe`](crate::describe) swallows them and falls back to the type name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A `{` in a display template was never closed.
    #[error("unterminated placeholder at byte {position} in template {template:?}")]
    UnterminatedPlaceholder { template: String, position: usize },

    /// A lone `}` appeared outside a placeholder.
    #[error("unmatched '}}' at byte {position} in template {template:?}")]
    UnmatchedBrace { template: String, position: usize },

    /// A placeholder named nothing (`{}`).
    #[error("empty placeholder in template {template:?}")]
    EmptyPlaceholder { template: String },

    /// A placeholder referenced a field the entity does not expose.
    #[error("unknown field '{field}' referenced by display template")]
    UnknownField { field: String },
}

impl ModelError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }
}
