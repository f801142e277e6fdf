//! Diagnostic descriptions of entities.
//!
//! Each entity type binds its display templates at compile time through the
//! associated consts on [`Entity`]; there is no runtime attribute lookup or
//! per-type cache to maintain.

use std::panic::{self, AssertUnwindSafe};

use crate::entity::{Entity, IdentifiedEntity};
use crate::error::{ModelError, ModelResult};

/// Placeholder that expands to the short name of the entity type.
pub const TYPE_PLACEHOLDER: &str = "type";

/// Placeholder that expands to the entity id in [`describe_identified`].
pub const ID_PLACEHOLDER: &str = "id";

/// Label of an identified entity that declares no template of its own.
pub const IDENTIFIED_TEMPLATE: &str = "{type} #{id}";

/// Short name of a type (last path segment, generics stripped).
///
/// `my_app::model::Customer` becomes `Customer`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Interpolate a display template.
///
/// `{name}` placeholders are resolved through `lookup`, except `{type}` which
/// expands to `type_name`. `{{` and `}}` produce literal braces.
pub fn render_template<F>(template: &str, type_name: &str, lookup: F) -> ModelResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }

                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(ModelError::UnterminatedPlaceholder {
                        template: template.to_string(),
                        position: pos,
                    });
                }

                let name = name.trim();
                if name.is_empty() {
                    return Err(ModelError::EmptyPlaceholder {
                        template: template.to_string(),
                    });
                }

                if name == TYPE_PLACEHOLDER {
                    out.push_str(type_name);
                } else {
                    let value = lookup(name).ok_or_else(|| ModelError::unknown_field(name))?;
                    out.push_str(&value);
                }
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(ModelError::UnmatchedBrace {
                        template: template.to_string(),
                        position: pos,
                    });
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Human-readable label for an entity. Never fails.
///
/// Tries `E::DISPLAY_NAME`, then `E::DEBUG_TEMPLATE`. If neither is declared,
/// or rendering the chosen template fails in any way (including a panicking
/// `field_value`), the full type path of `E` is returned.
pub fn describe<E: Entity>(entity: &E) -> String {
    render_or_fallback::<E, _>(E::DISPLAY_NAME.or(E::DEBUG_TEMPLATE), |field| {
        entity.field_value(field)
    })
}

/// [`describe`] for entities with an identifier.
///
/// Entities without a template of their own get [`IDENTIFIED_TEMPLATE`], and
/// `{id}` resolves to the identifier unless `field_value` answers for it.
pub fn describe_identified<E: IdentifiedEntity>(entity: &E) -> String {
    let template = E::DISPLAY_NAME
        .or(E::DEBUG_TEMPLATE)
        .unwrap_or(IDENTIFIED_TEMPLATE);
    render_or_fallback::<E, _>(Some(template), |field| {
        entity
            .field_value(field)
            .or_else(|| (field == ID_PLACEHOLDER).then(|| entity.id().to_string()))
    })
}

fn render_or_fallback<E, F>(template: Option<&str>, lookup: F) -> String
where
    E: Entity,
    F: Fn(&str) -> Option<String>,
{
    let fallback = || std::any::type_name::<E>().to_string();

    let Some(template) = template else {
        return fallback();
    };

    let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
        render_template(template, short_type_name::<E>(), &lookup)
    }));

    match rendered {
        Ok(Ok(label)) => label,
        Ok(Err(err)) => {
            tracing::trace!(entity = short_type_name::<E>(), error = %err, "display template failed");
            fallback()
        }
        Err(_) => fallback(),
    }
}
