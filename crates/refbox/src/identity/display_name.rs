use crate::host::{EditorHost, EntityId, EntityIntrospection, SceneGraph};

pub const UNKNOWN_TYPE_TAG: &str = "UnknownType";
pub const ANCESTOR_MARKER: &str = "← ";

const TYPE_CLOSE_MARKER: &str = "> ";
const MAX_ANCESTOR_DEPTH: usize = 4096;

/// Human-readable label: `<Type> [Root]← name` for nested nodes,
/// `<Type> name` otherwise. Never empty.
pub fn compute_display_name(host: &dyn EditorHost, entity: EntityId) -> String {
    let type_tag = host.type_tag(entity).filter(|tag| !tag.is_empty());
    let Some(name) = host.local_name(entity).filter(|name| !name.is_empty()) else {
        return fallback_display_name(type_tag.as_deref());
    };
    let type_tag = type_tag.as_deref().unwrap_or(UNKNOWN_TYPE_TAG);
    match root_ancestor_name(host, entity) {
        Some(root) => format!("<{type_tag}> [{root}]{ANCESTOR_MARKER}{name}"),
        None => format!("<{type_tag}> {name}"),
    }
}

pub fn fallback_display_name(type_tag: Option<&str>) -> String {
    let type_tag = type_tag
        .filter(|tag| !tag.is_empty())
        .unwrap_or(UNKNOWN_TYPE_TAG);
    format!("<{type_tag}> object")
}

/// Best-effort inverse of [`compute_display_name`], used only for fuzzy
/// matching. Lossy when the local name itself contains `"← "`.
pub fn extract_local_name(display_name: &str) -> String {
    if let Some((_, after)) = display_name.rsplit_once(ANCESTOR_MARKER) {
        return after.trim().to_string();
    }
    let after_type = match display_name.split_once(TYPE_CLOSE_MARKER) {
        Some((_, after)) => after,
        None => display_name,
    };
    let trimmed = after_type.trim_start();
    let without_bracket = match trimmed.strip_prefix('[') {
        Some(rest) => match rest.split_once(']') {
            Some((_, after)) => after,
            None => trimmed,
        },
        None => trimmed,
    };
    without_bracket.trim().to_string()
}

fn root_ancestor_name(host: &dyn EditorHost, entity: EntityId) -> Option<String> {
    let mut top = entity;
    let mut depth = 0usize;
    while let Some(parent) = host.parent_of(top) {
        depth += 1;
        if depth > MAX_ANCESTOR_DEPTH {
            return None;
        }
        top = parent;
    }
    if top == entity {
        return None;
    }
    host.local_name(top).filter(|name| !name.is_empty())
}
