//! Interfaces the reference box consumes from the editor it runs inside.
//!
//! The box never owns scene nodes or assets. It talks to two object
//! universes (the asset repository and the scene graph) plus the active
//! document through these traits, and keeps nothing but opaque handles.

use std::fmt;

pub mod memory;

pub use memory::MemoryWorld;

/// Opaque live handle to an entity in the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// Runtime instance id. Only meaningful within the session that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub i64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Permanent repository-issued asset identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetGuid(String);

impl AssetGuid {
    /// Accepts ascii alphanumerics and `-`; anything else cannot round-trip
    /// through an identity string.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait AssetRepository {
    fn path_for_guid(&self, guid: &AssetGuid) -> Option<String>;

    fn guid_for_path(&self, path: &str) -> Option<AssetGuid>;

    fn load_at_path(&self, path: &str) -> Option<EntityId>;

    /// Repository path of a live entity, `None` when it is not an asset.
    fn asset_path_of(&self, entity: EntityId) -> Option<String>;
}

pub trait SceneGraph {
    /// Root-level nodes of a document. `None` selects the unsaved document.
    fn root_entities_of(&self, document: Option<&str>) -> Vec<EntityId>;

    fn children_of(&self, entity: EntityId) -> Vec<EntityId>;

    fn parent_of(&self, entity: EntityId) -> Option<EntityId>;

    fn instance_id(&self, entity: EntityId) -> Option<InstanceId>;

    /// Runtime registry lookup. Hosts without a registry keep the default and
    /// callers fall back to scanning.
    fn entity_for_instance_id(&self, _id: InstanceId) -> Option<EntityId> {
        None
    }

    /// Scene nodes in document-tree traversal order, optionally filtered by
    /// type tag. The order must be stable between calls.
    fn all_entities_of_type(&self, type_tag: Option<&str>) -> Vec<EntityId>;

    /// Document key of the node's owning document, `None` when that document
    /// has never been persisted (or the entity is not a scene node).
    fn document_of(&self, entity: EntityId) -> Option<String>;
}

pub trait DocumentContext {
    fn current_document_key(&self) -> Option<String>;
}

pub trait EntityIntrospection {
    fn is_alive(&self, entity: EntityId) -> bool;

    fn local_name(&self, entity: EntityId) -> Option<String>;

    fn type_tag(&self, entity: EntityId) -> Option<String>;
}

/// Everything the reference box needs from its host, in one object.
pub trait EditorHost: AssetRepository + SceneGraph + DocumentContext + EntityIntrospection {}

impl<T> EditorHost for T where
    T: AssetRepository + SceneGraph + DocumentContext + EntityIntrospection + ?Sized
{
}
