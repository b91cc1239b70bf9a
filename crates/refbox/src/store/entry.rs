use crate::host::{EditorHost, EntityId, EntityIntrospection};
use crate::identity::{
    compute_display_name, decode, extract_local_name, fallback_display_name, identify,
    EntityIdentity, ResolveHints,
};

use super::persist::PersistedEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Resolved,
    Unresolved,
}

/// One slot in the reference box.
///
/// `display_name` is recomputed whenever the entry is attached to a live
/// entity and frozen while it is not.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    identity: EntityIdentity,
    live_handle: Option<EntityId>,
    display_name: String,
    local_name: String,
    type_tag: String,
}

impl ReferenceEntry {
    pub(crate) fn from_live(host: &dyn EditorHost, entity: EntityId) -> Self {
        let mut entry = Self {
            identity: identify(host, entity),
            live_handle: None,
            display_name: String::new(),
            local_name: String::new(),
            type_tag: String::new(),
        };
        entry.attach(host, entity);
        entry
    }

    pub(crate) fn from_persisted(record: &PersistedEntry) -> Self {
        let type_tag = record.type_tag.trim().to_string();
        let display_name = if record.display_name.trim().is_empty() {
            fallback_display_name(Some(&type_tag))
        } else {
            record.display_name.clone()
        };
        let local_name = if !record.local_name.trim().is_empty() {
            record.local_name.clone()
        } else if !record.display_name.trim().is_empty() {
            extract_local_name(&record.display_name)
        } else {
            String::new()
        };
        Self {
            identity: decode(&record.identity),
            live_handle: None,
            display_name,
            local_name,
            type_tag,
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            identity: self.identity.to_string(),
            type_tag: self.type_tag.clone(),
            local_name: self.local_name.clone(),
            display_name: self.display_name.clone(),
            is_asset_backed: self.identity.is_content_addressed(),
        }
    }

    pub fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    pub fn live_handle(&self) -> Option<EntityId> {
        self.live_handle
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn is_asset_backed(&self) -> bool {
        self.identity.is_content_addressed()
    }

    pub fn state(&self) -> EntryState {
        if self.live_handle.is_some() {
            EntryState::Resolved
        } else {
            EntryState::Unresolved
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.live_handle.is_some()
    }

    pub(crate) fn resolve_hints(&self) -> ResolveHints<'_> {
        ResolveHints {
            type_tag: Some(self.type_tag.as_str()).filter(|tag| !tag.is_empty()),
            local_name: Some(self.local_name.as_str()).filter(|name| !name.is_empty()),
            display_name: Some(self.display_name.as_str()),
        }
    }

    /// Binds a live entity and refreshes everything derived from it.
    pub(crate) fn attach(&mut self, host: &dyn EditorHost, entity: EntityId) {
        self.live_handle = Some(entity);
        self.display_name = compute_display_name(host, entity);
        if let Some(name) = host.local_name(entity).filter(|name| !name.is_empty()) {
            self.local_name = name;
        }
        if let Some(tag) = host.type_tag(entity).filter(|tag| !tag.is_empty()) {
            self.type_tag = tag;
        }
    }

    /// Drops the handle; the last display name stays frozen.
    pub(crate) fn detach(&mut self) {
        self.live_handle = None;
    }

    /// Forgets the instance id recorded by another session.
    pub(crate) fn without_session_hint(mut self) -> Self {
        self.identity = self.identity.without_session_hint();
        self
    }

    /// Replaces the identity, returning whether it changed.
    pub(crate) fn rewrite_identity(&mut self, identity: EntityIdentity) -> bool {
        if self.identity == identity {
            return false;
        }
        self.identity = identity;
        true
    }
}
