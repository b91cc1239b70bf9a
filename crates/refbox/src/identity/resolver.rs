use tracing::debug;

use crate::host::{
    AssetGuid, AssetRepository, DocumentContext, EditorHost, EntityId, EntityIntrospection,
    InstanceId, SceneGraph,
};

use super::codec::{structural_names, EntityIdentity, UNSAVED_DOCUMENT_KEY};
use super::display_name::extract_local_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    ExactPath,
    InstanceId,
    FuzzyName,
    ContentAddressed,
}

impl Strategy {
    pub fn confidence(self) -> Confidence {
        match self {
            Self::ExactPath | Self::ContentAddressed => Confidence::High,
            Self::InstanceId => Confidence::Medium,
            Self::FuzzyName => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub entity: EntityId,
    pub strategy: Strategy,
}

impl Resolution {
    pub fn confidence(&self) -> Confidence {
        self.strategy.confidence()
    }

    /// The recorded identity no longer describes the entity and should be
    /// recomputed and persisted.
    pub fn is_drift(&self) -> bool {
        self.confidence() < Confidence::High
    }
}

/// Extra context a stored entry carries beyond its identity string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveHints<'a> {
    pub type_tag: Option<&'a str>,
    pub local_name: Option<&'a str>,
    pub display_name: Option<&'a str>,
}

/// Recovers live handles from identities by walking the host graph fresh on
/// every call. First strategy to succeed wins.
pub struct Resolver<'h> {
    host: &'h dyn EditorHost,
}

impl<'h> Resolver<'h> {
    pub fn new(host: &'h dyn EditorHost) -> Self {
        Self { host }
    }

    pub fn resolve(&self, identity: &EntityIdentity) -> Option<Resolution> {
        self.resolve_with_hints(identity, &ResolveHints::default())
    }

    pub fn resolve_with_hints(
        &self,
        identity: &EntityIdentity,
        hints: &ResolveHints<'_>,
    ) -> Option<Resolution> {
        let hints = ResolveHints {
            type_tag: hints.type_tag.filter(|tag| !tag.is_empty()),
            ..*hints
        };
        let resolution = match identity {
            EntityIdentity::ContentAddressed { guid } => self.attempt(
                identity,
                Strategy::ContentAddressed,
                self.by_content_address(guid, &hints),
            ),
            EntityIdentity::Null => {
                self.attempt(identity, Strategy::FuzzyName, self.by_fuzzy_name(identity, &hints))
            }
            _ => self
                .attempt(identity, Strategy::ExactPath, self.by_exact_path(identity, &hints))
                .or_else(|| {
                    self.attempt(
                        identity,
                        Strategy::InstanceId,
                        self.by_instance_id(identity, &hints),
                    )
                })
                .or_else(|| {
                    self.attempt(
                        identity,
                        Strategy::FuzzyName,
                        self.by_fuzzy_name(identity, &hints),
                    )
                }),
        };

        if let Some(found) = resolution {
            debug!(
                identity = %identity,
                entity = found.entity.0,
                strategy = ?found.strategy,
                confidence = ?found.confidence(),
                drift = found.is_drift(),
                "reference_resolved"
            );
        }
        resolution
    }

    fn attempt(
        &self,
        identity: &EntityIdentity,
        strategy: Strategy,
        found: Option<EntityId>,
    ) -> Option<Resolution> {
        debug!(
            identity = %identity,
            strategy = ?strategy,
            confidence = ?strategy.confidence(),
            hit = found.is_some(),
            "reference_resolve_attempt"
        );
        found.map(|entity| Resolution { entity, strategy })
    }

    fn by_exact_path(&self, identity: &EntityIdentity, hints: &ResolveHints<'_>) -> Option<EntityId> {
        let recorded_document = identity.document_key()?;
        let path = identity.structural_path()?;
        let current_document = self.host.current_document_key();
        if !self.is_current_document(recorded_document, current_document.as_deref()) {
            return None;
        }

        let segments = path.split('/').collect::<Vec<_>>();
        let mut matches = Vec::new();
        for root in self.host.root_entities_of(current_document.as_deref()) {
            self.walk_path(root, &segments, &mut matches);
        }

        let recorded_instance = identity.session_instance_id();
        // A recorded instance id only vetoes a path match while it still names
        // some other live entity in this session.
        let instance_owner = recorded_instance.and_then(|id| self.lookup_instance(id));
        matches.into_iter().find(|candidate| {
            self.type_matches(*candidate, hints.type_tag)
                && instance_owner.map_or(true, |owner| owner == *candidate)
        })
    }

    fn walk_path(&self, node: EntityId, segments: &[&str], out: &mut Vec<EntityId>) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        if self.host.local_name(node).as_deref() != Some(*head) {
            return;
        }
        if rest.is_empty() {
            out.push(node);
            return;
        }
        for child in self.host.children_of(node) {
            self.walk_path(child, rest, out);
        }
    }

    fn by_instance_id(
        &self,
        identity: &EntityIdentity,
        hints: &ResolveHints<'_>,
    ) -> Option<EntityId> {
        let instance_id = identity.session_instance_id()?;
        let found = self.lookup_instance(instance_id)?;
        if self.host.document_of(found) != self.host.current_document_key() {
            debug!(
                identity = %identity,
                entity = found.0,
                "reference_instance_match_rejected_cross_document"
            );
            return None;
        }
        self.type_matches(found, hints.type_tag).then_some(found)
    }

    fn by_fuzzy_name(&self, identity: &EntityIdentity, hints: &ResolveHints<'_>) -> Option<EntityId> {
        let target = identity
            .local_name()
            .map(ToString::to_string)
            .or_else(|| hints.local_name.map(|name| name.trim().to_string()))
            .or_else(|| hints.display_name.map(extract_local_name))
            .filter(|name| !name.is_empty())?;
        let suffix = format!("/{target}");
        let current_document = self.host.current_document_key();
        // names only mean something inside the document that recorded them
        if let Some(recorded) = identity.document_key() {
            if recorded != UNSAVED_DOCUMENT_KEY
                && !self.is_current_document(recorded, current_document.as_deref())
            {
                return None;
            }
        }

        self.host
            .all_entities_of_type(hints.type_tag)
            .into_iter()
            .filter(|candidate| self.host.document_of(*candidate) == current_document)
            .filter(|candidate| self.type_matches(*candidate, hints.type_tag))
            .find(|candidate| {
                if self.host.local_name(*candidate).as_deref() == Some(target.as_str()) {
                    return true;
                }
                structural_names(self.host, *candidate)
                    .map(|names| names.join("/"))
                    .is_some_and(|path| path == target || path.ends_with(&suffix))
            })
    }

    fn by_content_address(&self, guid: &AssetGuid, hints: &ResolveHints<'_>) -> Option<EntityId> {
        let path = self.host.path_for_guid(guid)?;
        let entity = self.host.load_at_path(&path)?;
        self.type_matches(entity, hints.type_tag).then_some(entity)
    }

    /// Registry lookup first, then a scan of every scene node. Only node
    /// identities carry instance ids, so assets never answer.
    fn lookup_instance(&self, instance_id: InstanceId) -> Option<EntityId> {
        if let Some(found) = self
            .host
            .entity_for_instance_id(instance_id)
            .filter(|entity| self.host.is_alive(*entity))
            .filter(|entity| self.host.asset_path_of(*entity).is_none())
        {
            return Some(found);
        }
        self.host
            .all_entities_of_type(None)
            .into_iter()
            .find(|entity| self.host.instance_id(*entity) == Some(instance_id))
    }

    fn is_current_document(&self, recorded: &str, current: Option<&str>) -> bool {
        match current {
            Some(current) => recorded == current,
            None => recorded == UNSAVED_DOCUMENT_KEY,
        }
    }

    fn type_matches(&self, entity: EntityId, expected: Option<&str>) -> bool {
        match expected {
            Some(expected) => self.host.type_tag(entity).as_deref() == Some(expected),
            None => true,
        }
    }
}
