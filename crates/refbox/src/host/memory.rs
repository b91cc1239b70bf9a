use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use super::{
    AssetGuid, AssetRepository, DocumentContext, EntityId, EntityIntrospection, InstanceId,
    SceneGraph,
};

pub const NODE_TYPE_TAG: &str = "GameObject";

const INSTANCE_IDS_PER_SESSION: i64 = 1_000_000;
const ASSET_GUID_HEX_LEN: usize = 32;

#[derive(Debug, Default)]
struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

#[derive(Debug, Clone)]
struct Node {
    instance_id: InstanceId,
    name: String,
    type_tag: String,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    document: usize,
}

#[derive(Debug, Clone, Default)]
struct Document {
    key: Option<String>,
    roots: Vec<EntityId>,
}

#[derive(Debug, Clone)]
struct AssetRecord {
    guid: AssetGuid,
    type_tag: String,
    entity: EntityId,
    instance_id: InstanceId,
}

/// In-memory editor host: documents holding node hierarchies, plus an asset
/// repository keyed by import path.
///
/// `restart_session` models a process restart: every live handle and
/// instance id is reissued while names, hierarchy and asset GUIDs survive.
#[derive(Debug)]
pub struct MemoryWorld {
    allocator: EntityIdAllocator,
    session_epoch: i64,
    next_instance_id: i64,
    guid_nonce: u64,
    documents: Vec<Document>,
    active_document: usize,
    nodes: HashMap<EntityId, Node>,
    assets_by_path: BTreeMap<String, AssetRecord>,
    paths_by_guid: HashMap<AssetGuid, String>,
    asset_paths_by_entity: HashMap<EntityId, String>,
    instance_registry_enabled: bool,
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self {
            allocator: EntityIdAllocator::default(),
            session_epoch: 1,
            next_instance_id: INSTANCE_IDS_PER_SESSION,
            guid_nonce: 0,
            documents: vec![Document::default()],
            active_document: 0,
            nodes: HashMap::new(),
            assets_by_path: BTreeMap::new(),
            paths_by_guid: HashMap::new(),
            asset_paths_by_entity: HashMap::new(),
            instance_registry_enabled: true,
        }
    }

    /// Makes the document with `key` active, creating it when needed.
    pub fn open_document(&mut self, key: Option<&str>) {
        let existing = self
            .documents
            .iter()
            .position(|document| document.key.as_deref() == key);
        self.active_document = match existing {
            Some(index) => index,
            None => {
                self.documents.push(Document {
                    key: key.map(ToString::to_string),
                    roots: Vec::new(),
                });
                self.documents.len() - 1
            }
        };
    }

    pub fn save_document_as(&mut self, key: &str) {
        self.documents[self.active_document].key = Some(key.to_string());
    }

    /// Disables the instance-id registry so lookups have to scan.
    pub fn set_instance_registry_enabled(&mut self, enabled: bool) {
        self.instance_registry_enabled = enabled;
    }

    pub fn create_node(
        &mut self,
        parent: Option<EntityId>,
        name: &str,
        type_tag: &str,
    ) -> Option<EntityId> {
        let document = match parent {
            Some(parent_id) => self.nodes.get(&parent_id)?.document,
            None => self.active_document,
        };
        let id = self.allocator.allocate();
        let instance_id = self.allocate_instance_id();
        self.nodes.insert(
            id,
            Node {
                instance_id,
                name: name.to_string(),
                type_tag: type_tag.to_string(),
                parent,
                children: Vec::new(),
                document,
            },
        );
        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.push(id);
                }
            }
            None => self.documents[document].roots.push(id),
        }
        Some(id)
    }

    /// Creates the leaf of a slash-separated path in the active document,
    /// reusing existing ancestors and creating missing ones as plain nodes.
    pub fn spawn_path(&mut self, path: &str, type_tag: &str) -> Option<EntityId> {
        let segments = split_path(path)?;
        let (leaf, ancestors) = segments.split_last()?;
        let mut parent: Option<EntityId> = None;
        for name in ancestors {
            let existing = self
                .child_ids(parent)
                .into_iter()
                .find(|child| self.nodes.get(child).is_some_and(|node| node.name == *name));
            parent = match existing {
                Some(id) => Some(id),
                None => Some(self.create_node(parent, name, NODE_TYPE_TAG)?),
            };
        }
        self.create_node(parent, leaf, type_tag)
    }

    /// First node in traversal order at `path` in the active document.
    pub fn find_by_path(&self, path: &str) -> Option<EntityId> {
        let segments = split_path(path)?;
        let mut frontier = self.documents[self.active_document].roots.clone();
        let mut found = None;
        for name in &segments {
            found = frontier
                .iter()
                .copied()
                .find(|id| self.nodes.get(id).is_some_and(|node| node.name == *name));
            let current = found?;
            frontier = self.children_of(current);
        }
        found
    }

    pub fn rename(&mut self, entity: EntityId, name: &str) -> bool {
        match self.nodes.get_mut(&entity) {
            Some(node) => {
                node.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Moves a node under `new_parent` (or to the root of its document).
    /// Refuses moves that would create a cycle or cross documents.
    pub fn reparent(&mut self, entity: EntityId, new_parent: Option<EntityId>) -> bool {
        let Some(node) = self.nodes.get(&entity) else {
            return false;
        };
        let document = node.document;
        let old_parent = node.parent;
        if let Some(parent_id) = new_parent {
            let Some(parent_node) = self.nodes.get(&parent_id) else {
                return false;
            };
            if parent_node.document != document || self.is_self_or_ancestor(entity, parent_id) {
                return false;
            }
        }

        match old_parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.retain(|child| *child != entity);
                }
            }
            None => self.documents[document].roots.retain(|root| *root != entity),
        }
        match new_parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.push(entity);
                }
            }
            None => self.documents[document].roots.push(entity),
        }
        if let Some(node) = self.nodes.get_mut(&entity) {
            node.parent = new_parent;
        }
        true
    }

    /// Destroys a node and its whole subtree.
    pub fn destroy(&mut self, entity: EntityId) -> bool {
        let Some(node) = self.nodes.get(&entity) else {
            return false;
        };
        match node.parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.retain(|child| *child != entity);
                }
            }
            None => {
                let document = node.document;
                self.documents[document].roots.retain(|root| *root != entity);
            }
        }

        let mut pending = vec![entity];
        while let Some(id) = pending.pop() {
            if let Some(removed) = self.nodes.remove(&id) {
                pending.extend(removed.children);
            }
        }
        true
    }

    /// Registers an asset at `path`, minting a GUID on first import.
    pub fn import_asset(&mut self, path: &str, type_tag: &str) -> AssetGuid {
        if let Some(record) = self.assets_by_path.get(path) {
            return record.guid.clone();
        }
        let guid = self.mint_guid(path);
        let entity = self.allocator.allocate();
        let instance_id = self.allocate_instance_id();
        self.assets_by_path.insert(
            path.to_string(),
            AssetRecord {
                guid: guid.clone(),
                type_tag: type_tag.to_string(),
                entity,
                instance_id,
            },
        );
        self.paths_by_guid.insert(guid.clone(), path.to_string());
        self.asset_paths_by_entity.insert(entity, path.to_string());
        guid
    }

    pub fn delete_asset(&mut self, path: &str) -> bool {
        let Some(record) = self.assets_by_path.remove(path) else {
            return false;
        };
        self.paths_by_guid.remove(&record.guid);
        self.asset_paths_by_entity.remove(&record.entity);
        true
    }

    /// Reissues every handle and instance id, as a fresh process would.
    pub fn restart_session(&mut self) {
        self.session_epoch = self.session_epoch.saturating_add(1);
        self.next_instance_id = self.session_epoch.saturating_mul(INSTANCE_IDS_PER_SESSION);

        let mut old_ids = self.nodes.keys().copied().collect::<Vec<_>>();
        old_ids.sort();
        let mut remap = HashMap::with_capacity(old_ids.len());
        for old_id in &old_ids {
            remap.insert(*old_id, self.allocator.allocate());
        }

        let mut rebuilt = HashMap::with_capacity(old_ids.len());
        for old_id in old_ids {
            let Some(mut node) = self.nodes.remove(&old_id) else {
                continue;
            };
            node.instance_id = self.allocate_instance_id();
            node.parent = node.parent.and_then(|parent| remap.get(&parent).copied());
            node.children = node
                .children
                .iter()
                .filter_map(|child| remap.get(child).copied())
                .collect();
            if let Some(new_id) = remap.get(&old_id) {
                rebuilt.insert(*new_id, node);
            }
        }
        self.nodes = rebuilt;
        for document in &mut self.documents {
            document.roots = document
                .roots
                .iter()
                .filter_map(|root| remap.get(root).copied())
                .collect();
        }

        self.asset_paths_by_entity.clear();
        let paths = self.assets_by_path.keys().cloned().collect::<Vec<_>>();
        for path in paths {
            let entity = self.allocator.allocate();
            let instance_id = self.allocate_instance_id();
            if let Some(record) = self.assets_by_path.get_mut(&path) {
                record.entity = entity;
                record.instance_id = instance_id;
            }
            self.asset_paths_by_entity.insert(entity, path);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn allocate_instance_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next_instance_id);
        self.next_instance_id = self.next_instance_id.saturating_add(1);
        id
    }

    fn mint_guid(&mut self, path: &str) -> AssetGuid {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.guid_nonce.to_le_bytes());
        self.guid_nonce = self.guid_nonce.saturating_add(1);
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(ASSET_GUID_HEX_LEN);
        for byte in digest.iter().take(ASSET_GUID_HEX_LEN / 2) {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        AssetGuid(hex)
    }

    fn child_ids(&self, parent: Option<EntityId>) -> Vec<EntityId> {
        match parent {
            Some(parent_id) => self.children_of(parent_id),
            None => self.documents[self.active_document].roots.clone(),
        }
    }

    fn is_self_or_ancestor(&self, candidate: EntityId, mut node: EntityId) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes.get(&node).and_then(|current| current.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn collect_preorder(&self, id: EntityId, type_tag: Option<&str>, out: &mut Vec<EntityId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if type_tag.map_or(true, |tag| tag == node.type_tag) {
            out.push(id);
        }
        for child in &node.children {
            self.collect_preorder(*child, type_tag, out);
        }
    }
}

fn split_path(path: &str) -> Option<Vec<&str>> {
    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

impl AssetRepository for MemoryWorld {
    fn path_for_guid(&self, guid: &AssetGuid) -> Option<String> {
        self.paths_by_guid.get(guid).cloned()
    }

    fn guid_for_path(&self, path: &str) -> Option<AssetGuid> {
        self.assets_by_path.get(path).map(|record| record.guid.clone())
    }

    fn load_at_path(&self, path: &str) -> Option<EntityId> {
        self.assets_by_path.get(path).map(|record| record.entity)
    }

    fn asset_path_of(&self, entity: EntityId) -> Option<String> {
        self.asset_paths_by_entity.get(&entity).cloned()
    }
}

impl SceneGraph for MemoryWorld {
    fn root_entities_of(&self, document: Option<&str>) -> Vec<EntityId> {
        self.documents
            .iter()
            .find(|candidate| candidate.key.as_deref() == document)
            .map(|found| found.roots.clone())
            .unwrap_or_default()
    }

    fn children_of(&self, entity: EntityId) -> Vec<EntityId> {
        self.nodes
            .get(&entity)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    fn parent_of(&self, entity: EntityId) -> Option<EntityId> {
        self.nodes.get(&entity).and_then(|node| node.parent)
    }

    fn instance_id(&self, entity: EntityId) -> Option<InstanceId> {
        if let Some(node) = self.nodes.get(&entity) {
            return Some(node.instance_id);
        }
        let path = self.asset_paths_by_entity.get(&entity)?;
        self.assets_by_path.get(path).map(|record| record.instance_id)
    }

    fn entity_for_instance_id(&self, id: InstanceId) -> Option<EntityId> {
        if !self.instance_registry_enabled {
            return None;
        }
        self.nodes
            .iter()
            .find(|(_, node)| node.instance_id == id)
            .map(|(entity, _)| *entity)
            .or_else(|| {
                self.assets_by_path
                    .values()
                    .find(|record| record.instance_id == id)
                    .map(|record| record.entity)
            })
    }

    fn all_entities_of_type(&self, type_tag: Option<&str>) -> Vec<EntityId> {
        let mut out = Vec::new();
        for document in &self.documents {
            for root in &document.roots {
                self.collect_preorder(*root, type_tag, &mut out);
            }
        }
        out
    }

    fn document_of(&self, entity: EntityId) -> Option<String> {
        let node = self.nodes.get(&entity)?;
        self.documents
            .get(node.document)
            .and_then(|document| document.key.clone())
    }
}

impl DocumentContext for MemoryWorld {
    fn current_document_key(&self) -> Option<String> {
        self.documents[self.active_document].key.clone()
    }
}

impl EntityIntrospection for MemoryWorld {
    fn is_alive(&self, entity: EntityId) -> bool {
        self.nodes.contains_key(&entity) || self.asset_paths_by_entity.contains_key(&entity)
    }

    fn local_name(&self, entity: EntityId) -> Option<String> {
        if let Some(node) = self.nodes.get(&entity) {
            return Some(node.name.clone());
        }
        let path = self.asset_paths_by_entity.get(&entity)?;
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file_name,
        };
        Some(stem.to_string())
    }

    fn type_tag(&self, entity: EntityId) -> Option<String> {
        if let Some(node) = self.nodes.get(&entity) {
            return Some(node.type_tag.clone());
        }
        let path = self.asset_paths_by_entity.get(&entity)?;
        self.assets_by_path
            .get(path)
            .map(|record| record.type_tag.clone())
    }
}
