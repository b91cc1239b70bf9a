use std::fmt;

use crate::host::{
    AssetGuid, AssetRepository, EditorHost, EntityId, EntityIntrospection, InstanceId, SceneGraph,
};

pub const ASSET_PREFIX: &str = "ASSET";
pub const ROOT_PREFIX: &str = "ROOT";
pub const PATH_PREFIX: &str = "PATH";
pub const INSTANCE_PREFIX: &str = "INSTANCE";
pub const NULL_TOKEN: &str = "NULL";

/// Stands in for the key of a document that has never been persisted.
pub const UNSAVED_DOCUMENT_KEY: &str = "UnsavedDocument";

const MAX_ANCESTOR_DEPTH: usize = 4096;

/// Serializable identity of an asset or scene node.
///
/// The string form is `ASSET:<guid>`, `ROOT:<doc>:<name>:<instance>`,
/// `PATH:<doc>:<a>/<b>/<name>:<instance>`, `INSTANCE:<instance>` or `NULL`.
/// Instance ids are same-session hints and may be absent (empty segment).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityIdentity {
    ContentAddressed {
        guid: AssetGuid,
    },
    RootNode {
        document_key: String,
        local_name: String,
        session_instance_id: Option<InstanceId>,
    },
    PathNode {
        document_key: String,
        structural_path: String,
        session_instance_id: Option<InstanceId>,
    },
    SessionTransient {
        session_instance_id: InstanceId,
    },
    Null,
}

impl EntityIdentity {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_content_addressed(&self) -> bool {
        matches!(self, Self::ContentAddressed { .. })
    }

    pub fn session_instance_id(&self) -> Option<InstanceId> {
        match self {
            Self::RootNode {
                session_instance_id,
                ..
            }
            | Self::PathNode {
                session_instance_id,
                ..
            } => *session_instance_id,
            Self::SessionTransient {
                session_instance_id,
            } => Some(*session_instance_id),
            Self::ContentAddressed { .. } | Self::Null => None,
        }
    }

    pub fn document_key(&self) -> Option<&str> {
        match self {
            Self::RootNode { document_key, .. } | Self::PathNode { document_key, .. } => {
                Some(document_key)
            }
            _ => None,
        }
    }

    /// Slash-joined names from the document root down to the node itself.
    pub fn structural_path(&self) -> Option<&str> {
        match self {
            Self::RootNode { local_name, .. } => Some(local_name),
            Self::PathNode {
                structural_path, ..
            } => Some(structural_path),
            _ => None,
        }
    }

    pub fn local_name(&self) -> Option<&str> {
        let path = self.structural_path()?;
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Same identity with the instance id dropped. Used for identities written
    /// by another session, whose instance ids may now name unrelated nodes.
    pub fn without_session_hint(self) -> Self {
        match self {
            Self::RootNode {
                document_key,
                local_name,
                ..
            } => Self::RootNode {
                document_key,
                local_name,
                session_instance_id: None,
            },
            Self::PathNode {
                document_key,
                structural_path,
                ..
            } => Self::PathNode {
                document_key,
                structural_path,
                session_instance_id: None,
            },
            Self::SessionTransient { .. } => Self::Null,
            other @ (Self::ContentAddressed { .. } | Self::Null) => other,
        }
    }

    /// Builds the node variant that matches the depth of `names`.
    pub(crate) fn for_node(
        document_key: String,
        names: &[String],
        session_instance_id: Option<InstanceId>,
    ) -> Self {
        match names {
            [] => match session_instance_id {
                Some(session_instance_id) => Self::SessionTransient {
                    session_instance_id,
                },
                None => Self::Null,
            },
            [single] => Self::RootNode {
                document_key,
                local_name: single.clone(),
                session_instance_id,
            },
            _ => Self::PathNode {
                document_key,
                structural_path: names.join("/"),
                session_instance_id,
            },
        }
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentAddressed { guid } => write!(f, "{ASSET_PREFIX}:{guid}"),
            Self::RootNode {
                document_key,
                local_name,
                session_instance_id,
            } => write!(
                f,
                "{ROOT_PREFIX}:{}:{local_name}:{}",
                escape_document_key(document_key),
                InstanceSegment(*session_instance_id)
            ),
            Self::PathNode {
                document_key,
                structural_path,
                session_instance_id,
            } => write!(
                f,
                "{PATH_PREFIX}:{}:{structural_path}:{}",
                escape_document_key(document_key),
                InstanceSegment(*session_instance_id)
            ),
            Self::SessionTransient {
                session_instance_id,
            } => write!(f, "{INSTANCE_PREFIX}:{session_instance_id}"),
            Self::Null => f.write_str(NULL_TOKEN),
        }
    }
}

struct InstanceSegment(Option<InstanceId>);

impl fmt::Display for InstanceSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => Ok(()),
        }
    }
}

/// Computes the identity of a live entity. Assets known to the repository
/// are content-addressed; everything else is described by its ancestry.
pub fn identify(host: &dyn EditorHost, entity: EntityId) -> EntityIdentity {
    if let Some(guid) = host
        .asset_path_of(entity)
        .and_then(|path| host.guid_for_path(&path))
    {
        return EntityIdentity::ContentAddressed { guid };
    }

    let instance_id = host.instance_id(entity);
    let Some(names) = structural_names(host, entity) else {
        return EntityIdentity::for_node(String::new(), &[], instance_id);
    };
    let document_key = host
        .document_of(entity)
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| UNSAVED_DOCUMENT_KEY.to_string());
    EntityIdentity::for_node(document_key, &names, instance_id)
}

pub fn encode(host: &dyn EditorHost, entity: EntityId) -> String {
    identify(host, entity).to_string()
}

/// Parses an identity string. Never fails: anything unrecognizable becomes
/// `SessionTransient` when a trailing instance id survives, `Null` otherwise.
pub fn decode(raw: &str) -> EntityIdentity {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == NULL_TOKEN {
        return EntityIdentity::Null;
    }

    let Some((prefix, rest)) = trimmed.split_once(':') else {
        return transient_or_null(parse_instance(trimmed));
    };

    match prefix {
        ASSET_PREFIX => match AssetGuid::parse(rest) {
            Some(guid) => EntityIdentity::ContentAddressed { guid },
            None => EntityIdentity::Null,
        },
        ROOT_PREFIX | PATH_PREFIX => decode_node(rest),
        INSTANCE_PREFIX => transient_or_null(parse_instance(rest)),
        _ => transient_or_null(trailing_instance(rest)),
    }
}

pub fn decode_optional(raw: Option<&str>) -> EntityIdentity {
    raw.map(decode).unwrap_or(EntityIdentity::Null)
}

fn decode_node(rest: &str) -> EntityIdentity {
    let (body, instance_raw) = match rest.rsplit_once(':') {
        Some(split) => split,
        None => return EntityIdentity::Null,
    };
    let instance_id = parse_instance(instance_raw);
    let Some((document_raw, path)) = body.split_once(':') else {
        return transient_or_null(instance_id);
    };
    let document_key = unescape_document_key(document_raw);
    if document_key.is_empty() {
        return transient_or_null(instance_id);
    }

    let names = path
        .split('/')
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if names.iter().any(|name| name.is_empty()) {
        return transient_or_null(instance_id);
    }
    // Depth decides ROOT vs PATH, so a hand-edited prefix cannot disagree with the path.
    EntityIdentity::for_node(document_key, &names, instance_id)
}

fn parse_instance(raw: &str) -> Option<InstanceId> {
    raw.trim().parse::<i64>().ok().map(InstanceId)
}

fn trailing_instance(raw: &str) -> Option<InstanceId> {
    raw.rsplit(':').next().and_then(parse_instance)
}

fn transient_or_null(instance_id: Option<InstanceId>) -> EntityIdentity {
    match instance_id {
        Some(session_instance_id) => EntityIdentity::SessionTransient {
            session_instance_id,
        },
        None => EntityIdentity::Null,
    }
}

fn escape_document_key(key: &str) -> String {
    key.replace('%', "%25").replace(':', "%3A")
}

fn unescape_document_key(raw: &str) -> String {
    raw.replace("%3A", ":").replace("%25", "%")
}

/// Names from the top-level ancestor down to `entity`, or `None` when the
/// entity has no usable name or its ancestry does not terminate.
pub(super) fn structural_names(host: &dyn EditorHost, entity: EntityId) -> Option<Vec<String>> {
    let mut names = Vec::new();
    let mut current = Some(entity);
    while let Some(node) = current {
        if names.len() >= MAX_ANCESTOR_DEPTH {
            return None;
        }
        let name = host.local_name(node).filter(|name| !name.is_empty())?;
        names.push(name);
        current = host.parent_of(node);
    }
    names.reverse();
    Some(names)
}
