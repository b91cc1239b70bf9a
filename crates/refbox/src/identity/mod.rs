mod codec;
mod display_name;
mod resolver;

pub use codec::{
    decode, decode_optional, encode, identify, EntityIdentity, ASSET_PREFIX, INSTANCE_PREFIX,
    NULL_TOKEN, PATH_PREFIX, ROOT_PREFIX, UNSAVED_DOCUMENT_KEY,
};
pub use display_name::{
    compute_display_name, extract_local_name, fallback_display_name, ANCESTOR_MARKER,
    UNKNOWN_TYPE_TAG,
};
pub use resolver::{Confidence, Resolution, ResolveHints, Resolver, Strategy};
