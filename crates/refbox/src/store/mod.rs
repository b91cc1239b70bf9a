mod entry;
mod persist;
mod reference_store;

pub use entry::{EntryState, ReferenceEntry};
pub use persist::{
    PersistedEntry, StorageError, StoreFile, StoreStorage, SNAPSHOT_EXTENSION,
    STORE_FORMAT_VERSION,
};
pub use reference_store::{
    missing_objects_message, AddOutcome, LoadReport, LoadSource, ReattachReport, RefreshReport,
    ReferenceStore, StoreError,
};
