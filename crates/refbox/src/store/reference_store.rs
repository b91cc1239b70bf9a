use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::host::{EditorHost, EntityId, EntityIntrospection};
use crate::identity::{identify, Resolver};

use super::entry::ReferenceEntry;
use super::persist::{new_session_nonce, StorageError, StoreFile, StoreStorage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reference index {index} is out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
    /// The in-memory change was applied; only the session write failed.
    #[error("change applied but the session auto-save failed: {0}")]
    AutoSave(#[source] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { index: usize },
    AlreadyPresent { index: usize },
    NotAlive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReattachReport {
    pub still_unresolved: usize,
    pub newly_resolved: usize,
    pub identity_corrected: usize,
}

/// User-facing "could not find" line, `None` when nothing is missing.
pub fn missing_objects_message(count: usize) -> Option<String> {
    match count {
        0 => None,
        1 => Some("could not find 1 object".to_string()),
        count => Some(format!("could not find {count} objects")),
    }
}

impl ReattachReport {
    pub fn diagnostic(&self) -> Option<String> {
        missing_objects_message(self.still_unresolved)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub still_live: usize,
    pub lost: usize,
    pub identity_corrected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Session,
    SessionMissing,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub entry_count: usize,
}

/// Ordered reference list with session auto-save and named snapshots.
///
/// Every mutating call writes the session tier when storage is attached.
/// A `StoreError::AutoSave` means the mutation happened but was not saved.
#[derive(Debug)]
pub struct ReferenceStore {
    entries: Vec<ReferenceEntry>,
    storage: Option<StoreStorage>,
    session_nonce: String,
    /// Set while an unreadable session file could not be moved aside.
    session_locked: bool,
}

impl Default for ReferenceStore {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            storage: None,
            session_nonce: new_session_nonce(),
            session_locked: false,
        }
    }
}

impl ReferenceStore {
    /// In-memory store with no persistence.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(storage: StoreStorage) -> Self {
        Self {
            storage: Some(storage),
            ..Self::default()
        }
    }

    pub fn session_nonce(&self) -> &str {
        &self.session_nonce
    }

    pub fn storage(&self) -> Option<&StoreStorage> {
        self.storage.as_ref()
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_resolved()).count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.len() - self.resolved_count()
    }

    pub fn position_of_live(&self, entity: EntityId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.live_handle() == Some(entity))
    }

    /// Entries carrying `type_tag`, with their indices, in list order.
    pub fn entries_of_type<'a>(
        &'a self,
        type_tag: &'a str,
    ) -> impl Iterator<Item = (usize, &'a ReferenceEntry)> + 'a {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, entry)| entry.type_tag() == type_tag)
    }

    /// Indices grouped by type tag; groups sorted by tag, members in list order.
    pub fn grouped_by_type(&self) -> BTreeMap<String, Vec<usize>> {
        let mut groups = BTreeMap::<String, Vec<usize>>::new();
        for (index, entry) in self.entries.iter().enumerate() {
            groups
                .entry(entry.type_tag().to_string())
                .or_default()
                .push(index);
        }
        groups
    }

    pub fn add(&mut self, host: &dyn EditorHost, entity: EntityId) -> Result<AddOutcome, StoreError> {
        if !host.is_alive(entity) {
            return Ok(AddOutcome::NotAlive);
        }
        let identity = identify(host, entity);
        let existing = self.entries.iter().position(|entry| {
            entry.is_resolved()
                && (entry.live_handle() == Some(entity)
                    || (!identity.is_null() && *entry.identity() == identity))
        });
        if let Some(index) = existing {
            debug!(index, identity = %identity, "reference_add_duplicate_ignored");
            return Ok(AddOutcome::AlreadyPresent { index });
        }

        let entry = ReferenceEntry::from_live(host, entity);
        info!(
            identity = %entry.identity(),
            display_name = entry.display_name(),
            type_tag = entry.type_tag(),
            "reference_added"
        );
        self.entries.push(entry);
        let index = self.entries.len() - 1;
        self.auto_save()?;
        Ok(AddOutcome::Added { index })
    }

    pub fn remove(&mut self, index: usize) -> Result<ReferenceEntry, StoreError> {
        self.check_index(index)?;
        let removed = self.entries.remove(index);
        info!(
            index,
            identity = %removed.identity(),
            "reference_removed"
        );
        self.auto_save()?;
        Ok(removed)
    }

    /// Empties the list. Confirmation is the caller's responsibility.
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let removed = self.entries.len();
        self.entries.clear();
        info!(removed, "reference_store_cleared");
        self.auto_save()?;
        Ok(removed)
    }

    /// Moves one entry, keeping the relative order of all others.
    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        debug!(from, to, "reference_moved");
        self.auto_save()
    }

    /// Drops every placeholder entry. Explicit user action only.
    pub fn remove_unresolved(&mut self) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(ReferenceEntry::is_resolved);
        let removed = before - self.entries.len();
        if removed > 0 {
            info!(removed, "reference_unresolved_purged");
            self.auto_save()?;
        }
        Ok(removed)
    }

    /// Runs the resolver for every unresolved entry. Never un-resolves an
    /// entry and never touches the frozen label of one that stays missing.
    /// Drifted identities (medium/low confidence) are rewritten and saved.
    pub fn reattach(&mut self, host: &dyn EditorHost) -> Result<ReattachReport, StoreError> {
        let before = self.to_store_file();
        let resolver = Resolver::new(host);
        let mut held = self
            .entries
            .iter()
            .filter_map(ReferenceEntry::live_handle)
            .collect::<HashSet<_>>();
        let mut report = ReattachReport::default();

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.is_resolved() {
                continue;
            }
            let resolution = resolver.resolve_with_hints(entry.identity(), &entry.resolve_hints());
            let Some(found) = resolution.filter(|found| !held.contains(&found.entity)) else {
                report.still_unresolved += 1;
                continue;
            };

            held.insert(found.entity);
            entry.attach(host, found.entity);
            report.newly_resolved += 1;
            if found.is_drift() && entry.rewrite_identity(identify(host, found.entity)) {
                report.identity_corrected += 1;
                info!(
                    index,
                    identity = %entry.identity(),
                    strategy = ?found.strategy,
                    confidence = ?found.confidence(),
                    "reference_identity_corrected"
                );
            }
        }

        info!(
            still_unresolved = report.still_unresolved,
            newly_resolved = report.newly_resolved,
            identity_corrected = report.identity_corrected,
            "reference_reattach_summary"
        );
        if self.to_store_file() != before {
            self.auto_save()?;
        }
        Ok(report)
    }

    /// Liveness pass over resolved entries: vanished entities drop to
    /// placeholders, survivors get fresh labels and, if they moved, fresh
    /// identities.
    pub fn refresh(&mut self, host: &dyn EditorHost) -> Result<RefreshReport, StoreError> {
        let before = self.to_store_file();
        let mut report = RefreshReport::default();

        for entry in &mut self.entries {
            let Some(handle) = entry.live_handle() else {
                continue;
            };
            if !host.is_alive(handle) {
                entry.detach();
                report.lost += 1;
                debug!(identity = %entry.identity(), "reference_lost");
                continue;
            }
            entry.attach(host, handle);
            if entry.rewrite_identity(identify(host, handle)) {
                report.identity_corrected += 1;
            }
            report.still_live += 1;
        }

        if self.to_store_file() != before {
            self.auto_save()?;
        }
        Ok(report)
    }

    /// Writes the session tier. Refused while an unreadable session file
    /// is still in place.
    pub fn save(&self) -> Result<PathBuf, StorageError> {
        let storage = self.storage.as_ref().ok_or(StorageError::Detached)?;
        if self.session_locked {
            return Err(StorageError::SessionLocked {
                path: storage.session_path().to_path_buf(),
            });
        }
        storage.write_session(&self.to_store_file())
    }

    /// Replaces the list with the session tier contents, all unresolved.
    /// A missing session file leaves the list untouched.
    pub fn load(&mut self) -> Result<LoadReport, StorageError> {
        let storage = self.storage.as_ref().ok_or(StorageError::Detached)?;
        let read = storage.read_session();
        // an unreadable file that is still in place must not be overwritten
        self.session_locked = read.is_err() && storage.session_path().exists();
        let Some(file) = read? else {
            return Ok(LoadReport {
                source: LoadSource::SessionMissing,
                entry_count: self.entries.len(),
            });
        };
        let entry_count = self.replace_from(&file);
        Ok(LoadReport {
            source: LoadSource::Session,
            entry_count,
        })
    }

    pub fn save_snapshot(&self, name: &str) -> Result<PathBuf, StorageError> {
        let storage = self.storage.as_ref().ok_or(StorageError::Detached)?;
        storage.write_snapshot(name, &self.to_store_file())
    }

    /// Replaces the list with a snapshot and writes it through to the
    /// session tier.
    pub fn load_snapshot(&mut self, name: &str) -> Result<LoadReport, StorageError> {
        let storage = self.storage.as_ref().ok_or(StorageError::Detached)?;
        let file = storage.read_snapshot(name)?;
        let entry_count = self.replace_from(&file);
        info!(snapshot = name, entry_count, "reference_snapshot_loaded");
        self.save()?;
        Ok(LoadReport {
            source: LoadSource::Snapshot,
            entry_count,
        })
    }

    pub fn list_snapshots(&self) -> Result<Vec<String>, StorageError> {
        let storage = self.storage.as_ref().ok_or(StorageError::Detached)?;
        storage.list_snapshots()
    }

    pub fn delete_snapshot(&self, name: &str) -> Result<bool, StorageError> {
        let storage = self.storage.as_ref().ok_or(StorageError::Detached)?;
        storage.delete_snapshot(name)
    }

    pub fn to_store_file(&self) -> StoreFile {
        StoreFile::new(
            self.entries
                .iter()
                .map(ReferenceEntry::to_persisted)
                .collect(),
        )
        .written_by(&self.session_nonce)
    }

    fn replace_from(&mut self, file: &StoreFile) -> usize {
        let same_session = file.is_from_session(&self.session_nonce);
        self.entries = file
            .entries
            .iter()
            .map(|record| {
                let entry = ReferenceEntry::from_persisted(record);
                if same_session {
                    entry
                } else {
                    entry.without_session_hint()
                }
            })
            .collect();
        if !same_session {
            debug!(
                written_by = file.session_nonce.as_deref().unwrap_or("unknown"),
                "reference_instance_hints_dropped"
            );
        }
        self.entries.len()
    }

    fn auto_save(&self) -> Result<(), StoreError> {
        if self.storage.is_none() {
            return Ok(());
        }
        self.save().map(|_| ()).map_err(StoreError::AutoSave)
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(StoreError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
        }
    }
}
