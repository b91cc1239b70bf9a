//! Lifecycle glue between the editor and the reference store.
//!
//! The editor reports transitions; the session decides when to force a save
//! and when to run the one load/reattach pass a reload needs. Failures never
//! escape as panics: they come back as warnings in a [`LifecycleReport`].

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::host::EditorHost;
use crate::store::{
    LoadReport, ReattachReport, ReferenceEntry, ReferenceStore, StorageError, StoreError,
    StoreStorage,
};
use crate::ToolPaths;

mod settings;

pub use settings::{
    ReferenceBoxSettings, SettingsError, ToolSettings, WindowSettings, DEFAULT_WINDOW_HEIGHT,
    DEFAULT_WINDOW_WIDTH, MIN_WINDOW_EXTENT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    WindowOpened,
    WindowClosed,
    EnteringSimulation,
    ExitingSimulation,
    AboutToReload,
    Reloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Live handles are stale or were never loaded.
    Pending,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    pub event: LifecycleEvent,
    pub saved_to: Option<PathBuf>,
    pub settings_saved: bool,
    pub loaded: Option<LoadReport>,
    pub reattach: Option<ReattachReport>,
    pub warnings: Vec<String>,
}

impl LifecycleReport {
    fn new(event: LifecycleEvent) -> Self {
        Self {
            event,
            saved_to: None,
            settings_saved: false,
            loaded: None,
            reattach: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct ReferenceBoxSession {
    paths: ToolPaths,
    store: ReferenceStore,
    settings: ToolSettings,
    readiness: Readiness,
}

impl ReferenceBoxSession {
    /// Binds a store to the project's files. Nothing is loaded until the
    /// first `WindowOpened`/`Reloaded` or the first store access.
    pub fn open(paths: ToolPaths) -> Self {
        let settings = ToolSettings::load(&paths.settings_file());
        let store = ReferenceStore::with_storage(StoreStorage::from_tool_paths(&paths));
        Self {
            paths,
            store,
            settings,
            readiness: Readiness::Pending,
        }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ToolSettings {
        &mut self.settings
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn handle(&mut self, event: LifecycleEvent, host: &dyn EditorHost) -> LifecycleReport {
        let mut report = LifecycleReport::new(event);
        match event {
            LifecycleEvent::WindowOpened | LifecycleEvent::Reloaded => {
                if self.readiness == Readiness::Pending {
                    self.load_and_reattach(host, &mut report);
                }
            }
            LifecycleEvent::WindowClosed => {
                self.force_save(&mut report);
                match self.settings.save(&self.paths.settings_file()) {
                    Ok(()) => report.settings_saved = true,
                    Err(error) => {
                        warn!(error = %error, "reference_settings_save_failed");
                        report.warnings.push(error.to_string());
                    }
                }
                self.readiness = Readiness::Pending;
            }
            LifecycleEvent::EnteringSimulation
            | LifecycleEvent::ExitingSimulation
            | LifecycleEvent::AboutToReload => {
                self.force_save(&mut report);
                self.readiness = Readiness::Pending;
            }
        }
        info!(
            event = ?event,
            ready = self.is_ready(),
            warnings = report.warnings.len(),
            "reference_lifecycle_event"
        );
        report
    }

    /// Runs the pending load/reattach if there is one.
    pub fn ensure_ready(&mut self, host: &dyn EditorHost) -> Option<LifecycleReport> {
        if self.readiness == Readiness::Ready {
            return None;
        }
        let mut report = LifecycleReport::new(LifecycleEvent::Reloaded);
        self.load_and_reattach(host, &mut report);
        Some(report)
    }

    pub fn store(&mut self, host: &dyn EditorHost) -> &ReferenceStore {
        self.ensure_ready(host);
        &self.store
    }

    pub fn store_mut(&mut self, host: &dyn EditorHost) -> &mut ReferenceStore {
        self.ensure_ready(host);
        &mut self.store
    }

    /// Entries passing the configured type filter, in list order.
    pub fn visible_entries(&mut self, host: &dyn EditorHost) -> Vec<(usize, &ReferenceEntry)> {
        self.ensure_ready(host);
        let filter = self.settings.reference_box.type_filter.as_deref();
        self.store
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter.map_or(true, |tag| entry.type_tag() == tag))
            .collect()
    }

    pub fn save_snapshot(
        &mut self,
        name: &str,
        host: &dyn EditorHost,
    ) -> Result<PathBuf, SessionError> {
        self.ensure_ready(host);
        let path = self.store.save_snapshot(name)?;
        self.settings.reference_box.last_snapshot = Some(name.trim().to_string());
        Ok(path)
    }

    /// Replaces the list with a snapshot and reattaches it right away.
    pub fn load_snapshot(
        &mut self,
        name: &str,
        host: &dyn EditorHost,
    ) -> Result<ReattachReport, SessionError> {
        self.ensure_ready(host);
        self.store.load_snapshot(name)?;
        self.settings.reference_box.last_snapshot = Some(name.trim().to_string());
        Ok(self.store.reattach(host)?)
    }

    fn force_save(&mut self, report: &mut LifecycleReport) {
        // a pending list was never loaded; the file on disk is newer
        if self.readiness == Readiness::Pending {
            return;
        }
        match self.store.save() {
            Ok(path) => report.saved_to = Some(path),
            Err(error) => {
                warn!(error = %error, "reference_session_save_failed");
                report.warnings.push(error.to_string());
            }
        }
    }

    fn load_and_reattach(&mut self, host: &dyn EditorHost, report: &mut LifecycleReport) {
        self.readiness = Readiness::Ready;
        match self.store.load() {
            Ok(loaded) => report.loaded = Some(loaded),
            Err(error) => {
                warn!(error = %error, "reference_session_load_failed");
                report.warnings.push(error.to_string());
            }
        }
        match self.store.reattach(host) {
            Ok(reattach) => {
                if let Some(diagnostic) = reattach.diagnostic() {
                    report.warnings.push(diagnostic);
                }
                report.reattach = Some(reattach);
            }
            Err(error) => {
                warn!(error = %error, "reference_reattach_save_failed");
                report.warnings.push(error.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests;
