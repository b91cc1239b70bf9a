use std::io::{self, BufRead, Write};

use refbox::{
    missing_objects_message, AddOutcome, AssetRepository, LifecycleEvent, LifecycleReport, MemoryWorld,
    ReattachReport, ReferenceBoxSession, ReferenceEntry,
};
use tracing::info;

use super::commands::{AddTarget, CommandRegistry, ConsoleCommand, SnapshotAction};

const PROMPT: &str = "refbox> ";

/// Drives a reference-box session over an in-memory host, one command line
/// at a time.
pub(crate) struct ConsoleRunner {
    world: MemoryWorld,
    session: ReferenceBoxSession,
    registry: CommandRegistry,
    simulating: bool,
    quit_requested: bool,
}

impl ConsoleRunner {
    pub(crate) fn new(world: MemoryWorld, session: ReferenceBoxSession) -> Self {
        Self {
            world,
            session,
            registry: CommandRegistry::with_builtins(),
            simulating: false,
            quit_requested: false,
        }
    }

    pub(crate) fn open_window(&mut self) -> Vec<String> {
        let report = self.session.handle(LifecycleEvent::WindowOpened, &self.world);
        describe_lifecycle(&report)
    }

    pub(crate) fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub(crate) fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        write!(output, "{PROMPT}")?;
        output.flush()?;
        for line in input.lines() {
            for printed in self.execute_line(&line?) {
                writeln!(output, "{printed}")?;
            }
            if self.quit_requested() {
                return Ok(());
            }
            write!(output, "{PROMPT}")?;
            output.flush()?;
        }
        // end of input closes the window like `quit` would
        for printed in self.execute(ConsoleCommand::Quit) {
            writeln!(output, "{printed}")?;
        }
        Ok(())
    }

    pub(crate) fn execute_line(&mut self, line: &str) -> Vec<String> {
        match self.registry.parse_line(line) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) => Vec::new(),
            Err(message) => vec![message],
        }
    }

    fn execute(&mut self, command: ConsoleCommand) -> Vec<String> {
        match command {
            ConsoleCommand::Help => self.registry.help_lines(),
            ConsoleCommand::Doc { key } => {
                self.world.open_document(key.as_deref());
                vec![format!(
                    "active document: {}",
                    key.as_deref().unwrap_or("<unsaved>")
                )]
            }
            ConsoleCommand::Spawn { path, type_tag } => {
                match self.world.spawn_path(&path, &type_tag) {
                    Some(entity) => vec![format!("spawned {path} as #{}", entity.0)],
                    None => vec![format!("error: cannot spawn at '{path}'")],
                }
            }
            ConsoleCommand::Asset { path, type_tag } => {
                let guid = self.world.import_asset(&path, &type_tag);
                vec![format!("asset {path} has guid {guid}")]
            }
            ConsoleCommand::Add { target } => self.add(target),
            ConsoleCommand::Remove { index } => {
                match self.session.store_mut(&self.world).remove(index) {
                    Ok(entry) => vec![format!("removed {}", entry.display_name())],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            ConsoleCommand::Move { from, to } => {
                match self.session.store_mut(&self.world).move_entry(from, to) {
                    Ok(()) => vec![format!("moved entry {from} to {to}")],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            ConsoleCommand::Clear => match self.session.store_mut(&self.world).clear() {
                Ok(removed) => vec![format!("cleared {removed} entries")],
                Err(error) => vec![format!("error: {error}")],
            },
            ConsoleCommand::Purge => {
                match self.session.store_mut(&self.world).remove_unresolved() {
                    Ok(removed) => vec![format!("removed {removed} unresolved entries")],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            ConsoleCommand::List => self.list(),
            ConsoleCommand::Filter { type_tag } => {
                let line = match &type_tag {
                    Some(tag) => format!("showing only <{tag}> entries"),
                    None => "showing all entries".to_string(),
                };
                self.session.settings_mut().reference_box.type_filter = type_tag;
                vec![line]
            }
            ConsoleCommand::Group { enabled } => {
                self.session.settings_mut().reference_box.group_by_type = enabled;
                vec![format!("group by type: {}", on_off(enabled))]
            }
            ConsoleCommand::Rename { path, name } => {
                let Some(entity) = self.world.find_by_path(&path) else {
                    return vec![no_node(&path)];
                };
                self.world.rename(entity, &name);
                self.after_host_change(format!("renamed {path} to {name}"))
            }
            ConsoleCommand::Reparent { path, parent } => {
                let Some(entity) = self.world.find_by_path(&path) else {
                    return vec![no_node(&path)];
                };
                let new_parent = match &parent {
                    Some(parent_path) => match self.world.find_by_path(parent_path) {
                        Some(found) => Some(found),
                        None => return vec![no_node(parent_path)],
                    },
                    None => None,
                };
                if !self.world.reparent(entity, new_parent) {
                    return vec![format!("error: cannot move {path} there")];
                }
                self.after_host_change(format!(
                    "moved {path} under {}",
                    parent.as_deref().unwrap_or("/")
                ))
            }
            ConsoleCommand::Delete { path } => {
                let Some(entity) = self.world.find_by_path(&path) else {
                    return vec![no_node(&path)];
                };
                self.world.destroy(entity);
                self.after_host_change(format!("destroyed {path}"))
            }
            ConsoleCommand::DeleteAsset { path } => {
                if !self.world.delete_asset(&path) {
                    return vec![format!("error: no asset at '{path}'")];
                }
                self.after_host_change(format!("deleted asset {path}"))
            }
            ConsoleCommand::Refresh => match self.session.store_mut(&self.world).refresh(&self.world) {
                Ok(report) => vec![format!(
                    "refresh: {} live, {} lost, {} identities corrected",
                    report.still_live, report.lost, report.identity_corrected
                )],
                Err(error) => vec![format!("error: {error}")],
            },
            ConsoleCommand::Reattach => {
                match self.session.store_mut(&self.world).reattach(&self.world) {
                    Ok(report) => describe_reattach(&report),
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            ConsoleCommand::Reload => {
                self.restart_host(LifecycleEvent::AboutToReload, "reloaded")
            }
            ConsoleCommand::Simulate { enabled } => {
                if enabled == self.simulating {
                    return vec![format!("simulation already {}", on_off(enabled))];
                }
                self.simulating = enabled;
                let event = if enabled {
                    LifecycleEvent::EnteringSimulation
                } else {
                    LifecycleEvent::ExitingSimulation
                };
                self.restart_host(event, if enabled { "simulation on" } else { "simulation off" })
            }
            ConsoleCommand::Snapshot(action) => self.snapshot(action),
            ConsoleCommand::Quit => {
                self.quit_requested = true;
                let report = self.session.handle(LifecycleEvent::WindowClosed, &self.world);
                let mut lines = describe_lifecycle(&report);
                lines.push("bye".to_string());
                lines
            }
        }
    }

    fn add(&mut self, target: AddTarget) -> Vec<String> {
        let (label, entity) = match &target {
            AddTarget::Node { path } => (path.as_str(), self.world.find_by_path(path)),
            AddTarget::Asset { path } => (path.as_str(), self.world.load_at_path(path)),
        };
        let Some(entity) = entity else {
            return vec![format!("error: nothing at '{label}'")];
        };
        match self.session.store_mut(&self.world).add(&self.world, entity) {
            Ok(AddOutcome::Added { index }) => vec![format!("added [{index}] {label}")],
            Ok(AddOutcome::AlreadyPresent { index }) => {
                vec![format!("{label} is already entry [{index}]")]
            }
            Ok(AddOutcome::NotAlive) => vec![format!("error: {label} is not alive")],
            Err(error) => vec![format!("error: {error}")],
        }
    }

    fn list(&mut self) -> Vec<String> {
        let group_by_type = self.session.settings().reference_box.group_by_type;
        let groups = self.session.store(&self.world).grouped_by_type();
        let visible = self.session.visible_entries(&self.world);
        if visible.is_empty() {
            return vec!["(empty)".to_string()];
        }

        let mut lines = Vec::new();
        if group_by_type {
            for (type_tag, indices) in &groups {
                let members = visible
                    .iter()
                    .filter(|(index, _)| indices.contains(index))
                    .map(|(index, entry)| format!("  {}", format_entry(*index, entry)))
                    .collect::<Vec<_>>();
                // the type filter can empty a group
                if members.is_empty() {
                    continue;
                }
                lines.push(format!("{type_tag}:"));
                lines.extend(members);
            }
        } else {
            lines.extend(
                visible
                    .iter()
                    .map(|(index, entry)| format_entry(*index, entry)),
            );
        }

        let unresolved = visible
            .iter()
            .filter(|(_, entry)| !entry.is_resolved())
            .count();
        lines.extend(missing_objects_message(unresolved));
        lines
    }

    fn snapshot(&mut self, action: SnapshotAction) -> Vec<String> {
        match action {
            SnapshotAction::Save { name } => match self.session.save_snapshot(&name, &self.world) {
                Ok(path) => vec![format!("saved snapshot '{name}' to {}", path.display())],
                Err(error) => vec![format!("warning: {error}")],
            },
            SnapshotAction::Load { name } => match self.session.load_snapshot(&name, &self.world) {
                Ok(report) => {
                    let mut lines = vec![format!("loaded snapshot '{name}'")];
                    lines.extend(describe_reattach(&report));
                    lines
                }
                Err(error) => vec![format!("error: {error}")],
            },
            SnapshotAction::Delete { name } => {
                match self.session.store(&self.world).delete_snapshot(&name) {
                    Ok(true) => vec![format!("deleted snapshot '{name}'")],
                    Ok(false) => vec![format!("no snapshot named '{name}'")],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            SnapshotAction::List => match self.session.store(&self.world).list_snapshots() {
                Ok(names) if names.is_empty() => vec!["(no snapshots)".to_string()],
                Ok(names) => names,
                Err(error) => vec![format!("error: {error}")],
            },
        }
    }

    /// Editor-side change notification: keep labels and identities current.
    fn after_host_change(&mut self, done: String) -> Vec<String> {
        let mut lines = vec![done];
        match self.session.store_mut(&self.world).refresh(&self.world) {
            Ok(report) if report.lost > 0 => {
                lines.push(format!("{} entries lost their object", report.lost));
            }
            Ok(_) => {}
            Err(error) => lines.push(format!("warning: {error}")),
        }
        lines
    }

    /// Unload, rebuild every runtime handle, then let the session reattach.
    fn restart_host(&mut self, unload: LifecycleEvent, done: &str) -> Vec<String> {
        let before = self.session.handle(unload, &self.world);
        self.world.restart_session();
        info!(event = ?unload, "host_session_restarted");
        let after = self.session.handle(LifecycleEvent::Reloaded, &self.world);

        let mut lines = describe_lifecycle(&before);
        lines.push(done.to_string());
        lines.extend(describe_lifecycle(&after));
        lines
    }
}

fn format_entry(index: usize, entry: &ReferenceEntry) -> String {
    let state = if entry.is_resolved() { "live" } else { "missing" };
    format!(
        "[{index}] {state:<7} {}  {}",
        entry.display_name(),
        entry.identity()
    )
}

fn describe_lifecycle(report: &LifecycleReport) -> Vec<String> {
    let mut lines = report
        .warnings
        .iter()
        .map(|warning| format!("warning: {warning}"))
        .collect::<Vec<_>>();
    if let Some(reattach) = report
        .reattach
        .filter(|reattach| reattach.newly_resolved > 0 || reattach.identity_corrected > 0)
    {
        lines.push(format!(
            "restored {} entries ({} corrected)",
            reattach.newly_resolved, reattach.identity_corrected
        ));
    }
    lines
}

fn describe_reattach(report: &ReattachReport) -> Vec<String> {
    let mut lines = vec![format!(
        "reattach: {} resolved, {} corrected, {} still missing",
        report.newly_resolved, report.identity_corrected, report.still_unresolved
    )];
    lines.extend(report.diagnostic());
    lines
}

fn no_node(path: &str) -> String {
    format!("error: no node at '{path}'")
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use refbox::ToolPaths;
    use tempfile::TempDir;

    use super::*;

    fn runner(temp: &TempDir) -> ConsoleRunner {
        let session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
        let mut runner = ConsoleRunner::new(MemoryWorld::new(), session);
        assert!(runner.open_window().is_empty());
        runner
    }

    fn run_script(runner: &mut ConsoleRunner, lines: &[&str]) -> Vec<String> {
        lines
            .iter()
            .flat_map(|line| runner.execute_line(line))
            .collect()
    }

    #[test]
    fn add_and_list_entries() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        run_script(
            &mut runner,
            &["doc Main", "spawn Env/Lamp Light", "add Env/Lamp"],
        );

        let listed = runner.execute_line("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].starts_with("[0] live"));
        assert!(listed[0].contains("<Light> [Env]← Lamp"));
        assert!(listed[0].contains("PATH:Main:Env/Lamp:"));
    }

    #[test]
    fn destroyed_node_is_reported_missing() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        run_script(&mut runner, &["spawn Lamp GameObject", "add Lamp"]);

        let output = runner.execute_line("delete Lamp");
        assert_eq!(output, vec!["destroyed Lamp", "1 entries lost their object"]);
        let listed = runner.execute_line("list");
        assert!(listed[0].starts_with("[0] missing <GameObject> Lamp"));
        assert_eq!(listed[1], "could not find 1 object");
    }

    #[test]
    fn grouped_listing_follows_store_groups_and_filter() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        run_script(
            &mut runner,
            &[
                "spawn Key Light",
                "spawn Main Camera",
                "spawn Fill Light",
                "add Key",
                "add Main",
                "add Fill",
                "group on",
            ],
        );

        let listed = runner.execute_line("list");
        assert_eq!(listed.len(), 5);
        assert_eq!(listed[0], "Camera:");
        assert!(listed[1].starts_with("  [1] live"));
        assert_eq!(listed[2], "Light:");
        assert!(listed[3].starts_with("  [0] live"));
        assert!(listed[4].starts_with("  [2] live"));

        runner.execute_line("filter Light");
        let filtered = runner.execute_line("list");
        assert_eq!(filtered[0], "Light:");
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn simulation_round_trip_restores_entries() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        run_script(
            &mut runner,
            &["spawn Rig/Camera Camera", "add Rig/Camera"],
        );

        let entering = runner.execute_line("simulate on");
        assert!(entering.contains(&"restored 1 entries (0 corrected)".to_string()));
        assert_eq!(
            runner.execute_line("simulate on"),
            vec!["simulation already on"]
        );
        let leaving = runner.execute_line("simulate off");
        assert!(leaving.contains(&"simulation off".to_string()));
        assert!(runner.execute_line("list")[0].starts_with("[0] live"));
    }

    #[test]
    fn parse_errors_are_printed_not_fatal() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        assert_eq!(
            runner.execute_line("remove"),
            vec!["error: expected exactly one argument <index>. usage: remove <index>"]
        );
        assert_eq!(
            runner.execute_line("remove 4"),
            vec!["error: reference index 4 is out of range for 0 entries"]
        );
    }

    #[test]
    fn snapshots_through_console() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        run_script(
            &mut runner,
            &[
                "asset assets/Surface.mat Material",
                "add asset:assets/Surface.mat",
                "snapshot save mats",
                "clear yes",
            ],
        );

        assert_eq!(runner.execute_line("snapshot list"), vec!["mats"]);
        let loaded = runner.execute_line("snapshot load mats");
        assert_eq!(loaded[0], "loaded snapshot 'mats'");
        assert_eq!(loaded[1], "reattach: 1 resolved, 0 corrected, 0 still missing");
        assert_eq!(
            runner.execute_line("snapshot delete mats"),
            vec!["deleted snapshot 'mats'"]
        );
    }

    #[test]
    fn run_loop_stops_on_quit_and_saves() {
        let temp = TempDir::new().expect("tempdir");
        let mut runner = runner(&temp);
        let script = "spawn Lamp GameObject\nadd Lamp\nquit\nlist\n";
        let mut output = Vec::new();

        runner.run(script.as_bytes(), &mut output).expect("run");

        let text = String::from_utf8(output).expect("utf8");
        assert!(runner.quit_requested());
        assert!(text.contains("bye"));
        assert!(!text.contains("[0] live"));
        assert!(ToolPaths::under_root(temp.path()).settings_file().is_file());
    }
}
