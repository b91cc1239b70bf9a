use std::fs;

use tempfile::TempDir;

use super::*;
use crate::host::memory::NODE_TYPE_TAG;
use crate::host::{AssetRepository, EntityId, MemoryWorld, SceneGraph};
use crate::identity::{decode, decode_optional, encode, extract_local_name, EntityIdentity};
use crate::identity::{Confidence, Resolver, Strategy};
use crate::store::{AddOutcome, EntryState};

fn open_session(temp: &TempDir, world: &MemoryWorld) -> ReferenceBoxSession {
    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    let report = session.handle(LifecycleEvent::WindowOpened, world);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    session
}

fn add(session: &mut ReferenceBoxSession, world: &MemoryWorld, entity: EntityId) -> usize {
    match session.store_mut(world).add(world, entity).expect("add") {
        AddOutcome::Added { index } => index,
        other => panic!("expected a new entry, got {other:?}"),
    }
}

/// Saves, lets the host rebuild its runtime state, and reloads.
fn reload(session: &mut ReferenceBoxSession, world: &mut MemoryWorld) -> LifecycleReport {
    let before = session.handle(LifecycleEvent::AboutToReload, world);
    assert!(before.saved_to.is_some());
    world.restart_session();
    session.handle(LifecycleEvent::Reloaded, world)
}

#[test]
fn round_trip_resolves_every_live_entity() {
    let mut world = MemoryWorld::new();
    world.save_document_as("Levels/Main");
    let mut live = vec![
        world.spawn_path("Env", NODE_TYPE_TAG).expect("env"),
        world.spawn_path("Env/Lights/Key", "Light").expect("key"),
        world.spawn_path("Env/Lights/Fill", "Light").expect("fill"),
        world.spawn_path("Props/Crate", NODE_TYPE_TAG).expect("crate"),
        world.spawn_path("Props/Crate", NODE_TYPE_TAG).expect("crate twin"),
        world.spawn_path("odd:name", NODE_TYPE_TAG).expect("colon"),
    ];
    world.import_asset("assets/Materials/SurfaceA.mat", "Material");
    live.push(
        world
            .load_at_path("assets/Materials/SurfaceA.mat")
            .expect("asset"),
    );

    let resolver = Resolver::new(&world);
    for entity in live {
        let identity = decode(&encode(&world, entity));
        let resolution = resolver.resolve(&identity).expect("resolved");
        assert_eq!(resolution.entity, entity, "{identity}");
        assert_eq!(resolution.confidence(), Confidence::High, "{identity}");
    }
}

#[test]
fn add_twice_keeps_one_live_entry() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);

    add(&mut session, &world, lamp);
    let second = session.store_mut(&world).add(&world, lamp).expect("add");

    assert_eq!(second, AddOutcome::AlreadyPresent { index: 0 });
    let store = session.store(&world);
    assert_eq!(store.len(), 1);
    assert_eq!(store.entries()[0].live_handle(), Some(lamp));
}

#[test]
fn removing_any_index_preserves_relative_order() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let names = ["A", "B", "C", "D", "E"];
    let ids = names
        .iter()
        .map(|name| world.spawn_path(name, NODE_TYPE_TAG).expect("node"))
        .collect::<Vec<_>>();
    let mut session = open_session(&temp, &world);
    for id in &ids {
        add(&mut session, &world, *id);
    }

    for removed in 0..names.len() {
        let store = session.store_mut(&world);
        store.clear().expect("clear");
        for id in &ids {
            store.add(&world, *id).expect("re-add");
        }
        store.remove(removed).expect("remove");

        let expected = names
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != removed)
            .map(|(_, name)| name.to_string())
            .collect::<Vec<_>>();
        let actual = store
            .entries()
            .iter()
            .map(|entry| entry.local_name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
        assert_eq!(store.len(), names.len() - 1);
    }
}

#[test]
fn reattach_is_monotonic_and_keeps_frozen_labels() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let kept = world.spawn_path("Kept", NODE_TYPE_TAG).expect("kept");
    let doomed = world.spawn_path("Doomed", "Light").expect("doomed");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, kept);
    add(&mut session, &world, doomed);

    world.destroy(doomed);
    let report = reload(&mut session, &mut world);
    assert_eq!(report.reattach.expect("reattach").still_unresolved, 1);

    let store = session.store_mut(&world);
    let resolved_before = store.resolved_count();
    for _ in 0..3 {
        store.reattach(&world).expect("reattach");
        assert!(store.resolved_count() >= resolved_before);
        assert_eq!(store.entries()[1].display_name(), "<Light> Doomed");
        assert_eq!(store.entries()[1].state(), EntryState::Unresolved);
    }
}

#[test]
fn malformed_identity_strings_decode_to_null() {
    for raw in ["", "garbage:::", "   ", "PATH:", "ROOT:doc", "ASSET:", "INSTANCE:abc"] {
        assert!(decode(raw).is_null(), "{raw:?}");
    }
    assert!(decode_optional(None).is_null());
    assert!(matches!(
        decode("INSTANCE:17"),
        EntityIdentity::SessionTransient { .. }
    ));
}

#[test]
fn scenario_a_asset_survives_process_reload() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let guid = world.import_asset("assets/Materials/G1.mat", "Material");
    let asset = world.load_at_path("assets/Materials/G1.mat").expect("asset");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, asset);
    session.handle(LifecycleEvent::WindowClosed, &world);
    drop(session);

    world.restart_session();
    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    let report = session.handle(LifecycleEvent::WindowOpened, &world);

    let reattach = report.reattach.expect("reattach");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(reattach.identity_corrected, 0);
    let entry = &session.store(&world).entries()[0];
    assert_eq!(entry.identity(), &EntityIdentity::ContentAddressed { guid });
    assert_eq!(
        entry.live_handle(),
        world.load_at_path("assets/Materials/G1.mat")
    );
    let resolution = Resolver::new(&world)
        .resolve(entry.identity())
        .expect("resolved");
    assert_eq!(resolution.strategy, Strategy::ContentAddressed);
    assert_eq!(resolution.confidence(), Confidence::High);
}

#[test]
fn scenario_a_deleted_asset_has_no_fuzzy_fallback() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    world.import_asset("assets/Lamp.mat", "Material");
    let asset = world.load_at_path("assets/Lamp.mat").expect("asset");
    world.spawn_path("Lamp", "Material").expect("same-named node");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, asset);

    world.delete_asset("assets/Lamp.mat");
    let report = reload(&mut session, &mut world);

    assert_eq!(report.reattach.expect("reattach").still_unresolved, 1);
    assert_eq!(report.warnings, vec!["could not find 1 object".to_string()]);
}

#[test]
fn scenario_b_rename_is_found_by_instance_id_and_healed() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, lamp);
    let recorded = session.store(&world).entries()[0].identity().clone();

    world.rename(lamp, "Lamp_01");
    let resolution = Resolver::new(&world).resolve(&recorded).expect("resolved");
    assert_eq!(resolution.strategy, Strategy::InstanceId);
    assert_eq!(resolution.confidence(), Confidence::Medium);
    assert!(resolution.is_drift());

    // same process: instance ids stay valid across the editor reload
    session.handle(LifecycleEvent::AboutToReload, &world);
    let report = session.handle(LifecycleEvent::Reloaded, &world);
    let reattach = report.reattach.expect("reattach");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(reattach.identity_corrected, 1);

    let entry = &session.store(&world).entries()[0];
    assert_eq!(entry.live_handle(), Some(lamp));
    assert_eq!(entry.identity().local_name(), Some("Lamp_01"));
    assert_eq!(entry.display_name(), "<GameObject> Lamp_01");

    let saved = fs::read_to_string(ToolPaths::under_root(temp.path()).session_file())
        .expect("session file");
    assert!(saved.contains("Lamp_01"));
}

#[test]
fn scenario_c_new_node_at_same_path_is_an_accepted_false_positive() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, lamp);
    world.rename(lamp, "Lamp_01");
    session.handle(LifecycleEvent::AboutToReload, &world);
    session.handle(LifecycleEvent::Reloaded, &world);

    world.destroy(lamp);
    let impostor = world.spawn_path("Lamp_01", NODE_TYPE_TAG).expect("impostor");
    session.handle(LifecycleEvent::AboutToReload, &world);
    let report = session.handle(LifecycleEvent::Reloaded, &world);

    let reattach = report.reattach.expect("reattach");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(reattach.identity_corrected, 0);
    let entry = &session.store(&world).entries()[0];
    assert_eq!(entry.live_handle(), Some(impostor));
    let resolution = Resolver::new(&world)
        .resolve(entry.identity())
        .expect("resolved");
    assert_eq!(resolution.strategy, Strategy::ExactPath);
}

#[test]
fn scenario_d_unfindable_entry_stays_visible_with_frozen_label() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    world.save_document_as("Main");
    let ghost = world.spawn_path("Rig/Ghost", "Light").expect("ghost");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, ghost);
    session.handle(LifecycleEvent::WindowClosed, &world);

    world.destroy(ghost);
    world.restart_session();
    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    let report = session.handle(LifecycleEvent::WindowOpened, &world);
    assert_eq!(report.warnings, vec!["could not find 1 object".to_string()]);

    // a second save/load cycle must not lose or relabel the placeholder
    session.handle(LifecycleEvent::WindowClosed, &world);
    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    let store = session.store(&world);
    assert_eq!(store.len(), 1);
    let entry = &store.entries()[0];
    assert!(!entry.is_resolved());
    assert_eq!(entry.display_name(), "<Light> [Rig]← Ghost");
    assert_eq!(entry.type_tag(), "Light");
    assert_eq!(store.unresolved_count(), 1);
}

#[test]
fn scenario_e_local_name_extraction() {
    assert_eq!(extract_local_name("<GameObject> [Root]← Lamp_01"), "Lamp_01");
    assert_eq!(extract_local_name("<Material> SurfaceA"), "SurfaceA");
}

#[test]
fn moved_node_is_recovered_by_name_after_restart() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    world.save_document_as("Main");
    let key = world.spawn_path("Env/Lights/Key", "Light").expect("key");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, key);

    world.reparent(key, None);
    let report = reload(&mut session, &mut world);

    let reattach = report.reattach.expect("reattach");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(reattach.identity_corrected, 1);
    let entry = &session.store(&world).entries()[0];
    assert_eq!(entry.identity().structural_path(), Some("Key"));
    assert_eq!(entry.identity().document_key(), Some("Main"));
}

#[test]
fn restart_keeps_exact_path_despite_stale_instance_id() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let crate_node = world.spawn_path("Props/Crate", NODE_TYPE_TAG).expect("crate");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, crate_node);

    let report = reload(&mut session, &mut world);
    let reattach = report.reattach.expect("reattach");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(reattach.identity_corrected, 0);
    assert_eq!(
        session.store(&world).entries()[0].live_handle(),
        world.find_by_path("Props/Crate")
    );
}

#[test]
fn new_process_ignores_instance_ids_recorded_by_the_last_one() {
    let temp = TempDir::new().expect("tempdir");
    let mut first_world = MemoryWorld::new();
    let original = first_world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &first_world);
    add(&mut session, &first_world, original);
    let stale = session.store(&first_world).entries()[0]
        .identity()
        .session_instance_id()
        .expect("instance hint");
    session.handle(LifecycleEvent::WindowClosed, &first_world);
    drop(session);

    // the next process hands the old instance id to an unrelated node
    let mut world = MemoryWorld::new();
    let decoy = world.spawn_path("Decoy", NODE_TYPE_TAG).expect("decoy");
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    assert_eq!(world.instance_id(decoy), Some(stale));

    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    let report = session.handle(LifecycleEvent::WindowOpened, &world);
    let reattach = report.reattach.expect("reattach");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(reattach.identity_corrected, 0);

    let entry = &session.store(&world).entries()[0];
    assert_eq!(entry.live_handle(), Some(lamp));
    assert_eq!(entry.identity().local_name(), Some("Lamp"));
    assert_eq!(entry.identity().session_instance_id(), None);
    let saved = fs::read_to_string(ToolPaths::under_root(temp.path()).session_file())
        .expect("session file");
    assert!(!saved.contains("Decoy"));
}

#[test]
fn unreadable_session_file_survives_the_next_auto_save() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let paths = ToolPaths::under_root(temp.path());
    fs::create_dir_all(&paths.cache_dir).expect("cache dir");
    let newer = serde_json::json!({
        "format_version": 2,
        "entries": [{ "identity": "ROOT:Main:Precious:", "typeTag": "GameObject" }]
    })
    .to_string();
    fs::write(paths.session_file(), &newer).expect("newer session");

    let mut session = ReferenceBoxSession::open(paths.clone());
    let report = session.handle(LifecycleEvent::WindowOpened, &world);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("format 2"));
    add(&mut session, &world, lamp);

    let kept = fs::read_to_string(paths.cache_dir.join("session.json.corrupt"))
        .expect("set-aside copy");
    assert!(kept.contains("Precious"));
    let current = fs::read_to_string(paths.session_file()).expect("session");
    assert!(current.contains("\"Lamp\""));
}

#[test]
fn lifecycle_loads_once_per_reload_cycle() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);
    assert!(session.is_ready());
    add(&mut session, &world, lamp);

    let again = session.handle(LifecycleEvent::WindowOpened, &world);
    assert!(again.loaded.is_none());
    assert!(again.reattach.is_none());
    let reloaded = session.handle(LifecycleEvent::Reloaded, &world);
    assert!(reloaded.reattach.is_none());

    let entering = session.handle(LifecycleEvent::EnteringSimulation, &world);
    assert!(entering.saved_to.is_some());
    assert!(!session.is_ready());
    let after = session.handle(LifecycleEvent::Reloaded, &world);
    assert_eq!(after.reattach.expect("reattach").newly_resolved, 1);
    assert!(session.is_ready());
}

#[test]
fn store_access_triggers_pending_load() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, lamp);
    drop(session);

    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    assert!(!session.is_ready());
    assert_eq!(session.store(&world).entries()[0].live_handle(), Some(lamp));
    assert!(session.is_ready());
}

#[test]
fn pending_session_does_not_overwrite_saved_list() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, lamp);
    drop(session);

    let mut idle = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    let report = idle.handle(LifecycleEvent::EnteringSimulation, &world);
    assert!(report.saved_to.is_none());

    let mut session = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    assert_eq!(session.store(&world).len(), 1);
}

#[test]
fn corrupt_session_file_is_reported_and_set_aside() {
    let temp = TempDir::new().expect("tempdir");
    let world = MemoryWorld::new();
    let paths = ToolPaths::under_root(temp.path());
    fs::create_dir_all(&paths.cache_dir).expect("cache dir");
    fs::write(paths.session_file(), "{ not json").expect("corrupt");

    let mut session = ReferenceBoxSession::open(paths.clone());
    let report = session.handle(LifecycleEvent::WindowOpened, &world);

    assert_eq!(report.warnings.len(), 1);
    assert!(report.loaded.is_none());
    assert!(session.store(&world).is_empty());
    assert!(paths.cache_dir.join("session.json.corrupt").is_file());
}

#[test]
fn window_close_persists_settings() {
    let temp = TempDir::new().expect("tempdir");
    let world = MemoryWorld::new();
    let mut session = open_session(&temp, &world);
    session.settings_mut().reference_box.group_by_type = true;
    session.settings_mut().window.height = 900;

    let report = session.handle(LifecycleEvent::WindowClosed, &world);
    assert!(report.settings_saved);

    let reopened = ReferenceBoxSession::open(ToolPaths::under_root(temp.path()));
    assert!(reopened.settings().reference_box.group_by_type);
    assert_eq!(reopened.settings().window.height, 900);
}

#[test]
fn type_filter_limits_visible_entries() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let mut session = open_session(&temp, &world);
    for (path, tag) in [("A", "Light"), ("B", "Camera"), ("C", "Light")] {
        let id = world.spawn_path(path, tag).expect("node");
        add(&mut session, &world, id);
    }

    session.settings_mut().reference_box.type_filter = Some("Light".to_string());
    let visible = session
        .visible_entries(&world)
        .into_iter()
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    assert_eq!(visible, vec![0, 2]);
}

#[test]
fn snapshot_round_trip_through_session() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    let key = world.spawn_path("Key", "Light").expect("key");
    let fill = world.spawn_path("Fill", "Light").expect("fill");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, key);
    session.save_snapshot("lights", &world).expect("save snapshot");
    add(&mut session, &world, fill);

    let reattach = session.load_snapshot("lights", &world).expect("load snapshot");
    assert_eq!(reattach.newly_resolved, 1);
    assert_eq!(session.store(&world).len(), 1);
    assert_eq!(
        session.settings().reference_box.last_snapshot.as_deref(),
        Some("lights")
    );
    assert!(matches!(
        session.load_snapshot("missing", &world),
        Err(SessionError::Storage(StorageError::SnapshotMissing { .. }))
    ));
}

#[test]
fn other_document_entries_stay_unresolved_until_reopened() {
    let temp = TempDir::new().expect("tempdir");
    let mut world = MemoryWorld::new();
    world.save_document_as("Main");
    let lamp = world.spawn_path("Lamp", NODE_TYPE_TAG).expect("lamp");
    let mut session = open_session(&temp, &world);
    add(&mut session, &world, lamp);

    session.handle(LifecycleEvent::AboutToReload, &world);
    world.open_document(Some("Other"));
    world.spawn_path("Lamp", NODE_TYPE_TAG).expect("other lamp");
    let report = session.handle(LifecycleEvent::Reloaded, &world);
    assert_eq!(report.reattach.expect("reattach").still_unresolved, 1);

    world.open_document(Some("Main"));
    let again = session.store_mut(&world).reattach(&world).expect("reattach");
    assert_eq!(again.newly_resolved, 1);
    assert_eq!(session.store(&world).entries()[0].live_handle(), Some(lamp));
    assert_eq!(world.root_entities_of(Some("Main")), vec![lamp]);
}
