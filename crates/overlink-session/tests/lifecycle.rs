//! Multi-handle session scenarios.

use std::time::{Duration, Instant};

use overlink_core::{LinkFlags, LinkRule, MappingTable, SessionParameters};
use overlink_session::{
    ControllerOptions, InterceptionClient, SessionError, SessionStatus, VfsController, liveness,
};
use overlink_test::{TempRuntime, TestTree, init_test_logging, unique_instance};

#[test]
fn duplicate_create_fails_and_keeps_mapping() {
    init_test_logging();
    let runtime = TempRuntime::new();
    let tree = TestTree::new();
    let controller = VfsController::from_config(&runtime.config());
    let params = unique_instance("dup");

    let mut owner = controller.create(&params).unwrap();
    let mut table = MappingTable::new();
    let rule = LinkRule::file(tree.file("real.txt", "x"), tree.path("virt.txt"), LinkFlags::empty());
    table.link(rule.unwrap()).unwrap();
    let generation = owner.set_mapping(table.clone()).unwrap();

    let res = controller.create(&params);
    assert!(matches!(res, Err(SessionError::AlreadyExists { .. })));

    let snapshot = owner.mapping().unwrap();
    assert_eq!(snapshot.generation, generation);
    assert_eq!(snapshot.table, table);
}

#[test]
fn owner_disconnect_keeps_session_for_peer() {
    init_test_logging();
    let runtime = TempRuntime::new();
    let controller = VfsController::from_config(&runtime.config());
    let params = unique_instance("handoff");

    let mut owner = controller.create(&params).unwrap();
    let peer = controller.connect(&params).unwrap();
    assert_eq!(peer.status(), SessionStatus::Connected);
    assert_eq!(owner.handles().unwrap().len(), 2);

    let me = liveness::current_pid();
    peer.register_process(me).unwrap();

    owner.disconnect().unwrap();

    assert!(peer.channel().instance_dir().exists());
    let pids = peer.query_process_list().unwrap();
    assert_eq!(pids.value(), &vec![me]);
    assert!(!pids.is_truncated());
    assert_eq!(peer.handles().unwrap().len(), 1);

    // A third party can still attach.
    let late = controller.connect(&params).unwrap();
    assert_eq!(late.query_instance_name().unwrap().value(), params.instance_name());
}

#[test]
fn prefixed_instance_does_not_share_process_set() {
    init_test_logging();
    let runtime = TempRuntime::new();
    let controller = VfsController::from_config(&runtime.config());
    let foo = SessionParameters::named("foo").unwrap();

    let owner = controller.create(&foo).unwrap();
    let me = liveness::current_pid();
    owner.register_process(me).unwrap();

    for name in ["inv_foo", "foo.procs", "foo.map"] {
        let other = SessionParameters::named(name).unwrap();
        let mut neighbour = controller.create(&other).unwrap();
        assert!(neighbour.query_process_list().unwrap().value().is_empty());
        neighbour.disconnect().unwrap();
        assert!(!controller.is_live(&other).unwrap());
    }

    assert_eq!(owner.query_process_list().unwrap().value(), &vec![me]);
    assert!(owner.channel().instance_dir().exists());
    assert_eq!(owner.query_instance_name().unwrap().value(), "foo");
}

#[test]
fn names_differing_past_sixty_characters_are_distinct() {
    let runtime = TempRuntime::new();
    let controller = VfsController::from_config(&runtime.config());
    let stem = "a".repeat(60);
    let first = SessionParameters::named(format!("{stem}1")).unwrap();
    let second = SessionParameters::named(format!("{stem}2")).unwrap();

    let owner = controller.create(&first).unwrap();
    owner.register_process(liveness::current_pid()).unwrap();
    let peer = controller.create(&second).unwrap();

    assert!(peer.query_process_list().unwrap().value().is_empty());
    assert_eq!(
        peer.query_instance_name().unwrap().value(),
        second.instance_name()
    );
    assert_eq!(owner.query_process_list().unwrap().value().len(), 1);
}

#[test]
fn failed_publish_keeps_the_watcher() {
    let runtime = TempRuntime::new();
    let tree = TestTree::new();
    let mut options = ControllerOptions::from_config(&runtime.config());
    options.lock_timeout = Duration::from_millis(200);
    let controller = VfsController::new(options);
    let params = unique_instance("held");
    let mut owner = controller.create(&params).unwrap();

    let source = tree.populate("modA", &["a.txt"]);
    let mut table = MappingTable::new();
    table
        .link(
            LinkRule::directory(&source, tree.path("game"), LinkFlags::MONITOR_CHANGES).unwrap(),
        )
        .unwrap();
    let generation = owner.set_mapping(table.clone()).unwrap();
    assert!(owner.is_watching());

    let held = owner.channel().lock().unwrap();
    let res = owner.set_mapping(MappingTable::new());
    assert!(matches!(res, Err(SessionError::LockTimeout { .. })));
    assert!(owner.is_watching());
    drop(held);

    let snapshot = owner.mapping().unwrap();
    assert_eq!(snapshot.generation, generation);
    assert_eq!(snapshot.table, table);
}

#[test]
fn session_outlives_handles_while_processes_run() {
    let runtime = TempRuntime::new();
    let controller = VfsController::from_config(&runtime.config());
    let params = unique_instance("orphan");

    let mut owner = controller.create(&params).unwrap();
    owner.register_process(liveness::current_pid()).unwrap();
    owner.disconnect().unwrap();

    assert!(controller.is_live(&params).unwrap());
    assert!(matches!(
        controller.create(&params),
        Err(SessionError::AlreadyExists { .. })
    ));

    let mut peer = controller.connect(&params).unwrap();
    assert!(peer.unregister_process(liveness::current_pid()).unwrap());
    peer.disconnect().unwrap();
    assert!(!controller.is_live(&params).unwrap());
}

#[cfg(unix)]
#[test]
fn process_list_is_capped() {
    let runtime = TempRuntime::new();
    let mut config = runtime.config();
    config.session.process_list_capacity = 1;
    let controller = VfsController::from_config(&config);
    let params = unique_instance("capped");

    let owner = controller.create(&params).unwrap();
    let parent = std::os::unix::process::parent_id();
    owner.register_process(liveness::current_pid()).unwrap();
    owner.register_process(parent).unwrap();

    let pids = owner.query_process_list().unwrap();
    assert_eq!(pids.value().len(), 1);
    assert_eq!(pids.available(), 2);
    assert!(pids.is_truncated());
}

#[test]
fn readers_never_observe_torn_snapshots() {
    const VERSIONS: usize = 40;

    let runtime = TempRuntime::new();
    let tree = TestTree::new();
    let controller = VfsController::from_config(&runtime.config());
    let params = unique_instance("stress");
    let mut owner = controller.create(&params).unwrap();

    // Version k holds k file rules.
    let mut versions = vec![MappingTable::new()];
    for k in 1..=VERSIONS {
        let mut table = versions[k - 1].clone();
        table
            .link(
                LinkRule::file(
                    tree.path(&format!("real/{k}.dat")),
                    tree.path(&format!("virt/{k}.dat")),
                    LinkFlags::empty(),
                )
                .unwrap(),
            )
            .unwrap();
        versions.push(table);
    }

    let runtime_dir = runtime.path().to_path_buf();
    let reader_params = params.clone();
    let expected = versions.clone();
    let reader = std::thread::spawn(move || {
        let mut client = InterceptionClient::open(&runtime_dir, &reader_params).unwrap();
        let mut seen = 0usize;
        loop {
            client.refresh().unwrap();
            let generation = usize::try_from(client.generation().unwrap()).unwrap();
            assert_eq!(client.table(), &expected[generation]);
            seen += 1;
            if generation == VERSIONS {
                return seen;
            }
        }
    });

    for table in versions.into_iter().skip(1) {
        owner.set_mapping(table).unwrap();
    }

    let seen = reader.join().unwrap();
    assert!(seen > 0);
}

#[test]
fn client_registers_children_and_follows_generations() {
    let runtime = TempRuntime::new();
    let tree = TestTree::new();
    let controller = VfsController::from_config(&runtime.config());
    let params = unique_instance("client");
    let mut owner = controller.create(&params).unwrap();

    let mut client = InterceptionClient::open(runtime.path(), &params).unwrap();
    assert_eq!(client.generation(), Some(0));
    assert!(!client.refresh().unwrap());

    let real = tree.file("mods/a.txt", "a");
    let mut table = MappingTable::new();
    table
        .link(LinkRule::file(&real, tree.path("game/a.txt"), LinkFlags::empty()).unwrap())
        .unwrap();
    owner.set_mapping(table).unwrap();

    assert!(client.refresh().unwrap());
    assert_eq!(client.generation(), Some(1));
    assert_eq!(client.resolve(&tree.path("game/a.txt")), Some(real));

    client.register(liveness::current_pid()).unwrap();
    assert_eq!(
        owner.query_process_list().unwrap().into_value(),
        vec![liveness::current_pid()]
    );
    assert!(client.unregister(liveness::current_pid()).unwrap());
}

#[test]
fn monitored_source_changes_are_republished() {
    init_test_logging();
    let runtime = TempRuntime::new();
    let tree = TestTree::new();
    let controller = VfsController::from_config(&runtime.config());
    let params = unique_instance("watch");
    let mut owner = controller.create(&params).unwrap();

    let source = tree.populate("modA", &["a.txt"]);
    let target = tree.path("game/data");
    let mut table = MappingTable::new();
    table
        .link(
            LinkRule::directory(
                &source,
                &target,
                LinkFlags::RECURSIVE | LinkFlags::MONITOR_CHANGES,
            )
            .unwrap(),
        )
        .unwrap();
    owner.set_mapping(table).unwrap();
    assert!(owner.is_watching());

    // Before the change only the directory itself covers b.txt.
    let mut client = InterceptionClient::open(runtime.path(), &params).unwrap();
    let virtual_b = target.join("b.txt");
    assert!(client.table().entry(&virtual_b).is_none());

    tree.file("modA/b.txt", "b");

    let deadline = Instant::now() + Duration::from_secs(10);
    while client.table().entry(&virtual_b).is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
        client.refresh().unwrap();
    }
    let entry = client.table().entry(&virtual_b).unwrap();
    assert_eq!(entry.real_path(), source.join("b.txt"));
    assert!(!entry.is_explicit());
    assert!(client.generation().unwrap() >= 2);
}
