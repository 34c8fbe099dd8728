//! Two stores over one backing, connected by the in-process bus: one
//! writes with `announce` mounted, the other listens through `busrecv`.

use keystack_io::{
    install, BusMessage, BusScope, InProcessBus, Signal, TokioBinding, Transport, ANNOUNCE_PLUGIN,
    BUS_RECEIVE_PLUGIN,
};
use keystack_plugin_host::*;
use keystack_types::{Key, KeyName, KeySet};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn name(s: &str) -> KeyName {
    KeyName::parse(s).unwrap()
}

fn modules(backing: &MemoryBacking, bus: &InProcessBus) -> ModuleRegistry {
    let mut modules = ModuleRegistry::with_memory_backing(backing.clone());
    keystack_notification::install(&mut modules);
    install(&mut modules, Arc::new(bus.clone()));
    modules
}

fn writer(backing: &MemoryBacking, bus: &InProcessBus, announce_config: KeySet) -> Store {
    let mut store = Store::open(StoreConfig::default(), modules(backing, bus)).unwrap();
    store.mount_module(ANNOUNCE_PLUGIN, &announce_config).unwrap();
    store
}

fn watcher(backing: &MemoryBacking, bus: &InProcessBus) -> Store {
    let mut store = Store::open(StoreConfig::default(), modules(backing, bus)).unwrap();
    let receiver = store.modules().load(BUS_RECEIVE_PLUGIN, &KeySet::new()).unwrap();
    store.attach_transport(receiver);
    store.open_notifications().unwrap();
    store
}

fn recorder(bus: &InProcessBus, scope: BusScope) -> Arc<Mutex<Vec<(Signal, String)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.setup_receive_message(
        scope,
        Arc::new(move |message: &BusMessage| {
            sink.lock()
                .unwrap()
                .push((message.signal, message.key.to_string()));
        }),
    )
    .unwrap();
    seen
}

/// Moves paused time forward in small steps so timer tasks get to run.
async fn advance(total: Duration) {
    let step = Duration::from_millis(5);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::advance(step).await;
        tokio::task::yield_now().await;
        elapsed += step;
    }
}

fn write(store: &mut Store, parent: &str, keys: &[(&str, &str)]) {
    let mut ks: KeySet = keys
        .iter()
        .map(|(n, v)| Key::with_string(name(n), *v))
        .collect();
    store.set(&mut ks, &name(parent)).unwrap();
}

// ── Announce ──────────────────────────────────────────────────────

#[test]
fn announce_mounts_through_the_adapter() {
    let store = writer(&MemoryBacking::new(), &InProcessBus::new(), KeySet::new());
    let list = store.mounts().occupant(Placement::PostCommit).unwrap();
    let entries = list.lock().as_multiplexer().map(|m| m.entries()).unwrap();
    assert!(entries.iter().any(|e| e.name == ANNOUNCE_PLUGIN));
}

#[test]
fn announces_added_changed_and_deleted_keys() {
    let bus = InProcessBus::new();
    let seen = recorder(&bus, BusScope::Session);
    let mut store = writer(&MemoryBacking::new(), &bus, KeySet::new());

    write(&mut store, "user/sw/app", &[("user/sw/app/a", "1"), ("user/sw/app/b", "1")]);
    write(&mut store, "user/sw/app", &[("user/sw/app/a", "2"), ("user/sw/app/b", "1")]);
    write(&mut store, "user/sw/app", &[("user/sw/app/a", "2")]);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Signal::KeyAdded, "user/sw/app/a".to_string()),
            (Signal::KeyAdded, "user/sw/app/b".to_string()),
            (Signal::KeyChanged, "user/sw/app/a".to_string()),
            (Signal::KeyDeleted, "user/sw/app/b".to_string()),
        ]
    );
}

#[test]
fn read_keys_are_not_announced_as_added() {
    let bus = InProcessBus::new();
    let backing = MemoryBacking::new();
    let mut first = writer(&backing, &bus, KeySet::new());
    write(&mut first, "system/sw/app", &[("system/sw/app/a", "1")]);

    let seen = recorder(&bus, BusScope::System);
    let mut second = writer(&backing, &bus, KeySet::new());
    let mut ks = KeySet::new();
    second.get(&mut ks, &name("system/sw/app")).unwrap();
    ks.append(Key::with_string(name("system/sw/app/b"), "1"));
    second.set(&mut ks, &name("system/sw/app")).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Signal::KeyAdded, "system/sw/app/b".to_string())]
    );
}

#[test]
fn once_mode_sends_single_commit() {
    let bus = InProcessBus::new();
    let session = recorder(&bus, BusScope::Session);
    let system = recorder(&bus, BusScope::System);
    let config: KeySet = [Key::with_string(name("user/announce"), "once")]
        .into_iter()
        .collect();
    let mut store = writer(&MemoryBacking::new(), &bus, config);

    write(&mut store, "user/sw/app", &[("user/sw/app/a", "1"), ("user/sw/app/b", "1")]);
    assert_eq!(
        *session.lock().unwrap(),
        vec![(Signal::Commit, "user/sw/app".to_string())]
    );

    write(&mut store, "/sw/app", &[]);
    assert_eq!(session.lock().unwrap().len(), 2);
    assert_eq!(
        *system.lock().unwrap(),
        vec![(Signal::Commit, "/sw/app".to_string())]
    );
}

#[test]
fn failed_commit_announces_nothing() {
    let bus = InProcessBus::new();
    let seen = recorder(&bus, BusScope::Session);
    let mut modules = modules(&MemoryBacking::new(), &bus);
    modules.register("refuse", |_| Box::new(Refuse));
    let mut config = StoreConfig::default();
    config.global.plugins = vec!["memory".to_string(), "refuse".to_string()];
    let mut store = Store::open(config, modules).unwrap();
    store.mount_module(ANNOUNCE_PLUGIN, &KeySet::new()).unwrap();

    let mut ks: KeySet = [Key::with_string(name("user/a"), "1")].into_iter().collect();
    assert!(store.set(&mut ks, &name("user/a")).is_err());
    assert!(seen.lock().unwrap().is_empty());
}

struct Refuse;

impl Plugin for Refuse {
    fn name(&self) -> &str {
        "refuse"
    }

    fn contract(&self) -> Contract {
        Contract::builder("refuse").placements("presetstorage").build()
    }

    fn set(&mut self, _: &mut KeySet, _: &KeyName, placement: Placement) -> Result<(), PluginError> {
        Err(PluginError::new("refuse", format!("refusing {placement}")))
    }
}

// ── Receive ───────────────────────────────────────────────────────

#[test]
fn receiver_subscribes_on_open_and_leaves_on_close() {
    let bus = InProcessBus::new();
    let mut store = watcher(&MemoryBacking::new(), &bus);
    assert_eq!(bus.filter_count(BusScope::Session), 1);
    assert_eq!(bus.filter_count(BusScope::System), 1);

    store.close_notifications().unwrap();
    assert_eq!(bus.filter_count(BusScope::Session), 0);
    assert_eq!(bus.filter_count(BusScope::System), 0);
}

#[test]
fn closing_store_unsubscribes() {
    let bus = InProcessBus::new();
    let mut store = watcher(&MemoryBacking::new(), &bus);
    store.close().unwrap();
    assert_eq!(bus.filter_count(BusScope::Session), 0);
}

#[test]
fn dropping_open_store_unsubscribes() {
    let bus = InProcessBus::new();
    let store = watcher(&MemoryBacking::new(), &bus);
    assert_eq!(bus.filter_count(BusScope::Session), 1);

    drop(store);
    assert_eq!(bus.filter_count(BusScope::Session), 0);
    assert_eq!(bus.filter_count(BusScope::System), 0);
}

#[test]
fn deletions_are_not_forwarded() {
    let bus = InProcessBus::new();
    let mut store = watcher(&MemoryBacking::new(), &bus);
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    store
        .register_callback(&name("user/sw/app/a"), move |_| *counter.lock().unwrap() += 1)
        .unwrap();

    bus.send_message(
        BusScope::Session,
        &BusMessage::new(Signal::KeyDeleted, name("user/sw/app/a")),
    )
    .unwrap();
    assert_eq!(store.dispatch_pending_changes().unwrap(), 0);
}

// ── I/O binding ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn bound_announce_sends_on_the_next_tick() {
    let bus = InProcessBus::new();
    let seen = recorder(&bus, BusScope::Session);
    let mut store = writer(&MemoryBacking::new(), &bus, KeySet::new());
    let binding = Arc::new(TokioBinding::current().unwrap());
    store.set_io_binding(binding.clone());

    write(&mut store, "user/sw/app", &[("user/sw/app/a", "1")]);
    assert!(seen.lock().unwrap().is_empty());

    advance(Duration::from_millis(20)).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Signal::KeyAdded, "user/sw/app/a".to_string())]
    );

    store.close().unwrap();
    binding.cleanup();
}

#[tokio::test(start_paused = true)]
async fn binding_reaches_announce_mounted_later() {
    let bus = InProcessBus::new();
    let seen = recorder(&bus, BusScope::Session);
    let mut store = Store::open(
        StoreConfig::default(),
        modules(&MemoryBacking::new(), &bus),
    )
    .unwrap();
    let binding = Arc::new(TokioBinding::current().unwrap());
    store.set_io_binding(binding.clone());
    assert_eq!(binding.timer_count(), 0);

    store.mount_module(ANNOUNCE_PLUGIN, &KeySet::new()).unwrap();
    assert_eq!(binding.timer_count(), 1);

    write(&mut store, "user/sw/app", &[("user/sw/app/a", "1")]);
    assert!(seen.lock().unwrap().is_empty());
    advance(Duration::from_millis(20)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    store.close().unwrap();
    assert_eq!(binding.timer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn bound_receiver_collapses_repeated_changes() {
    let bus = InProcessBus::new();
    let mut store = watcher(&MemoryBacking::new(), &bus);
    let binding = Arc::new(TokioBinding::current().unwrap());
    store.set_io_binding(binding.clone());
    assert_eq!(binding.timer_count(), 1);
    store.register_callback(&name("user/sw/app/a"), |_| {}).unwrap();

    let changed = BusMessage::new(Signal::KeyChanged, name("user/sw/app/a"));
    for _ in 0..3 {
        bus.send_message(BusScope::Session, &changed).unwrap();
    }
    assert_eq!(store.dispatch_pending_changes().unwrap(), 0);

    advance(Duration::from_millis(20)).await;
    assert_eq!(store.dispatch_pending_changes().unwrap(), 1);

    binding.cleanup();
}

#[test]
fn unbound_receiver_forwards_every_change() {
    let bus = InProcessBus::new();
    let mut store = watcher(&MemoryBacking::new(), &bus);
    store.register_callback(&name("user/sw/app/a"), |_| {}).unwrap();

    let changed = BusMessage::new(Signal::KeyChanged, name("user/sw/app/a"));
    for _ in 0..3 {
        bus.send_message(BusScope::Session, &changed).unwrap();
    }
    assert_eq!(store.dispatch_pending_changes().unwrap(), 3);
}

// ── End to end ────────────────────────────────────────────────────

#[test]
fn write_in_one_store_updates_variable_in_another() {
    let bus = InProcessBus::new();
    let backing = MemoryBacking::new();
    let mut source = writer(&backing, &bus, KeySet::new());
    let mut target = watcher(&backing, &bus);

    let value = Variable::new(0_i32);
    target.register_variable(&name("user/sw/app/value"), &value).unwrap();

    write(&mut source, "user/sw/app/value", &[("user/sw/app/value", "42")]);
    assert_eq!(value.get(), 0);

    assert_eq!(target.dispatch_pending_changes().unwrap(), 1);
    assert_eq!(value.get(), 42);
}

#[test]
fn commit_signal_rereads_parent_once() {
    let bus = InProcessBus::new();
    let backing = MemoryBacking::new();
    let config: KeySet = [Key::with_string(name("user/announce"), "once")]
        .into_iter()
        .collect();
    let mut source = writer(&backing, &bus, config);
    let mut target = watcher(&backing, &bus);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    target
        .register_callback(&name("user/sw/app/b"), move |key: &Key| {
            sink.lock().unwrap().push(key.string().unwrap_or_default().to_string());
        })
        .unwrap();

    write(&mut source, "user/sw/app", &[("user/sw/app/a", "1"), ("user/sw/app/b", "2")]);
    assert_eq!(target.dispatch_pending_changes().unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["2".to_string()]);
}

#[test]
fn unrelated_changes_cause_no_reread() {
    let bus = InProcessBus::new();
    let backing = MemoryBacking::new();
    let mut source = writer(&backing, &bus, KeySet::new());
    let mut target = watcher(&backing, &bus);

    let value = Variable::new(0_i64);
    target.register_variable(&name("user/sw/app/value"), &value).unwrap();

    write(&mut source, "user/sw/other", &[("user/sw/other/value", "7")]);
    assert_eq!(target.dispatch_pending_changes().unwrap(), 0);
    assert_eq!(value.get(), 0);
}
