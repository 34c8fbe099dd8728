//! End-to-end tests: stores with the internalnotification provider.

use keystack_notification::{install, INTERNAL_NOTIFICATION};
use keystack_plugin_host::*;
use keystack_types::{Key, KeyName, KeySet};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn name(s: &str) -> KeyName {
    KeyName::parse(s).unwrap()
}

/// Counts read passes.
#[derive(Clone, Default)]
struct ReadCounter(Arc<AtomicUsize>);

impl Plugin for ReadCounter {
    fn name(&self) -> &str {
        "readcounter"
    }

    fn contract(&self) -> Contract {
        Contract::builder("readcounter")
            .placements("getresolver")
            .build()
    }

    fn get(&mut self, _: &mut KeySet, _: &KeyName, _: Placement) -> Result<(), PluginError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn modules(backing: &MemoryBacking, reads: &ReadCounter) -> ModuleRegistry {
    let mut modules = ModuleRegistry::with_memory_backing(backing.clone());
    install(&mut modules);
    let reads = reads.clone();
    modules.register("readcounter", move |_| Box::new(reads.clone()));
    modules
}

fn open(backing: &MemoryBacking, reads: &ReadCounter, config: StoreConfig) -> Store {
    let mut config = config;
    config.global.plugins = vec!["memory".to_string(), "readcounter".to_string()];
    let mut store = Store::open(config, modules(backing, reads)).unwrap();
    store.open_notifications().unwrap();
    store
}

fn write(store: &mut Store, key: Key) {
    let parent = key.name().clone();
    let mut ks: KeySet = [key].into_iter().collect();
    store.set(&mut ks, &parent).unwrap();
}

// ── Lifecycle ─────────────────────────────────────────────────────

#[test]
fn provider_mounts_through_the_adapter() {
    let store = open(&MemoryBacking::new(), &ReadCounter::default(), StoreConfig::default());
    let list = store.mounts().occupant(Placement::PostGetStorage).unwrap();
    assert_eq!(list.name(), LIST_PLUGIN);

    let entries = list.lock().as_multiplexer().map(|m| m.entries()).unwrap();
    let provider: Vec<(&str, Placement)> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.placement))
        .collect();
    assert_eq!(
        provider,
        vec![
            (INTERNAL_NOTIFICATION, Placement::PostGetStorage),
            (INTERNAL_NOTIFICATION, Placement::PostCommit),
        ]
    );
}

#[test]
fn closing_notifications_removes_provider_from_adapter() {
    let mut store = open(&MemoryBacking::new(), &ReadCounter::default(), StoreConfig::default());
    store.close_notifications().unwrap();

    let list = store.mounts().occupant(Placement::PostGetStorage).unwrap();
    let entries = list.lock().as_multiplexer().map(|m| m.entries()).unwrap();
    assert!(entries.is_empty());
}

// ── Variables ─────────────────────────────────────────────────────

#[test]
fn variable_follows_own_commits() {
    let mut store = open(&MemoryBacking::new(), &ReadCounter::default(), StoreConfig::default());
    let x = Variable::new(0_i32);
    store.register_variable(&name("/app/value"), &x).unwrap();

    write(&mut store, Key::with_string(name("user/app/value"), "42"));
    assert_eq!(x.get(), 42);

    write(&mut store, Key::with_string(name("user/app/value"), "43"));
    assert_eq!(x.get(), 43);
}

#[test]
fn floating_point_variables_are_supported() {
    let mut store = open(&MemoryBacking::new(), &ReadCounter::default(), StoreConfig::default());
    let ratio = Variable::new(0.0_f64);
    store.register_variable(&name("/app/ratio"), &ratio).unwrap();

    write(&mut store, Key::with_string(name("system/app/ratio"), "0.75"));

    assert_eq!(ratio.get(), 0.75);
}

#[test]
fn unregister_stops_updates() {
    let mut store = open(&MemoryBacking::new(), &ReadCounter::default(), StoreConfig::default());
    let x = Variable::new(0_i32);
    let id = store.register_variable(&name("/app/value"), &x).unwrap();

    assert!(store.unregister(id).unwrap());
    write(&mut store, Key::with_string(name("user/app/value"), "42"));

    assert_eq!(x.get(), 0);
}

// ── External changes ──────────────────────────────────────────────

#[test]
fn external_change_rereads_once_and_updates_watcher() {
    let backing = MemoryBacking::new();
    let reads = ReadCounter::default();
    let mut writer = open(&backing, &ReadCounter::default(), StoreConfig::default());
    let mut watcher = open(&backing, &reads, StoreConfig::default());

    let x = Variable::new(0_i32);
    watcher.register_variable(&name("/app/value"), &x).unwrap();
    watcher
        .register_callback(&name("user/other/value"), |_| {})
        .unwrap();

    write(&mut writer, Key::with_string(name("user/app/value"), "42"));
    assert_eq!(x.get(), 0);

    assert!(watcher.on_external_change(&name("/app/value")).unwrap());
    assert_eq!(reads.0.load(Ordering::SeqCst), 1);
    assert_eq!(x.get(), 42);
}

#[test]
fn unrelated_external_change_does_not_reread() {
    let reads = ReadCounter::default();
    let mut watcher = open(&MemoryBacking::new(), &reads, StoreConfig::default());
    watcher
        .register_callback(&name("/app/value"), |_| {})
        .unwrap();

    assert!(!watcher.on_external_change(&name("user/unrelated")).unwrap());
    assert_eq!(reads.0.load(Ordering::SeqCst), 0);
}

#[test]
fn queued_changes_are_dispatched_on_the_caller_thread() {
    let backing = MemoryBacking::new();
    let mut writer = open(&backing, &ReadCounter::default(), StoreConfig::default());
    let mut watcher = open(&backing, &ReadCounter::default(), StoreConfig::default());
    let x = Variable::new(0_i64);
    watcher.register_variable(&name("/app/value"), &x).unwrap();

    write(&mut writer, Key::with_string(name("user/app/value"), "9000000000"));
    let sink = watcher.change_sink();
    std::thread::spawn(move || sink.notify(name("user/app/value")))
        .join()
        .unwrap();

    assert_eq!(watcher.dispatch_pending_changes().unwrap(), 1);
    assert_eq!(x.get(), 9_000_000_000);
}

// ── Binary detection ──────────────────────────────────────────────

fn binary_callback_count(compare_binary: bool) -> usize {
    let mut config = StoreConfig::default();
    config.notification.compare_binary = compare_binary;
    let mut store = open(&MemoryBacking::new(), &ReadCounter::default(), config);

    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    store
        .register_callback(&name("/app/blob"), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    write(&mut store, Key::with_binary(name("user/app/blob"), vec![1, 2, 3]));
    store.get(&mut KeySet::new(), &name("user/app/blob")).unwrap();
    count.load(Ordering::SeqCst)
}

#[test]
fn binary_values_are_conservative_by_default() {
    assert_eq!(binary_callback_count(false), 2);
}

#[test]
fn binary_comparison_is_configurable() {
    assert_eq!(binary_callback_count(true), 1);
}
