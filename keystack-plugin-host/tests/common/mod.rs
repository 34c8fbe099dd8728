//! Test plugins shared by the integration tests.

#![allow(dead_code)]

use keystack_plugin_host::*;
use keystack_types::{Key, KeyName, KeySet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn name(s: &str) -> KeyName {
    KeyName::parse(s).unwrap()
}

pub fn list_handle() -> PluginHandle {
    PluginHandle::new(Box::new(ListPlugin::new(KeySet::new())))
}

pub fn adapter_entries(handle: &PluginHandle) -> Vec<AdapterEntry> {
    handle
        .lock()
        .as_multiplexer()
        .map(|adapter| adapter.entries())
        .unwrap_or_default()
}

/// Records every pipeline call as `<name>:<placement>`.
pub struct Recorder {
    name: String,
    placements: Option<String>,
    log: CallLog,
    fail_at: Option<Placement>,
}

impl Recorder {
    pub fn new(name: &str, placements: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            placements: Some(placements.to_string()),
            log,
            fail_at: None,
        }
    }

    pub fn unplaced(name: &str) -> Self {
        Self {
            name: name.to_string(),
            placements: None,
            log: log(),
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, placement: Placement) -> Self {
        self.fail_at = Some(placement);
        self
    }

    pub fn handle(self) -> PluginHandle {
        PluginHandle::new(Box::new(self))
    }

    fn record(&self, placement: Placement) -> Result<(), PluginError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, placement));
        if self.fail_at == Some(placement) {
            return Err(PluginError::new(&self.name, format!("refusing {placement}")));
        }
        Ok(())
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> Contract {
        let builder = Contract::builder(&self.name);
        match &self.placements {
            Some(placements) => builder.placements(placements.clone()).build(),
            None => builder.build(),
        }
    }

    fn get(&mut self, _: &mut KeySet, _: &KeyName, placement: Placement) -> Result<(), PluginError> {
        self.record(placement)
    }

    fn set(&mut self, _: &mut KeySet, _: &KeyName, placement: Placement) -> Result<(), PluginError> {
        self.record(placement)
    }

    fn error(&mut self, _: &mut KeySet, _: &KeyName, placement: Placement) -> Result<(), PluginError> {
        self.record(placement)
    }
}

/// Minimal notification provider: callbacks fire on every post-get pass,
/// changes below `user/app` match.
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub refreshes: Arc<AtomicUsize>,
    callbacks: Arc<Mutex<Vec<(KeyName, ChangeCallback)>>>,
}

pub const FAKE_PROVIDER: &str = "fakeprovider";

impl Plugin for FakeProvider {
    fn name(&self) -> &str {
        FAKE_PROVIDER
    }

    fn contract(&self) -> Contract {
        let callbacks = Arc::clone(&self.callbacks);
        Contract::builder(FAKE_PROVIDER)
            .placements("postgetstorage")
            .export(
                names::REGISTER_CALLBACK,
                Export::RegisterCallback(Arc::new(move |path: KeyName, callback: ChangeCallback| {
                    let mut callbacks = callbacks.lock().unwrap();
                    callbacks.push((path, callback));
                    keystack_types::RegistrationId::first()
                }),
            ))
            .export(
                names::MATCHES_CHANGE,
                Export::ChangeFilter(Arc::new(|changed: &KeyName| {
                    changed.is_below_or_same(&KeyName::parse("user/app").unwrap())
                })),
            )
            .build()
    }

    fn get(
        &mut self,
        returned: &mut KeySet,
        _: &KeyName,
        _: Placement,
    ) -> Result<(), PluginError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.lock().unwrap();
        for (path, callback) in callbacks.iter_mut() {
            if let Some(key) = returned.resolve(path) {
                callback(key);
            }
        }
        Ok(())
    }
}

/// Transport that keeps the sink it is opened with.
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub sink: Arc<Mutex<Option<ChangeSink>>>,
    pub closed: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn push(&self, changed: &str) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.notify(name(changed)),
            None => false,
        }
    }
}

impl Plugin for FakeTransport {
    fn name(&self) -> &str {
        "faketransport"
    }

    fn contract(&self) -> Contract {
        let sink = Arc::clone(&self.sink);
        let closed = Arc::clone(&self.closed);
        Contract::builder("faketransport")
            .export(
                names::OPEN_NOTIFICATION,
                Export::OpenNotification(Arc::new(move |change_sink: ChangeSink| {
                    *sink.lock().unwrap() = Some(change_sink);
                })),
            )
            .export(
                names::CLOSE_NOTIFICATION,
                Export::CloseNotification(Arc::new(move || closed.store(true, Ordering::SeqCst))),
            )
            .build()
    }
}

pub fn string_key(n: &str, value: &str) -> Key {
    Key::with_string(name(n), value)
}

/// Binding that accepts timers and never runs them.
#[derive(Default)]
pub struct NullBinding {
    next: AtomicUsize,
}

impl IoBinding for NullBinding {
    fn add_timer(&self, _: TimerOperation) -> Result<TimerId, IoError> {
        Ok(TimerId::new(self.next.fetch_add(1, Ordering::SeqCst) as u64))
    }

    fn update_timer(&self, _: TimerId, _: TimerOperation) -> Result<(), IoError> {
        Ok(())
    }

    fn remove_timer(&self, _: TimerId) -> Result<(), IoError> {
        Ok(())
    }

    fn cleanup(&self) {}
}

/// Counts `setIoBinding` calls and `close` calls.
pub struct Bindable {
    name: String,
    placements: String,
    pub bound: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl Bindable {
    pub fn new(name: &str, placements: &str, bound: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.to_string(),
            placements: placements.to_string(),
            bound,
            closed: Arc::default(),
        }
    }

    pub fn closing_into(mut self, closed: Arc<AtomicUsize>) -> Self {
        self.closed = closed;
        self
    }

    pub fn handle(self) -> PluginHandle {
        PluginHandle::new(Box::new(self))
    }
}

impl Plugin for Bindable {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> Contract {
        let bound = Arc::clone(&self.bound);
        Contract::builder(&self.name)
            .placements(self.placements.clone())
            .export(
                names::SET_IO_BINDING,
                Export::SetIoBinding(Arc::new(move |_: Arc<dyn IoBinding>| {
                    bound.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .build()
    }

    fn close(&mut self) -> Result<(), PluginError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
