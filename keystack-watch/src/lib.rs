//! Two store handles over one backing: a writer with `announce` mounted
//! and a watcher listening through `busrecv`, its registrations refreshed
//! from a reactor timer. Both stores get the same binding, so bus traffic
//! is batched on its timers as well.

use anyhow::{anyhow, Context, Result};
use keystack_io::{
    IoBinding, InProcessBus, TimerId, TimerOperation, ANNOUNCE_PLUGIN, BUS_RECEIVE_PLUGIN,
};
use keystack_plugin_host::{MemoryBacking, ModuleRegistry, Store, StoreConfig, Variable};
use keystack_types::{Key, KeyName, KeySet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_WATCHED_KEY: &str = "user/sw/keystack/watch/value";

/// A `key=value` pair given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: KeyName,
    pub value: String,
}

impl FromStr for Assignment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got {s:?}"))?;
        let name = KeyName::parse(name.trim()).with_context(|| format!("bad key name in {s:?}"))?;
        if name.is_cascading() {
            return Err(anyhow!("cannot write cascading key {name}"));
        }
        Ok(Self {
            name,
            value: value.to_string(),
        })
    }
}

fn lock(store: &Mutex<Store>) -> std::sync::MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Demo {
    writer: Store,
    watcher: Arc<Mutex<Store>>,
    value: Variable<i64>,
    callbacks: Arc<AtomicUsize>,
}

impl Demo {
    pub fn open(config: &StoreConfig, watched: &KeyName) -> Result<Self> {
        let backing = MemoryBacking::new();
        let bus = InProcessBus::new();
        let mut modules = ModuleRegistry::with_memory_backing(backing);
        keystack_notification::install(&mut modules);
        keystack_io::install(&mut modules, Arc::new(bus));

        let mut writer =
            Store::open(config.clone(), modules.clone()).context("opening writer store")?;
        writer
            .mount_module(ANNOUNCE_PLUGIN, &KeySet::new())
            .context("mounting announce")?;

        let mut watcher = Store::open(config.clone(), modules).context("opening watcher store")?;
        let receiver = watcher
            .modules()
            .load(BUS_RECEIVE_PLUGIN, &KeySet::new())
            .context("loading bus receiver")?;
        watcher.attach_transport(receiver);
        watcher.open_notifications().context("opening notifications")?;

        let value = Variable::new(0_i64);
        watcher.register_variable(watched, &value)?;

        let callbacks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&callbacks);
        watcher.register_callback(watched, move |key: &Key| {
            counter.fetch_add(1, Ordering::SeqCst);
            info!(key = %key.name(), value = key.string().unwrap_or("<binary>"), "watched key changed");
        })?;

        info!(key = %watched, "watching");
        Ok(Self {
            writer,
            watcher: Arc::new(Mutex::new(watcher)),
            value,
            callbacks,
        })
    }

    /// Writes one key through the writer store.
    pub fn write(&mut self, assignment: &Assignment) -> Result<()> {
        let mut keys = KeySet::new();
        let parent = assignment.name.clone();
        self.writer.get(&mut keys, &parent)?;
        keys.append(Key::with_string(parent.clone(), assignment.value.clone()));
        self.writer
            .set(&mut keys, &parent)
            .with_context(|| format!("writing {parent}"))?;
        info!(key = %parent, value = %assignment.value, "written");
        Ok(())
    }

    /// Drains the watcher's pending changes now.
    pub fn dispatch(&self) -> Result<usize> {
        Ok(lock(&self.watcher).dispatch_pending_changes()?)
    }

    /// Hands `binding` to both stores and drains the watcher's pending
    /// changes every `interval`.
    pub fn watch(&mut self, binding: Arc<dyn IoBinding>, interval: Duration) -> Result<TimerId> {
        self.writer.set_io_binding(Arc::clone(&binding));
        lock(&self.watcher).set_io_binding(Arc::clone(&binding));

        let watcher = Arc::clone(&self.watcher);
        let value = self.value.clone();
        let timer = TimerOperation::new(interval, move || {
            match lock(&watcher).dispatch_pending_changes() {
                Ok(0) => {}
                Ok(rereads) => info!(rereads, value = value.get(), "watcher refreshed"),
                Err(e) => warn!(error = %e, "dispatching changes failed"),
            }
        });
        Ok(binding.add_timer(timer)?)
    }

    /// Current value of the watched variable.
    pub fn value(&self) -> i64 {
        self.value.get()
    }

    /// Number of callback invocations so far.
    pub fn callback_count(&self) -> usize {
        self.callbacks.load(Ordering::SeqCst)
    }

    pub fn close(mut self) -> Result<()> {
        lock(&self.watcher).close().context("closing watcher store")?;
        self.writer.close().context("closing writer store")?;
        Ok(())
    }
}
