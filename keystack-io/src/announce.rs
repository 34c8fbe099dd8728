//! The `announce` transport plugin.
//!
//! Mounted at `postgetstorage` it remembers what was read; mounted at
//! `postcommit` it compares the committed keys against that memory and
//! sends one signal per added, changed or deleted key. With
//! `user/announce = once` in its configuration it sends a single `Commit`
//! signal for the written parent instead.
//!
//! Once a store hands it an I/O binding, messages are queued and sent on a
//! timer every `user/flush/interval` milliseconds, a repeated message only
//! once per tick.

use crate::batch::{flush_interval, Batch};
use crate::bus::{BusMessage, BusScope, Signal, Transport};
use keystack_plugin_host::{names, Contract, Export, IoBinding, Placement, Plugin, PluginError};
use keystack_types::{Key, KeyName, KeySet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ANNOUNCE_PLUGIN: &str = "announce";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceMode {
    PerKey,
    Once,
}

impl AnnounceMode {
    fn from_config(config: &KeySet) -> Self {
        match config.resolve_str("user/announce").and_then(Key::string) {
            Some("once") => Self::Once,
            _ => Self::PerKey,
        }
    }
}

type Outbox = Batch<(BusScope, BusMessage)>;

pub struct Announce {
    outbox: Arc<Outbox>,
    interval: Duration,
    mode: AnnounceMode,
    last_seen: KeySet,
}

impl Announce {
    pub fn new(transport: Arc<dyn Transport>, config: &KeySet) -> Self {
        let outbox = Batch::new(move |(scope, message): (BusScope, BusMessage)| {
            if let Err(e) = transport.send_message(scope, &message) {
                warn!(
                    %scope,
                    signal = ?message.signal,
                    key = %message.key,
                    error = %e,
                    "announcing change failed"
                );
            }
        });
        Self {
            outbox: Arc::new(outbox),
            interval: flush_interval(config),
            mode: AnnounceMode::from_config(config),
            last_seen: KeySet::new(),
        }
    }

    pub fn mode(&self) -> AnnounceMode {
        self.mode
    }

    /// Whether messages wait for a reactor tick instead of going out on
    /// commit.
    pub fn is_batching(&self) -> bool {
        self.outbox.is_attached()
    }

    /// Replaces the remembered keys in scope of `parent` with those of
    /// `keys`.
    fn remember(&mut self, keys: &KeySet, parent: &KeyName) {
        self.last_seen.retain(|key| !key.name().is_in_scope_of(parent));
        self.last_seen.extend(
            keys.iter()
                .filter(|key| key.name().is_in_scope_of(parent))
                .cloned(),
        );
    }

    fn send(&self, scope: BusScope, signal: Signal, key: &KeyName) {
        self.outbox.push((scope, BusMessage::new(signal, key.clone())));
    }

    fn announce_each(&self, committed: &KeySet, parent: &KeyName) -> usize {
        let mut sent = 0;
        let mut signal_for = |signal: Signal, name: &KeyName| {
            if let Some(scope) = BusScope::for_key(name) {
                self.send(scope, signal, name);
                sent += 1;
            }
        };

        for key in committed.iter().filter(|k| k.name().is_in_scope_of(parent)) {
            match self.last_seen.lookup(key.name()) {
                None => signal_for(Signal::KeyAdded, key.name()),
                Some(previous) if previous != key => signal_for(Signal::KeyChanged, key.name()),
                Some(_) => {}
            }
        }
        for previous in self
            .last_seen
            .iter()
            .filter(|k| k.name().is_in_scope_of(parent))
            .filter(|k| !committed.contains(k.name()))
        {
            signal_for(Signal::KeyDeleted, previous.name());
        }
        sent
    }

    fn announce_once(&self, parent: &KeyName) -> usize {
        let scopes: Vec<BusScope> = if parent.is_cascading() {
            BusScope::ALL.to_vec()
        } else {
            BusScope::for_key(parent).into_iter().collect()
        };
        for scope in &scopes {
            self.send(*scope, Signal::Commit, parent);
        }
        scopes.len()
    }
}

impl Plugin for Announce {
    fn name(&self) -> &str {
        ANNOUNCE_PLUGIN
    }

    fn contract(&self) -> Contract {
        let outbox = Arc::clone(&self.outbox);
        let interval = self.interval;

        Contract::builder(ANNOUNCE_PLUGIN)
            .placements("postgetstorage postcommit")
            .version(env!("CARGO_PKG_VERSION"))
            .description("Announces committed changes on the message bus")
            .export(
                names::SET_IO_BINDING,
                Export::SetIoBinding(Arc::new(move |binding: Arc<dyn IoBinding>| {
                    if let Err(e) = outbox.attach(binding, interval) {
                        warn!(error = %e, "batching announcements failed, sending directly");
                    }
                })),
            )
            .build()
    }

    fn close(&mut self) -> Result<(), PluginError> {
        self.outbox.detach();
        Ok(())
    }

    fn get(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        if placement == Placement::PostGetStorage {
            self.remember(returned, parent);
        }
        Ok(())
    }

    fn set(
        &mut self,
        returned: &mut KeySet,
        parent: &KeyName,
        placement: Placement,
    ) -> Result<(), PluginError> {
        if placement != Placement::PostCommit {
            return Ok(());
        }
        let sent = match self.mode {
            AnnounceMode::PerKey => self.announce_each(returned, parent),
            AnnounceMode::Once => self.announce_once(parent),
        };
        debug!(parent = %parent, mode = ?self.mode, sent, "commit announced");
        self.remember(returned, parent);
        Ok(())
    }
}
