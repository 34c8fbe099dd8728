//! The `busrecv` transport plugin.
//!
//! Opening subscribes a filter on both bus scopes that forwards the key of
//! every `KeyAdded`, `KeyChanged` and `Commit` message into the store's
//! change sink. Deletions are not forwarded. Closing tears the filters down.
//!
//! With an I/O binding the received names are collected and handed to the
//! store once per tick, so a burst of messages about one key costs one
//! re-read.

use crate::batch::{flush_interval, Batch};
use crate::bus::{BusMessage, BusScope, FilterId, Signal, Transport};
use keystack_plugin_host::{names, ChangeSink, Contract, Export, IoBinding, Plugin, PluginError};
use keystack_types::{KeyName, KeySet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

pub const BUS_RECEIVE_PLUGIN: &str = "busrecv";

type Subscriptions = Arc<Mutex<Vec<(BusScope, FilterId)>>>;
type SharedSink = Arc<Mutex<Option<ChangeSink>>>;

pub struct BusReceive {
    transport: Arc<dyn Transport>,
    subscriptions: Subscriptions,
    sink: SharedSink,
    inbox: Arc<Batch<KeyName>>,
    interval: Duration,
}

impl BusReceive {
    pub fn new(transport: Arc<dyn Transport>, config: &KeySet) -> Self {
        let sink = SharedSink::default();
        let target = Arc::clone(&sink);
        let inbox = Batch::new(move |key: KeyName| {
            let target = target.lock().unwrap_or_else(PoisonError::into_inner);
            match target.as_ref() {
                Some(sink) => {
                    if !sink.notify(key.clone()) {
                        debug!(key = %key, "store gone, change dropped");
                    }
                }
                None => debug!(key = %key, "receiver closed, change dropped"),
            }
        });
        Self {
            transport,
            subscriptions: Arc::default(),
            sink,
            inbox: Arc::new(inbox),
            interval: flush_interval(config),
        }
    }

    pub fn is_listening(&self) -> bool {
        !self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Whether received names wait for a reactor tick.
    pub fn is_batching(&self) -> bool {
        self.inbox.is_attached()
    }
}

fn forwards(signal: Signal) -> bool {
    matches!(signal, Signal::KeyAdded | Signal::KeyChanged | Signal::Commit)
}

fn subscribe(
    transport: &dyn Transport,
    subscriptions: &Subscriptions,
    inbox: &Arc<Batch<KeyName>>,
) {
    let mut subscriptions = subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
    if !subscriptions.is_empty() {
        debug!("bus receiver already open");
        return;
    }
    for scope in BusScope::ALL {
        let inbox = Arc::clone(inbox);
        let filter = Arc::new(move |message: &BusMessage| {
            if forwards(message.signal) {
                inbox.push(message.key.clone());
            }
        });
        match transport.setup_receive_message(scope, filter) {
            Ok(id) => subscriptions.push((scope, id)),
            Err(e) => warn!(%scope, error = %e, "subscribing to bus failed"),
        }
    }
}

fn unsubscribe(transport: &dyn Transport, subscriptions: &Subscriptions) {
    let drained: Vec<(BusScope, FilterId)> = subscriptions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain(..)
        .collect();
    for (scope, id) in drained {
        if let Err(e) = transport.teardown_receive_message(scope, id) {
            warn!(%scope, error = %e, "unsubscribing from bus failed");
        }
    }
}

fn set_sink(sink: &SharedSink, value: Option<ChangeSink>) {
    *sink.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

impl Plugin for BusReceive {
    fn name(&self) -> &str {
        BUS_RECEIVE_PLUGIN
    }

    fn contract(&self) -> Contract {
        let open_transport = Arc::clone(&self.transport);
        let open_subscriptions = Arc::clone(&self.subscriptions);
        let open_sink = Arc::clone(&self.sink);
        let open_inbox = Arc::clone(&self.inbox);
        let close_transport = Arc::clone(&self.transport);
        let close_subscriptions = Arc::clone(&self.subscriptions);
        let close_sink = Arc::clone(&self.sink);
        let close_inbox = Arc::clone(&self.inbox);
        let bind_inbox = Arc::clone(&self.inbox);
        let interval = self.interval;

        Contract::builder(BUS_RECEIVE_PLUGIN)
            .placements("")
            .version(env!("CARGO_PKG_VERSION"))
            .description("Feeds changes announced on the message bus into a store")
            .export(
                names::OPEN_NOTIFICATION,
                Export::OpenNotification(Arc::new(move |sink: ChangeSink| {
                    set_sink(&open_sink, Some(sink));
                    subscribe(open_transport.as_ref(), &open_subscriptions, &open_inbox);
                })),
            )
            .export(
                names::CLOSE_NOTIFICATION,
                Export::CloseNotification(Arc::new(move || {
                    unsubscribe(close_transport.as_ref(), &close_subscriptions);
                    close_inbox.flush();
                    set_sink(&close_sink, None);
                })),
            )
            .export(
                names::SET_IO_BINDING,
                Export::SetIoBinding(Arc::new(move |binding: Arc<dyn IoBinding>| {
                    if let Err(e) = bind_inbox.attach(binding, interval) {
                        warn!(error = %e, "batching received changes failed, forwarding directly");
                    }
                })),
            )
            .build()
    }

    fn close(&mut self) -> Result<(), PluginError> {
        unsubscribe(self.transport.as_ref(), &self.subscriptions);
        self.inbox.detach();
        set_sink(&self.sink, None);
        Ok(())
    }
}
