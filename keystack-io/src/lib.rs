//! Reactor binding and notification transports.
//!
//! [`IoBinding`] is the event-loop seam a transport may schedule work on;
//! [`TokioBinding`] implements it on a tokio runtime. [`Transport`] is the
//! message-bus seam; [`InProcessBus`] connects the stores of one process.
//! The `announce` and `busrecv` plugins sit on either end of a bus and
//! batch their traffic on the store's binding once one is set.

mod announce;
mod batch;
mod binding;
mod bus;
mod receive;

pub use announce::{Announce, AnnounceMode, ANNOUNCE_PLUGIN};
pub use batch::{flush_interval, Batch, DEFAULT_FLUSH_INTERVAL};
pub use binding::TokioBinding;
pub use bus::{
    BusMessage, BusScope, FilterId, InProcessBus, MessageFilter, Signal, Transport, TransportError,
};
pub use keystack_plugin_host::{IoBinding, IoError, TimerCallback, TimerId, TimerOperation};
pub use receive::{BusReceive, BUS_RECEIVE_PLUGIN};

use keystack_plugin_host::ModuleRegistry;
use std::sync::Arc;

/// Registers `announce` and `busrecv` over `transport`.
pub fn install(modules: &mut ModuleRegistry, transport: Arc<dyn Transport>) {
    let announce_transport = Arc::clone(&transport);
    modules.register(ANNOUNCE_PLUGIN, move |config| {
        Box::new(Announce::new(Arc::clone(&announce_transport), config))
    });
    modules.register(BUS_RECEIVE_PLUGIN, move |config| {
        Box::new(BusReceive::new(Arc::clone(&transport), config))
    });
}
