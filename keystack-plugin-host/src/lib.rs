//! Plugin host for keystack.
//!
//! Holds the placement pipeline of a store: the fifteen fixed stages, the
//! single-occupant table per store, the `list` adapter that lets several
//! plugins share a stage, and the mount manager that places plugins at
//! runtime. Also hosts the store-side notification API, which talks to the
//! notification provider only through the provider's typed exports.

mod config;
mod contract;
mod error;
mod io;
mod list;
mod memory;
mod modules;
mod mount;
mod placement;
mod plugin;
mod store;
mod variable;

pub use config::{GlobalSection, MountSection, NotificationSection, StoreConfig};
pub use contract::{
    lookup, names, ChangeCallback, ChangeSink, Contract, ContractBuilder, DeferredCall, Export,
    ExportTable,
};
pub use error::{
    AdapterError, ConfigError, MountError, NotificationError, PluginError, StoreError,
    UnknownPlacement,
};
pub use io::{IoBinding, IoError, TimerCallback, TimerId, TimerOperation};
pub use list::{AdapterEntry, ListPlugin, Multiplexer, DEFAULT_LIST_PLACEMENTS, LIST_PLUGIN};
pub use memory::{MemoryBacking, MemoryStorage, MEMORY_PLUGIN};
pub use modules::{ModuleFactory, ModuleRegistry};
pub use mount::GlobalMounts;
pub use placement::{parse_placements, Phase, Placement};
pub use plugin::{Plugin, PluginHandle};
pub use store::Store;
pub use variable::{Variable, VariableSlot, Watch};
