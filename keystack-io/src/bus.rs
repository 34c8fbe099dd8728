//! Transport contract and an in-process message bus.
//!
//! Messages travel as JSON frames:
//!
//! ```json
//! {"signal":"KeyChanged","key":"user/sw/app/value"}
//! ```

use keystack_types::{KeyName, Namespace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no filter {id} on the {scope} bus")]
    UnknownFilter { scope: BusScope, id: FilterId },
}

/// Which bus a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusScope {
    System,
    Session,
}

impl BusScope {
    pub const ALL: [BusScope; 2] = [BusScope::System, BusScope::Session];

    /// `user` keys go to the session bus, `system` keys to the system bus.
    /// Other namespaces are not announced.
    pub fn for_key(name: &KeyName) -> Option<Self> {
        match name.namespace() {
            Namespace::User => Some(Self::Session),
            Namespace::System => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for BusScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Session => f.write_str("session"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    KeyAdded,
    KeyChanged,
    KeyDeleted,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub signal: Signal,
    pub key: KeyName,
}

impl BusMessage {
    pub fn new(signal: Signal, key: KeyName) -> Self {
        Self { signal, key }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, TransportError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Receives every message delivered on the scope it was set up for.
pub type MessageFilter = Arc<dyn Fn(&BusMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message bus a transport plugin can send on and listen to.
pub trait Transport: Send + Sync {
    fn send_message(&self, scope: BusScope, message: &BusMessage) -> Result<(), TransportError>;

    fn setup_receive_message(
        &self,
        scope: BusScope,
        filter: MessageFilter,
    ) -> Result<FilterId, TransportError>;

    fn teardown_receive_message(&self, scope: BusScope, id: FilterId) -> Result<(), TransportError>;
}

/// Bus connecting the stores of one process. Clones share the same bus.
#[derive(Clone, Default)]
pub struct InProcessBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    filters: Mutex<HashMap<BusScope, Vec<(FilterId, MessageFilter)>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn filters(&self) -> MutexGuard<'_, HashMap<BusScope, Vec<(FilterId, MessageFilter)>>> {
        self.inner
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn filter_count(&self, scope: BusScope) -> usize {
        self.filters().get(&scope).map_or(0, Vec::len)
    }

    /// Decodes a raw frame and hands it to every filter on `scope`.
    /// Malformed frames are dropped with a warning. Returns the number of
    /// filters invoked.
    pub fn deliver_frame(&self, scope: BusScope, frame: &[u8]) -> usize {
        let message = match BusMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(%scope, error = %e, "dropping malformed bus frame");
                return 0;
            }
        };

        // Filters may set up or tear down filters themselves.
        let filters: Vec<MessageFilter> = self
            .filters()
            .get(&scope)
            .map(|list| list.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();

        for filter in &filters {
            filter(&message);
        }
        debug!(%scope, signal = ?message.signal, key = %message.key, receivers = filters.len(), "bus message delivered");
        filters.len()
    }
}

impl Transport for InProcessBus {
    fn send_message(&self, scope: BusScope, message: &BusMessage) -> Result<(), TransportError> {
        let frame = message.encode()?;
        self.deliver_frame(scope, &frame);
        Ok(())
    }

    fn setup_receive_message(
        &self,
        scope: BusScope,
        filter: MessageFilter,
    ) -> Result<FilterId, TransportError> {
        let id = FilterId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.filters().entry(scope).or_default().push((id, filter));
        debug!(%scope, filter = %id, "receive filter set up");
        Ok(id)
    }

    fn teardown_receive_message(&self, scope: BusScope, id: FilterId) -> Result<(), TransportError> {
        let mut filters = self.filters();
        let list = filters.entry(scope).or_default();
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        if list.len() == before {
            return Err(TransportError::UnknownFilter { scope, id });
        }
        debug!(%scope, filter = %id, "receive filter torn down");
        Ok(())
    }
}
