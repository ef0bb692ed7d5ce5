//! Delivery side of the pipeline.
//!
//! One [`SinkWriter`] per destination type consumes a bounded queue of
//! deliveries and writes protobuf-encoded values into that destination's
//! key-value store.

pub mod codec;
pub mod memcache;
pub mod writer;

use std::sync::Arc;

use crate::record::Record;
use crate::stats::DeliveryTracker;

pub use memcache::{MemcacheStore, Store, StoreRef};
pub use writer::{SinkWriter, WriterConfig, WriterStats};

/// One record in flight to a destination, carrying the handle that lets the
/// consuming writer report resolution back to the file's worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record: Record,
    pub tracker: Arc<DeliveryTracker>,
}
