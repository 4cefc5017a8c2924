//! Stormpipe Channel
//!
//! Channel primitives and wiring for stormpipe runs: bounded streaming
//! channels, the run workspace, the allocator that materializes every
//! edge before any stage launches, the fan-out replicator and the fan-in
//! bridge.

mod allocator;
mod bridge;
mod channel;
mod error;
mod replicator;
mod workspace;

pub use allocator::{
  AllocatedRun, ChannelAllocator, ConsumerEnd, Endpoints, ProducerEnd, ReplicatorParts,
};
pub use bridge::{AggregatorBridge, BridgeInput};
pub use channel::{ChannelClosed, ChannelReader, ChannelWriter, DEFAULT_CAPACITY, bounded};
pub use error::{AllocationError, BridgeError};
pub use replicator::{ReplicationReport, Replicator};
pub use workspace::Workspace;
