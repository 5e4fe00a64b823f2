//! Cross-node memory synchronization
//!
//! [`DistributedMemoryManager`] keeps a node's local store authoritative
//! while replicating every mutation through an append-only event log.
//! [`ConflictResolver`] decides how concurrent versions of the same memory
//! merge; the default policy is a field-wise join that converges regardless
//! of delivery order.

pub mod manager;
pub mod resolver;

pub use manager::{DistributedMemoryManager, MemorySnapshot};
pub use resolver::{
    compare_clocks, merge_clocks, merge_entities, merge_metadata, merge_tags, ClockOrdering,
    ConflictPolicy, ConflictResolver, CustomResolverFn,
};
