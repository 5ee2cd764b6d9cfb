//! Message bus implementations for cross-process room coordination.
//!
//! The contract (`roomcast_core::bus::MessageBus`) is pub/sub channels plus
//! a shared key/value store for full-sync snapshots. `RedisBus` is the
//! production implementation; `MemoryBus` backs tests and single-process
//! deployments.

pub mod memory_bus;
pub mod redis_bus;

pub use memory_bus::{MemoryBus, MemoryBusCore};
pub use redis_bus::RedisBus;
