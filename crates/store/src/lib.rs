#![deny(unused)]
//! Persistence implementations for Modelflow.
//!
//! In-memory stores back tests and single-process deployments; the Redis
//! implementations provide durable executions and cross-process event
//! fan-out. The persistent store is the system of record; in-memory caches
//! elsewhere repopulate lazily from here.

pub mod memory;
pub mod redis;
pub mod vector;

pub use memory::{
    InMemoryEventBus, InMemoryExecutionStore, InMemoryRuleSetStore, InMemoryUsageStore,
};
pub use redis::{RedisEventPublisher, RedisExecutionStore};
pub use vector::SimpleVectorStore;
