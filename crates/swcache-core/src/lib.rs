//! swcache core logic
//!
//! This crate provides the request interception layer: classification,
//! caching strategies, eviction, page notifications and the worker lifecycle.

pub mod broadcast;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod resource;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use broadcast::{BroadcastMessage, Broadcaster, ClientId, EventType};
pub use cache::{EvictionPolicy, SweepReport};
pub use classifier::{Classifier, Route};
pub use config::{PartitionLimits, WorkerConfig};
pub use error::CoreError;
pub use lifecycle::{BroadcasterHooks, LifecycleManager, RuntimeHooks, WorkerState};
pub use message::{ControlMessage, MessageReply, PartitionInfo, PrefetchSummary};
pub use resource::{ResourceClass, Strategy};
pub use strategy::{ResponseSource, ServedResponse, StrategyEngine};
pub use worker::{FetchOutcome, Worker, spawn_sweep_task};
