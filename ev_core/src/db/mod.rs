//! Persistence: connection pooling, retries, health and the batch writer.

pub mod health;
pub mod pool;
pub mod retry;
pub mod writer;

pub use pool::{create_pool, DbPoolConfig};
pub use writer::{BatchStatus, BatchWriteReport, BetStore};
