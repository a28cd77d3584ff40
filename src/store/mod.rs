//! Persistence layer.
//!
//! `backend` is the raw key/value + set + list contract (Redis in
//! production, in-memory for tests); `gateway` is the typed CRUD surface
//! the market engine consumes.

pub mod backend;
pub mod gateway;

pub use backend::{KvBackend, MemoryBackend, RedisBackend};
pub use gateway::MarketStore;
