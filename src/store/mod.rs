//! Durable, crash-resilient staging of capture chunks
//!
//! Chunks land here as they are produced; a session survives process
//! restarts until the remote commit succeeds and the entry is purged.

mod chunk_store;

pub use chunk_store::{DurableChunkStore, SessionMeta};
