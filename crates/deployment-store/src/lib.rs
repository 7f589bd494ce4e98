//! Deployment Store
//!
//! Persists one record per successfully deployed service. Records are keyed
//! by service name and indexed by client id.
//!
//! **Backends:**
//! - `RedisStore`: production backend, atomic inserts via a Lua script
//! - `MemoryStore`: in-process backend for tests and mock mode

pub mod memory;
pub mod recorder;
pub mod redis_store;
pub mod store;

pub use memory::MemoryStore;
pub use recorder::DeploymentRecorder;
pub use redis_store::RedisStore;
pub use store::DeploymentStore;
