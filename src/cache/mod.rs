//! Cache Module
//!
//! The caching engine: key derivation, expiry reconciliation, the stored
//! envelope, stampede locks, repository groups and the `CacheStore` facade
//! tying them together.

mod codec;
mod expiry;
mod guard;
mod key;
mod record;
mod repository;
mod store;
mod trace;


// Re-export public types
pub use codec::{Decoded, EncodedRecord, SubRecord, ValueCodec};
pub use expiry::{reconcile, Expiry, ExpiryPolicy};
pub use guard::{Contention, LockRecord, StampedeGuard, WaitOutcome};
pub use key::{derive_key, CacheCall, CacheKey, KeyGenerator, Operation, SUB_KEY_PREFIX};
pub use record::{CacheRecord, Payload};
pub use repository::{retry_until, Attempt, RepositoryIndex};
pub use store::{CacheStore, StoreOptions};
pub use trace::{
    LogTraceSink, MemoryTraceSink, Stopwatch, TraceEvent, TraceOperation, TraceSink,
};
