//! Credential pool for the generation API
//!
//! Holds a fixed set of API keys, tracks the health of each one in a persisted
//! status store, throttles every outbound request through one dispatcher, and
//! rotates to a different key when a request fails on quota.
//!
//! Credential lifecycle:
//! 1. Keys are loaded from config at startup; a key with no status record is `active`
//! 2. `KeyPool::execute` picks an available key round-robin and dispatches the request
//! 3. Quota failure with a daily marker → `daily_limited` until the next reset time
//! 4. Other quota failure → `quota_exhausted`, or `permanently_blocked` once the
//!    failure count reaches the block threshold
//! 5. Reset time passes → the availability check reactivates the key
//! 6. Operator reset → record removed, key back to implicit `active`

pub mod availability;
pub mod clock;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod persistence;
pub mod pool;
pub mod quota;
pub mod rotation;
pub mod status;
pub mod store;

pub use credential::Credential;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use persistence::{JsonFilePersistence, MemoryPersistence, Persistence, StatusMap};
pub use pool::{CredentialStatusView, KeyPool, PoolStats};
pub use quota::{FailureKind, classify_failure};
pub use rotation::RotationPolicy;
pub use status::{CredentialState, CredentialStatus};
pub use store::StatusStore;
