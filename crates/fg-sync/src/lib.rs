//! FocusGate Blocking Synchronizer
//!
//! Keeps the browser's blocking rules consistent with the configured sites
//! and the temporary unlock grants.
//!
//! ```text
//! sites / grants / wake-ups
//!            │
//!            ▼
//!   BlockingSynchronizer ──► translator (fg-core) ──► BlockingBackend
//!            │                                        ├─ DeclarativeBackend
//!            ▼                                        └─ InterceptionBackend
//!       UnlockStore ──► BrowserHost (session storage, wake-ups, tabs)
//! ```

pub mod backend;
pub mod error;
pub mod host;
pub mod memory;
pub mod synchronizer;
pub mod unlock;

pub use backend::{
    select_backend, BackendKind, BlockingBackend, DeclarativeBackend, InterceptDecision,
    InterceptionBackend,
};
pub use error::{HostError, SyncError};
pub use host::{BrowserHost, Clock, DeclarativeRuleApi, SiteSource, SystemClock, Tab, TabId};
pub use memory::{ManualClock, MemoryHost};
pub use synchronizer::{BlockingSynchronizer, GrantReceipt, RelockOutcome, SyncConfig, SyncReport};
pub use unlock::{UnlockGrant, UnlockStore, WakeUpOutcome, DEFAULT_GRANT_MINUTES};
