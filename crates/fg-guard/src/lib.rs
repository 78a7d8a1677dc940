//! FocusGate Agent Guard
//!
//! Turns the companion status server's view of AI-agent activity into a
//! live "is this unlock still valid?" signal.
//!
//! - `state`: Guard outcomes, settings and status payloads
//! - `check`: One bounded HTTP check of the status endpoint
//! - `transport`: Streaming status connection (WebSocket)
//! - `session`: The watcher state machine, free of timers and sockets
//! - `watcher`: Tokio driver running a session against real timers

pub mod check;
pub mod error;
pub mod session;
pub mod state;
pub mod transport;
pub mod watcher;

pub use check::{GuardCheck, StatusSource};
pub use error::GuardError;
pub use session::{Action, Backoff, Phase, Trigger, WatcherSession};
pub use state::{GuardReason, GuardSettings, GuardState, StatusPayload};
pub use transport::{StreamConnector, StreamReceiver, StreamSender, WsConnector, PING_MESSAGE};
pub use watcher::GuardWatcher;
