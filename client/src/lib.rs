//! Client-side session handling for the sessionkeeper API.
//!
//! [`SessionClient`] holds the current credential pair, refreshes it ahead of
//! expiry, coalesces concurrent refreshes into one network call, and retries
//! a rejected request exactly once after refreshing.

pub mod api;
pub mod clock;
pub mod error;
pub mod session;
pub mod storage;

pub use api::{AuthTransport, HttpTransport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ClientError;
pub use session::{SessionClient, SessionConfig, SessionState};
pub use storage::{CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore};
