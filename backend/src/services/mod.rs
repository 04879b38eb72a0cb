pub mod auth;
pub mod housekeeping;

pub use auth::{AuthOutcome, AuthPolicy, AuthService, SessionTokens};
