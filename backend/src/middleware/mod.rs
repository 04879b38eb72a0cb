pub mod auth;
pub mod client_meta;

pub use auth::{auth, authenticate, parse_bearer_token, AuthIdentity};
