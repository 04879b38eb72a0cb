pub mod id;

pub use id::{AccountId, SessionId};
