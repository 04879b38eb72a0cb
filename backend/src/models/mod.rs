pub mod account;
pub mod session;
pub mod wire;

pub use account::{normalize_email, Account, NewAccount};
pub use session::{ClientMeta, NewSessionRecord, SessionRecord};
