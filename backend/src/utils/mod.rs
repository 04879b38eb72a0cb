pub mod clock;
pub mod jwt;
pub mod password;

pub use clock::{Clock, ManualClock, SystemClock};
pub use jwt::{hash_refresh_token, TokenCodec, TokenError, TokenSettings};
pub use password::{check_strength, HashParams, PasswordError, PasswordHasher, PasswordRule};
