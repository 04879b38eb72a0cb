pub mod transport;
pub mod types;

pub use transport::{AuthTransport, HttpTransport};
pub use types::{Account, ApiError, AuthResponse, TokenResponse};
