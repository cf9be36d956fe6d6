pub mod gate;
pub mod jwt;
pub mod middleware;

pub use gate::{Authenticator, ConnectionGate};
pub use jwt::JwtAuthenticator;
