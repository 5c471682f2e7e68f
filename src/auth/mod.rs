//! Token validation producing the authenticated identity of a client.

mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;
