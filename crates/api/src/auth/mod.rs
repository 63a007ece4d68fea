//! Authentication module for the coda API

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager, TokenType};
pub use middleware::{optional_auth, require_admin, require_auth, AuthState, AuthUser};
