pub mod bearer;
pub mod jwt;

pub use bearer::extract_bearer_token;
pub use jwt::{JwtClaims, JwtVerifier};
