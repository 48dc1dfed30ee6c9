//! Bearer token issuing and validation for Timbel.
//!
//! Tokens are HS256 JWTs carrying the caller's identity. The API uses the
//! `sub` claim as the actor recorded on status changes.

pub mod jwt;

pub use jwt::{Claims, ClaimsBuilder, JwtError, TokenResponse, TokenSigner, TokenVerifier};
