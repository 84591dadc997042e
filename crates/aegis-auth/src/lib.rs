//! # aegis-auth
//!
//! Token service for the Aegis control plane.
//!
//! - [`jwt`] - token signing and verification (HS256, RS256, RS384, ES384)
//! - [`TokenService`] - issue, refresh with family rotation and reuse
//!   detection, verify, revoke
//! - [`SessionStore`] - write-through cached session records
//! - [`LoginLockout`] - failed sign-in counting and account locks

pub mod config;
pub mod jwt;
mod lockout;
mod service;
mod session_store;

pub use config::{AuthConfig, LockoutConfig, SessionConfig, SigningConfig};
pub use jwt::{Jwk, Jwks, JwtError, JwtService, SigningAlgorithm, SigningKeyPair, TokenClaims, TokenType};
pub use lockout::{LockStatus, LoginLockout};
pub use service::{TokenPair, TokenService};
pub use session_store::SessionStore;
