//! Routes for authenticated end users.
//!
//! - `auth` - refresh token exchange and logout
//! - `sessions` - a user's own device sessions

pub mod auth;
pub mod sessions;
