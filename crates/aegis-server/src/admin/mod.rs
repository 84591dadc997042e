//! Administrative endpoints.
//!
//! Every handler checks a [`Capability`](aegis_core::Capability) carried in
//! the caller's access token. Callers without it get the same 404 as for an
//! unknown route.

pub mod audit;
pub mod jobs;
pub mod lockout;
pub mod rate_limits;
pub mod sessions;
pub mod tenants;
