//! # aegis-ratelimit
//!
//! Sliding-window request limiting backed by the counter store.
//!
//! [`RateLimiter`] answers "may this identifier make another request in
//! this window?" with one atomic counter-store operation per check and
//! fails open when the store is unavailable. [`RoutePolicy`] decides which
//! identifier, route class and limit apply to an incoming request.

mod config;
mod limiter;
mod policy;

pub use config::{RateLimitConfig, TierLimits};
pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{PolicyError, RateLimitTarget, RoutePolicy, normalize_path};
