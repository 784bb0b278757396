//! Common utilities and shared types for the Vigil inspection agent.
//!
//! This crate provides functionality shared by every other crate in the
//! workspace: structured observability setup, the top-level error type,
//! small rate-limiting primitives, and newtype identifiers that are passed
//! around the intake pipeline.

pub mod errors;
pub mod limits;
pub mod observability;
pub mod types;

pub use errors::{IntakeError, IntakeResult};
pub use limits::{RateLimiter, RateLimiterConfig};
pub use observability::init_tracing;
pub use types::{FamilyId, InstanceId, SessionId};
