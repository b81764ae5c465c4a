//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Error normalization: envelope for every failure, catches panics
//! 2. Identity: bearer token → `Principal`
//! 3. Audit: one entry per request, after the final status is known
//! 4. Rate limiter: per client IP, rejections are still audited

pub mod audit;
pub mod errors;
pub mod identity;
pub mod rate;
