//! # Configuration Module
//!
//! Centralizes the numeric configuration for burrowdb. Interdependent values
//! live next to each other and their relationships are enforced through
//! compile-time assertions, so a change that would silently break an
//! invariant (say, a page too small to hold an intrusive free-list link)
//! fails the build instead of corrupting memory at runtime.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency
//!   documentation

pub mod constants;
pub use constants::*;
