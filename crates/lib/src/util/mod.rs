//! Shared utilities.
//!
//! Hashing used for digests and bundle comparison, plus test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
