//! End-to-end tests for the build pipeline through the public API.

mod build_tests;
mod cancel_tests;
mod common;
mod image_tests;
