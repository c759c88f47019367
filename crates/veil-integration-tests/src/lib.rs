//! Integration test crate for the Veil client core.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise flows across multiple workspace crates without any
//! network I/O (transports are mocked at the trait seams).
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p veil-integration-tests
//! ```
