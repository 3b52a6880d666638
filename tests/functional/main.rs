// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the migration state machine.
//!
//! These tests verify phase transitions across full migration lifecycles
//! WITHOUT requiring live clusters. They drive the real transition table
//! through a mock migration state to validate phase sequences.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_happy_path_three_replicas
//! ```
//!
//! ## Design Principles
//!
//! - **No clusters required**: tests run without any infrastructure
//! - **Fast execution**: all tests complete in milliseconds
//! - **No duplicated logic**: event determination and transitions delegate
//!   to the production state machine, so tests stay in sync automatically

mod lifecycle_tests;
mod mock_state;
mod scenario_tests;

pub use mock_state::*;
