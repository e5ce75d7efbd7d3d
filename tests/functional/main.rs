// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the RedisCluster lifecycle machinery.
//!
//! These tests drive the production validator, meta cache, status
//! conditions, and object generators through multi-step scenarios WITHOUT
//! requiring a live Kubernetes cluster or redis processes.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run a specific test
//! cargo test --test functional test_create_scenario_generates_all_objects
//! ```
//!
//! ## Test Categories
//!
//! - **Create tests**: the full dependent-object set for a fresh cluster
//! - **Transition tests**: cache classification across spec edits
//!   (scale, upgrade, config change, password edits)
//! - **Recovery tests**: master-less recovery and the multi-master fatal
//!   invariant, run through the production heal logic against a
//!   simulated deployment (`mock_wire`)

mod create_tests;
mod fixtures;
mod mock_wire;
mod recovery_tests;
mod transition_tests;

pub use fixtures::*;
