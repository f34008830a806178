//! # Rekey Testkit
//!
//! Testing utilities for Rekey.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an in-memory authority with registration, login and
//!   administrator helpers
//! - **Faults**: an authority wrapper that stalls history reads or rejects
//!   unlock commits
//! - **Generators**: proptest strategies for rotation sequences, and a
//!   replayer that records lock tables step by step
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use rekey_testkit::generators::{block_on, rotation_steps, RotationRun};
//!
//! proptest! {
//!     #[test]
//!     fn every_version_recorded(steps in rotation_steps(6)) {
//!         let run = block_on(RotationRun::replay("alice", &steps));
//!         prop_assert_eq!(run.tables.len(), steps.len() + 1);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use rekey_testkit::fixtures::TestWorld;
//!
//! let world = TestWorld::new();
//! let alice = world.register("alice", "pw").await;
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::FaultyAuthority;
pub use fixtures::TestWorld;
pub use generators::{block_on, rotation_step, rotation_steps, RotationRun, RotationStep};
