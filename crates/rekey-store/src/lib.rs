//! # Rekey Store
//!
//! The authority abstraction for Rekey. The [`Authority`] trait is the
//! single source of truth for key-version order, lock state, sharing-group
//! wrappings and resources; [`MemoryAuthority`] implements it in memory.
//!
//! ## Key Types
//!
//! - [`Authority`] - The async trait for all authority operations
//! - [`MemoryAuthority`] - In-memory authority for tests and local tooling
//! - [`Reservation`] - A leased, pending version append (one per login)
//! - [`InsertResult`] - Result of an idempotent put
//!
//! ## Design Notes
//!
//! - **Append-only histories**: versions are contiguous from 1 and never
//!   rewritten
//! - **Linearized appends**: a second reservation returns `VersionConflict`
//!   until the first lease expires
//! - **Snapshots**: an outdated expected version returns `StaleKey`
//! - **Atomic unlocks**: links, seals and lock transitions commit together
//! - **Idempotent puts**: wrappings are keyed

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryAuthority;
pub use traits::{
    AdminToken, Authority, Expectation, InsertResult, ListedResource, NewResource, Page,
    Registration, Reservation, StoredResource, UnlockCommit, VersionCommit,
};
